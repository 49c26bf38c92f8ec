//! Tool catalog
//!
//! The engine only needs read access to the catalog: resolving a routing
//! slug to a tool and fetching a tool's launch configuration.

pub mod tools;

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::models::tool::Tool;

pub use tools::InMemoryCatalog;

/// Read-only view of the tool catalog
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Tool registered under `slug`, if any
    async fn resolve_slug(&self, slug: &str) -> Option<Tool>;

    /// Tool with id `tool_id`
    async fn get_tool(&self, tool_id: &str) -> Result<Tool, EngineError>;
}
