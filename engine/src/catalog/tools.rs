//! In-memory tool catalog

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::catalog::ToolCatalog;
use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::models::tool::Tool;

/// In-memory tool catalog keyed by tool id
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tools: RwLock<HashMap<String, Tool>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list of tools
    pub fn with_tools(tools: impl IntoIterator<Item = Tool>) -> Result<Self, EngineError> {
        let catalog = Self::new();
        for tool in tools {
            catalog.insert(tool)?;
        }
        Ok(catalog)
    }

    /// Load a JSON array of tools. A missing file yields an empty catalog.
    pub async fn load_file(file: &File) -> Result<Self, EngineError> {
        if !file.exists().await {
            warn!("Tool catalog {} not found, starting empty", file.path().display());
            return Ok(Self::new());
        }

        let tools: Vec<Tool> = file.read_json().await?;
        let catalog = Self::with_tools(tools)?;
        info!(
            "Loaded {} tools from {}",
            catalog.len(),
            file.path().display()
        );
        Ok(catalog)
    }

    /// Insert or replace a tool. Slugs must be unique across tools.
    pub fn insert(&self, tool: Tool) -> Result<(), EngineError> {
        if tool.slug.is_empty() || !tool.slug.chars().all(is_slug_char) {
            return Err(EngineError::ValidationError(format!(
                "invalid tool slug '{}'",
                tool.slug
            )));
        }

        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if let Some(other) = tools
            .values()
            .find(|t| t.slug == tool.slug && t.id != tool.id)
        {
            return Err(EngineError::ValidationError(format!(
                "slug '{}' already used by tool {}",
                tool.slug, other.id
            )));
        }

        tools.insert(tool.id.clone(), tool);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

#[async_trait]
impl ToolCatalog for InMemoryCatalog {
    async fn resolve_slug(&self, slug: &str) -> Option<Tool> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.values().find(|t| t.slug == slug).cloned()
    }

    async fn get_tool(&self, tool_id: &str) -> Result<Tool, EngineError> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools
            .get(tool_id)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound(tool_id.to_string()))
    }
}
