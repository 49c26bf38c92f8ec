//! Deployment lifecycle: ports, supervision, records and coordination

pub mod docker;
pub mod engine;
pub mod fsm;
pub mod native;
pub mod ports;
pub mod registry;
pub mod store;
pub mod supervisor;

pub use engine::{DeploymentEngine, EngineOptions};
pub use registry::DeploymentRegistry;
