//! Tool catalog models

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Placeholder substituted with the assigned port in launch arguments
pub const PORT_PLACEHOLDER: &str = "{port}";

/// A catalog entry describing what to launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,

    /// URL-safe routing identifier
    pub slug: String,

    pub name: String,

    pub launch_config: LaunchConfig,

    /// Path probed by the health monitor
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// How a tool's service is started, selected by the `kind` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchConfig {
    /// Native child process
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        working_dir: Option<String>,
    },

    /// Container started through the docker CLI
    Container {
        image: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        /// Port the service listens on inside the container
        #[serde(default = "default_container_port")]
        container_port: u16,
    },
}

fn default_container_port() -> u16 {
    8080
}

impl LaunchConfig {
    pub fn kind(&self) -> LaunchKind {
        match self {
            LaunchConfig::Process { .. } => LaunchKind::Process,
            LaunchConfig::Container { .. } => LaunchKind::Container,
        }
    }
}

/// Launch mechanism tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchKind {
    Process,
    Container,
}

/// Replace every `{port}` in the arguments with the assigned port
pub fn substitute_port(args: &[String], port: u16) -> Vec<String> {
    let port = port.to_string();
    args.iter()
        .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
        .collect()
}
