//! Deployment models

use chrono::{DateTime, Utc};
use openapi_server::models::DeploymentResponse;
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{DeploymentStatus, HealthStatus};
use crate::models::tool::LaunchKind;

/// Locator of an out-of-process instance.
///
/// Persisted with the deployment so an instance left behind by a previous
/// engine run can still be found and terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessRef {
    Native { pid: u32 },
    Container { name: String },
    /// Instance living inside the engine process (tests, embedded tools)
    InProcess { label: String },
}

impl ProcessRef {
    /// Launch mechanism that owns instances of this kind. In-process
    /// instances are launched through the process launcher.
    pub fn launch_kind(&self) -> LaunchKind {
        match self {
            ProcessRef::Native { .. } | ProcessRef::InProcess { .. } => LaunchKind::Process,
            ProcessRef::Container { .. } => LaunchKind::Container,
        }
    }
}

/// A single running (or previously running) instance of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Catalog tool this deployment runs
    pub tool_id: String,

    /// Assigned port, present only while non-terminal
    pub port: Option<u16>,

    /// Endpoint derived from host and port
    pub endpoint_url: Option<String>,

    pub status: DeploymentStatus,

    pub health_status: HealthStatus,

    /// Automatic restarts performed so far
    pub restart_count: u32,

    /// Consecutive health passes that observed UNHEALTHY
    #[serde(default)]
    pub consecutive_unhealthy: u32,

    /// Set once a user asked to stop this deployment
    #[serde(default)]
    pub stop_requested: bool,

    #[serde(default)]
    pub process: Option<ProcessRef>,

    #[serde(default)]
    pub last_error: Option<String>,

    pub last_health_check_at: Option<DateTime<Utc>>,

    pub deployed_at: DateTime<Utc>,

    /// Launch time of the current instance
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    pub stopped_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Create a new record in STARTING state
    pub fn new(id: String, tool_id: String, port: u16, endpoint_url: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            tool_id,
            port: Some(port),
            endpoint_url: Some(endpoint_url),
            status: DeploymentStatus::Starting,
            health_status: HealthStatus::Unknown,
            restart_count: 0,
            consecutive_unhealthy: 0,
            stop_requested: false,
            process: None,
            last_error: None,
            last_health_check_at: None,
            deployed_at: now,
            started_at: Some(now),
            stopped_at: None,
        }
    }

    /// Whether the deployment is STARTING or RUNNING
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

impl From<&Deployment> for DeploymentResponse {
    fn from(d: &Deployment) -> Self {
        DeploymentResponse {
            id: d.id.clone(),
            tool_id: d.tool_id.clone(),
            port: d.port,
            endpoint_url: d.endpoint_url.clone(),
            status: d.status.to_string(),
            health_status: d.health_status.to_string(),
            restart_count: d.restart_count,
            last_health_check_at: d.last_health_check_at,
            deployed_at: d.deployed_at,
            stopped_at: d.stopped_at,
            last_error: d.last_error.clone(),
        }
    }
}

/// Filter for listing deployments
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub tool_id: Option<String>,
    pub status: Option<DeploymentStatus>,
}

impl DeploymentFilter {
    pub fn tool(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: Some(tool_id.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, deployment: &Deployment) -> bool {
        self.tool_id
            .as_ref()
            .map_or(true, |tool_id| &deployment.tool_id == tool_id)
            && self.status.map_or(true, |status| deployment.status == status)
    }
}
