//! Engine API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Deploy request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub tool_id: String,
}

/// Deployment snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub tool_id: String,
    pub port: Option<u16>,
    pub endpoint_url: Option<String>,
    pub status: String,
    pub health_status: String,
    pub restart_count: u32,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub deployed_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Deployment list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentResponse>,
    pub total: usize,
}

/// Deployment list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentQuery {
    pub tool_id: Option<String>,
    pub status: Option<String>,
}

/// Engine status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ports_total: usize,
    pub ports_in_use: usize,
    pub deployments: BTreeMap<String, usize>,
}

/// Error body returned for every engine-generated error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}
