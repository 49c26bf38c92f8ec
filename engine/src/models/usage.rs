//! Usage statistics models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata captured for one routed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tool_id: Option<String>,
    pub deployment_id: Option<String>,

    /// Path requested below the tool slug
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}
