//! Deployment status state machine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Instance launched, not yet ready
    Starting,

    /// Instance answered its readiness probe
    Running,

    /// Stopped on request (terminal)
    Stopped,

    /// Failed; may be restarted while restart budget remains
    Failed,
}

impl DeploymentStatus {
    /// Whether the deployment currently holds a port
    pub fn is_active(&self) -> bool {
        matches!(self, DeploymentStatus::Starting | DeploymentStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Starting => "STARTING",
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::Stopped => "STOPPED",
            DeploymentStatus::Failed => "FAILED",
        }
    }

    /// Check whether `self -> next` is a legal transition.
    ///
    /// `STARTING -> STOPPED` is accepted for a user stop issued before the
    /// instance became ready.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopped)
                | (Running, Failed)
                | (Running, Stopped)
                | (Failed, Starting)
        )
    }

    /// Validate and return the next status
    pub fn transition(&self, next: DeploymentStatus) -> Result<DeploymentStatus, String> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(format!("{} -> {}", self, next))
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STARTING" => Ok(DeploymentStatus::Starting),
            "RUNNING" => Ok(DeploymentStatus::Running),
            "STOPPED" => Ok(DeploymentStatus::Stopped),
            "FAILED" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Advisory health of a deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Unhealthy => "UNHEALTHY",
            HealthStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
