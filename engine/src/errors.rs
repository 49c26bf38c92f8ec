//! Error types for the toolhost engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::ErrorResponse;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// No free port left in the configured range
    #[error("Port range {start}-{end} exhausted")]
    PortExhausted { start: u16, end: u16 },

    /// The instance could not be launched
    #[error("Failed to start deployment: {0}")]
    StartFailure(String),

    /// A health probe did not answer in time
    #[error("Health check timed out after {0:?}")]
    HealthCheckTimeout(std::time::Duration),

    /// The instance died while running
    #[error("Deployment crashed: {0}")]
    DeploymentCrashed(String),

    #[error("Restart budget exhausted after {0} restarts")]
    RestartBudgetExhausted(u32),

    /// The routing target has no running instance
    #[error("Tool '{0}' is not deployed")]
    NotDeployed(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Reason code reported in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            EngineError::NotDeployed(_) => "NOT_DEPLOYED",
            EngineError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            EngineError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            EngineError::PortExhausted { .. } => "PORT_EXHAUSTED",
            EngineError::StartFailure(_) => "START_FAILURE",
            EngineError::InvalidTransition(_) => "INVALID_TRANSITION",
            EngineError::ValidationError(_) => "VALIDATION",
            _ => "INTERNAL",
        }
    }

    /// HTTP status used when the error reaches an API caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::NotFound(_)
            | EngineError::ToolNotFound(_)
            | EngineError::NotDeployed(_) => StatusCode::NOT_FOUND,
            EngineError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            EngineError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::PortExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::InvalidTransition(_) => StatusCode::CONFLICT,
            EngineError::ValidationError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
