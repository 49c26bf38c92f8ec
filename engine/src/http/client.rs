//! HTTP client implementation

use std::time::Duration;

use reqwest::{redirect::Policy, Client, StatusCode};
use tracing::debug;

use crate::errors::EngineError;

/// Idle upstream connections are dropped after this long
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// HTTP client shared by the health monitor and the request router
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client.
    ///
    /// Redirects are never followed so upstream responses reach callers
    /// unchanged. Timeouts are applied per call.
    pub fn new() -> Result<Self, EngineError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Underlying reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET `url` and return the response status, bounded by `timeout`
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<StatusCode, EngineError> {
        debug!("GET {}", url);

        let response = tokio::time::timeout(timeout, self.client.get(url).send())
            .await
            .map_err(|_| EngineError::HealthCheckTimeout(timeout))??;

        Ok(response.status())
    }
}

/// Join a base URL and a path with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
