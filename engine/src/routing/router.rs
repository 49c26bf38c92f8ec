//! Request router
//!
//! Resolves a tool slug to the RUNNING deployment of that tool and forwards
//! the request to its endpoint. Never waits for or retries a deployment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use chrono::Utc;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, warn};

use crate::catalog::ToolCatalog;
use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::DeploymentRegistry;
use crate::errors::EngineError;
use crate::http::client::{join_url, HttpClient};
use crate::models::deployment::{Deployment, DeploymentFilter};
use crate::models::usage::UsageRecord;
use crate::routing::headers::strip_hop_by_hop;
use crate::workers::usage::UsageRecorder;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Router options
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Bound for one forwarded request, response body included
    pub timeout: Duration,

    /// Largest request body accepted for forwarding
    pub max_body_bytes: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// A request addressed to a tool
#[derive(Debug, Clone)]
pub struct RoutedRequest {
    pub method: Method,
    /// Path below the tool slug
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream answer
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Request router
pub struct RequestRouter {
    options: RouterOptions,
    catalog: Arc<dyn ToolCatalog>,
    registry: Arc<DeploymentRegistry>,
    client: HttpClient,
    recorder: UsageRecorder,
}

impl RequestRouter {
    pub fn new(
        options: RouterOptions,
        catalog: Arc<dyn ToolCatalog>,
        registry: Arc<DeploymentRegistry>,
        client: HttpClient,
        recorder: UsageRecorder,
    ) -> Self {
        Self {
            options,
            catalog,
            registry,
            client,
            recorder,
        }
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Route `request` to the tool registered under `slug`.
    ///
    /// A usage record is queued for every call, whatever the outcome.
    pub async fn route(
        &self,
        slug: &str,
        request: RoutedRequest,
    ) -> Result<RoutedResponse, EngineError> {
        let started = Instant::now();
        let mut usage = UsageRecord {
            tool_id: None,
            deployment_id: None,
            endpoint: format!("/{}", request.path.trim_start_matches('/')),
            method: request.method.to_string(),
            status_code: 0,
            response_time_ms: 0,
            user_id: request
                .headers
                .get(USER_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            timestamp: Utc::now(),
        };

        let result = match self.resolve(slug, &mut usage).await {
            Ok(deployment) => self.forward(&deployment, request).await,
            Err(e) => Err(e),
        };

        usage.status_code = match &result {
            Ok(response) => response.status.as_u16(),
            Err(e) => e.status_code().as_u16(),
        };
        usage.response_time_ms = started.elapsed().as_millis() as u64;
        self.recorder.record(usage);

        result
    }

    /// Current RUNNING deployment for `slug`, most recent first
    async fn resolve(
        &self,
        slug: &str,
        usage: &mut UsageRecord,
    ) -> Result<Deployment, EngineError> {
        let tool = self
            .catalog
            .resolve_slug(slug)
            .await
            .ok_or_else(|| EngineError::NotDeployed(slug.to_string()))?;
        usage.tool_id = Some(tool.id.clone());

        let deployment = self
            .registry
            .list(&DeploymentFilter::tool(&tool.id).with_status(DeploymentStatus::Running))
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotDeployed(slug.to_string()))?;
        usage.deployment_id = Some(deployment.id.clone());

        Ok(deployment)
    }

    async fn forward(
        &self,
        deployment: &Deployment,
        request: RoutedRequest,
    ) -> Result<RoutedResponse, EngineError> {
        let endpoint_url = deployment
            .endpoint_url
            .as_deref()
            .ok_or_else(|| EngineError::UpstreamUnavailable("deployment has no endpoint".to_string()))?;

        let mut url = join_url(endpoint_url, &request.path);
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        debug!("Forwarding {} {} to deployment {}", request.method, url, deployment.id);

        let mut headers = strip_hop_by_hop(&request.headers);
        headers.remove(CONTENT_LENGTH);

        let call = async {
            let response = self
                .client
                .inner()
                .request(request.method, &url)
                .headers(headers)
                .body(request.body)
                .send()
                .await?;
            let status = response.status();
            let headers = strip_hop_by_hop(response.headers());
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(RoutedResponse {
                status,
                headers,
                body,
            })
        };

        match tokio::time::timeout(self.options.timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(EngineError::UpstreamTimeout(self.options.timeout)),
            Ok(Err(e)) => {
                warn!("Upstream {} unavailable: {}", url, e);
                Err(EngineError::UpstreamUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!("Upstream {} timed out after {:?}", url, self.options.timeout);
                Err(EngineError::UpstreamTimeout(self.options.timeout))
            }
        }
    }
}
