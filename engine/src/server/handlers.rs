//! HTTP request handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::{
    DeployRequest, DeploymentListResponse, DeploymentQuery, DeploymentResponse, HealthResponse,
    VersionResponse,
};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::EngineError;
use crate::models::deployment::DeploymentFilter;
use crate::routing::RoutedRequest;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "toolhost".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Port pool and deployment counts
pub async fn status_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.engine.status())
}

/// Deploy a tool
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    request: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<impl IntoResponse, EngineError> {
    let Json(request) = request
        .map_err(|e| EngineError::ValidationError(format!("request body: {}", e.body_text())))?;
    if request.tool_id.trim().is_empty() {
        return Err(EngineError::ValidationError("tool_id is required".to_string()));
    }

    let deployment = state.engine.deploy(&request.tool_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(DeploymentResponse::from(&deployment)),
    ))
}

/// List deployments
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeploymentQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DeploymentStatus>)
        .transpose()
        .map_err(EngineError::ValidationError)?;

    let filter = DeploymentFilter {
        tool_id: query.tool_id,
        status,
    };
    let deployments: Vec<DeploymentResponse> = state
        .engine
        .registry()
        .list(&filter)
        .iter()
        .map(DeploymentResponse::from)
        .collect();

    Ok(Json(DeploymentListResponse {
        total: deployments.len(),
        deployments,
    }))
}

/// Get one deployment
pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let deployment = state.engine.registry().get(&id)?;
    Ok(Json(DeploymentResponse::from(&deployment)))
}

/// Stop a deployment. Idempotent.
pub async fn stop_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    state.engine.stop(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Forward a request to the tool named in the path
pub async fn proxy_handler(
    State(state): State<Arc<ServerState>>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Result<Response, EngineError> {
    let slug = params
        .get("slug")
        .cloned()
        .ok_or_else(|| EngineError::ValidationError("missing tool slug".to_string()))?;

    let (parts, body) = request.into_parts();

    let path = tool_path(parts.uri.path());

    let body = axum::body::to_bytes(body, state.router.options().max_body_bytes)
        .await
        .map_err(|e| EngineError::ValidationError(format!("request body: {}", e)))?;

    let routed = state
        .router
        .route(
            &slug,
            RoutedRequest {
                method: parts.method,
                path,
                query: parts.uri.query().map(str::to_string),
                headers: parts.headers,
                body,
            },
        )
        .await?;

    let mut response = Response::new(Body::from(routed.body));
    *response.status_mut() = routed.status;
    *response.headers_mut() = routed.headers;
    Ok(response)
}

/// Path below `/tools/{slug}`, cut from the raw request path by segment so
/// percent-encoding (in the slug or below it) reaches the tool untouched
fn tool_path(raw: &str) -> String {
    let rest = raw.strip_prefix("/tools/").unwrap_or(raw);
    match rest.find('/') {
        Some(i) => rest[i..].to_string(),
        None => "/".to_string(),
    }
}
