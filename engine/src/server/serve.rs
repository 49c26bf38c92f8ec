//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EngineError;
use crate::server::handlers::{
    deploy_handler, get_deployment_handler, health_handler, list_deployments_handler,
    proxy_handler, status_handler, stop_deployment_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the engine's HTTP routes
pub fn app(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/status", get(status_handler))
        // Deployments
        .route(
            "/deployments",
            get(list_deployments_handler).post(deploy_handler),
        )
        .route(
            "/deployments/{id}",
            get(get_deployment_handler).delete(stop_deployment_handler),
        )
        // Routed tool traffic
        .route("/tools/{slug}", any(proxy_handler))
        .route("/tools/{slug}/{*path}", any(proxy_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let app = app(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::ServerError(format!("bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EngineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
