//! Health monitor worker
//!
//! Periodically reconciles every STARTING or RUNNING deployment against its
//! instance: liveness first, then an HTTP probe. Crashes and sustained
//! unhealthiness go through the engine's fail-and-restart path.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{DeploymentStatus, HealthStatus};
use crate::deploy::DeploymentEngine;
use crate::errors::EngineError;
use crate::http::client::{join_url, HttpClient};
use crate::models::deployment::{Deployment, DeploymentFilter};

/// Health monitor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between evaluation passes
    pub interval: Duration,

    /// Delay before the first pass
    pub initial_delay: Duration,

    /// Bound for each individual probe
    pub probe_timeout: Duration,

    /// Consecutive UNHEALTHY passes before a RUNNING deployment is failed
    pub unhealthy_threshold: u32,

    /// How long a STARTING deployment may take to become ready
    pub startup_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            unhealthy_threshold: 3,
            startup_timeout: Duration::from_secs(120),
        }
    }
}

/// What a pass did to one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Lifecycle lock busy or deployment no longer active
    Skipped,
    /// Health recorded, status unchanged
    Observed,
    /// STARTING -> RUNNING
    Promoted,
    /// Failed (and possibly restarted)
    Failed,
    /// A pending user stop was completed
    Stopped,
}

/// Tally of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub promoted: usize,
    pub failed: usize,
    pub stopped: usize,
    pub errors: usize,
}

/// Run the health monitor until shutdown
pub async fn run<S, F>(
    options: &Options,
    engine: &DeploymentEngine,
    client: &HttpClient,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "Health monitor starting (interval {:?}, probe timeout {:?})...",
        options.interval, options.probe_timeout
    );

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Health monitor shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        let summary = run_pass(options, engine, client).await;
        if summary.evaluated > 0 {
            debug!("Health pass complete: {:?}", summary);
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health monitor shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

/// Evaluate every active deployment once, concurrently
pub async fn run_pass(
    options: &Options,
    engine: &DeploymentEngine,
    client: &HttpClient,
) -> PassSummary {
    let active: Vec<Deployment> = engine
        .registry()
        .list(&DeploymentFilter::default())
        .into_iter()
        .filter(|d| d.is_active())
        .collect();

    let outcomes = join_all(
        active
            .iter()
            .map(|d| evaluate(options, engine, client, &d.id)),
    )
    .await;

    let mut summary = PassSummary {
        evaluated: active.len(),
        ..Default::default()
    };
    for (deployment, outcome) in active.iter().zip(outcomes) {
        match outcome {
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Ok(Outcome::Observed) => {}
            Ok(Outcome::Promoted) => summary.promoted += 1,
            Ok(Outcome::Failed) => summary.failed += 1,
            Ok(Outcome::Stopped) => summary.stopped += 1,
            Err(e) => {
                error!("Health evaluation of deployment {} failed: {}", deployment.id, e);
                summary.errors += 1;
            }
        }
    }
    summary
}

/// Evaluate one deployment under its lifecycle lock
pub async fn evaluate(
    options: &Options,
    engine: &DeploymentEngine,
    client: &HttpClient,
    deployment_id: &str,
) -> Result<Outcome, EngineError> {
    let Some(guard) = engine.registry().try_lock(deployment_id) else {
        debug!("Deployment {} is busy, skipping this pass", deployment_id);
        return Ok(Outcome::Skipped);
    };

    let deployment = engine.registry().get(deployment_id)?;
    if !deployment.is_active() {
        return Ok(Outcome::Skipped);
    }

    // A stop whose termination failed earlier
    if deployment.stop_requested {
        info!("Retrying stop of deployment {}", deployment_id);
        engine.stop_locked(&guard).await?;
        return Ok(Outcome::Stopped);
    }

    if !engine.supervisor().is_alive(deployment_id).await {
        let (reason, allow_restart) = match deployment.status {
            DeploymentStatus::Running => (
                EngineError::DeploymentCrashed(format!(
                    "instance on port {} exited",
                    port_label(&deployment)
                )),
                true,
            ),
            _ => (
                EngineError::StartFailure("instance exited before becoming ready".to_string()),
                deployment.restart_count > 0,
            ),
        };
        engine
            .fail_and_restart(&guard, reason.to_string(), allow_restart)
            .await?;
        return Ok(Outcome::Failed);
    }

    let health_path = match engine.catalog().get_tool(&deployment.tool_id).await {
        Ok(tool) => tool.health_path,
        Err(_) => "/health".to_string(),
    };
    let Some(endpoint_url) = deployment.endpoint_url.as_deref() else {
        return Ok(Outcome::Skipped);
    };
    let health = probe(
        client,
        &join_url(endpoint_url, &health_path),
        options.probe_timeout,
    )
    .await;
    let now = Utc::now();

    match deployment.status {
        DeploymentStatus::Starting => {
            if health == HealthStatus::Healthy {
                engine.registry().mark_running(deployment_id, now).await?;
                info!(
                    "Deployment {} is ready on port {}",
                    deployment_id,
                    port_label(&deployment)
                );
                return Ok(Outcome::Promoted);
            }

            engine
                .registry()
                .update_health(deployment_id, health, now)
                .await?;

            let started_at = deployment.started_at.unwrap_or(deployment.deployed_at);
            let waited = (now - started_at).to_std().unwrap_or_default();
            if waited >= options.startup_timeout {
                let reason = EngineError::StartFailure(format!(
                    "not ready within {:?}",
                    options.startup_timeout
                ));
                engine
                    .fail_and_restart(&guard, reason.to_string(), deployment.restart_count > 0)
                    .await?;
                return Ok(Outcome::Failed);
            }
            Ok(Outcome::Observed)
        }
        DeploymentStatus::Running => {
            let updated = engine
                .registry()
                .update_health(deployment_id, health, now)
                .await?;

            if updated.consecutive_unhealthy >= options.unhealthy_threshold {
                let reason = format!(
                    "unhealthy for {} consecutive checks",
                    updated.consecutive_unhealthy
                );
                engine.fail_and_restart(&guard, reason, true).await?;
                return Ok(Outcome::Failed);
            }
            Ok(Outcome::Observed)
        }
        DeploymentStatus::Stopped | DeploymentStatus::Failed => Ok(Outcome::Skipped),
    }
}

/// HEALTHY on 2xx, UNHEALTHY on any other status, UNKNOWN when no answer
async fn probe(client: &HttpClient, url: &str, timeout: Duration) -> HealthStatus {
    match client.probe(url, timeout).await {
        Ok(status) if status.is_success() => HealthStatus::Healthy,
        Ok(status) => {
            warn!("Health probe {} answered {}", url, status);
            HealthStatus::Unhealthy
        }
        Err(e) => {
            debug!("Health probe {} failed: {}", url, e);
            HealthStatus::Unknown
        }
    }
}

fn port_label(deployment: &Deployment) -> String {
    deployment
        .port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string())
}
