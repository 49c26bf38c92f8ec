//! Deployment lifecycle coordination
//!
//! Composes the port allocator, process supervisor and registry into the
//! deploy, stop and restart operations. Every operation on a deployment runs
//! under that deployment's lifecycle lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use openapi_server::models::StatusResponse;
use tracing::{error, info, warn};
use url::Url;

use crate::catalog::ToolCatalog;
use crate::deploy::fsm::DeploymentStatus;
use crate::deploy::ports::PortAllocator;
use crate::deploy::registry::{DeploymentRegistry, LifecycleGuard};
use crate::deploy::supervisor::ProcessSupervisor;
use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentFilter};
use crate::models::tool::Tool;

/// Engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Host used when deriving endpoint URLs
    pub public_host: String,

    /// Automatic restarts allowed per deployment
    pub max_restarts: u32,

    /// Grace period given to instances on stop
    pub stop_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            public_host: "127.0.0.1".to_string(),
            max_restarts: 3,
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// Deployment engine
pub struct DeploymentEngine {
    options: EngineOptions,
    registry: Arc<DeploymentRegistry>,
    ports: Arc<PortAllocator>,
    supervisor: Arc<ProcessSupervisor>,
    catalog: Arc<dyn ToolCatalog>,
}

impl DeploymentEngine {
    pub fn new(
        options: EngineOptions,
        registry: Arc<DeploymentRegistry>,
        ports: Arc<PortAllocator>,
        supervisor: Arc<ProcessSupervisor>,
        catalog: Arc<dyn ToolCatalog>,
    ) -> Self {
        Self {
            options,
            registry,
            ports,
            supervisor,
            catalog,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn catalog(&self) -> &Arc<dyn ToolCatalog> {
        &self.catalog
    }

    /// Endpoint URL of an instance listening on `port`
    pub fn endpoint_url(&self, port: u16) -> Result<String, EngineError> {
        let mut url = Url::parse("http://localhost")
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        url.set_host(Some(&self.options.public_host))
            .map_err(|e| {
                EngineError::ConfigError(format!(
                    "invalid public host '{}': {}",
                    self.options.public_host, e
                ))
            })?;
        url.set_port(Some(port))
            .map_err(|_| EngineError::ConfigError("endpoint URL cannot carry a port".to_string()))?;

        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    /// Deploy a new instance of `tool_id`.
    ///
    /// Returns the record as it stands once the launch call returned:
    /// STARTING on success, FAILED (port already released) when the
    /// instance could not be launched.
    pub async fn deploy(&self, tool_id: &str) -> Result<Deployment, EngineError> {
        let tool = self.catalog.get_tool(tool_id).await?;
        let port = self.ports.allocate()?;

        let endpoint_url = match self.endpoint_url(port) {
            Ok(url) => url,
            Err(e) => {
                self.ports.release(port);
                return Err(e);
            }
        };

        let (deployment, guard) = match self
            .registry
            .create(&tool.id, port, endpoint_url)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                self.ports.release(port);
                return Err(e);
            }
        };

        info!(
            "Deploying tool {} ({}) as {} on port {}",
            tool.slug, tool.id, deployment.id, port
        );

        match self.launch(&guard, &tool, port).await {
            Ok(started) => Ok(started),
            Err(e) => {
                error!("Deployment {} failed to start: {}", deployment.id, e);
                let failed = self
                    .registry
                    .update_status(&deployment.id, DeploymentStatus::Failed, Some(e.to_string()))
                    .await?;
                self.ports.release(port);
                Ok(failed)
            }
        }
    }

    /// Stop a deployment. Idempotent.
    ///
    /// Waits for any lifecycle operation in flight on the same deployment
    /// (e.g. an automatic restart) and stops whatever it left running.
    pub async fn stop(&self, deployment_id: &str) -> Result<Deployment, EngineError> {
        let guard = self.registry.lock(deployment_id).await?;
        self.stop_locked(&guard).await
    }

    /// Stop the locked deployment.
    ///
    /// The stop request is persisted before the instance is terminated. When
    /// termination fails the record stays active with its port reserved and
    /// the health monitor retries the stop on its next pass.
    pub async fn stop_locked(&self, guard: &LifecycleGuard) -> Result<Deployment, EngineError> {
        let id = guard.deployment_id();
        let current = self.registry.get(id)?;

        match current.status {
            DeploymentStatus::Stopped => Ok(current),
            DeploymentStatus::Failed => {
                info!("Deployment {} already failed, disabling restarts", id);
                self.registry.mark_stopped(id).await
            }
            DeploymentStatus::Starting | DeploymentStatus::Running => {
                if !current.stop_requested {
                    self.registry.request_stop(id).await?;
                }
                if let Err(e) = self.supervisor.stop(id, self.options.stop_grace).await {
                    error!(
                        "Failed to stop deployment {}, port {} stays reserved: {}",
                        id,
                        current.port.map(|p| p.to_string()).unwrap_or_default(),
                        e
                    );
                    return Err(e);
                }
                let stopped = self.registry.mark_stopped(id).await?;
                if let Some(port) = current.port {
                    self.ports.release(port);
                }
                info!("Deployment {} stopped", id);
                Ok(stopped)
            }
        }
    }

    /// Move an active deployment to FAILED, then restart it when
    /// `allow_restart` is set and restart budget remains.
    pub async fn fail_and_restart(
        &self,
        guard: &LifecycleGuard,
        reason: String,
        allow_restart: bool,
    ) -> Result<Deployment, EngineError> {
        self.fail_over(guard, reason, allow_restart, true).await
    }

    /// Fail-over body. The old port is released only when `port_releasable`
    /// holds and the held instance was terminated.
    async fn fail_over(
        &self,
        guard: &LifecycleGuard,
        reason: String,
        allow_restart: bool,
        port_releasable: bool,
    ) -> Result<Deployment, EngineError> {
        let id = guard.deployment_id();
        let current = self.registry.get(id)?;
        if !current.is_active() {
            return Ok(current);
        }

        warn!(
            "Deployment {} of tool {} failed: {}",
            id, current.tool_id, reason
        );

        let terminated = match self.supervisor.stop(id, self.options.stop_grace).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to terminate instance of deployment {}: {}", id, e);
                false
            }
        };

        let failed = self
            .registry
            .update_status(id, DeploymentStatus::Failed, Some(reason))
            .await?;

        if let Some(port) = current.port {
            if terminated && port_releasable {
                self.ports.release(port);
            } else {
                warn!("Port {} stays reserved, its instance may still be alive", port);
            }
        }

        if allow_restart && !failed.stop_requested {
            return self.restart_failed(guard).await;
        }
        Ok(failed)
    }

    /// Relaunch a FAILED deployment on a new port while budget remains.
    /// Each attempt, successful or not, consumes one restart.
    pub async fn restart_failed(&self, guard: &LifecycleGuard) -> Result<Deployment, EngineError> {
        let id = guard.deployment_id();

        loop {
            let current = self.registry.get(id)?;
            if current.status != DeploymentStatus::Failed || current.stop_requested {
                return Ok(current);
            }

            if current.restart_count >= self.options.max_restarts {
                let reason = EngineError::RestartBudgetExhausted(current.restart_count);
                error!("Deployment {} rests in FAILED: {}", id, reason);
                return self.registry.set_error(id, reason.to_string()).await;
            }

            let tool = match self.catalog.get_tool(&current.tool_id).await {
                Ok(tool) => tool,
                Err(e) => {
                    error!("Cannot restart deployment {}: {}", id, e);
                    return self.registry.set_error(id, e.to_string()).await;
                }
            };

            let port = match self.ports.allocate() {
                Ok(port) => port,
                Err(e) => {
                    error!("Cannot restart deployment {}: {}", id, e);
                    return self.registry.set_error(id, e.to_string()).await;
                }
            };

            let restarted = match self.endpoint_url(port) {
                Ok(endpoint_url) => self.registry.begin_restart(id, port, endpoint_url).await,
                Err(e) => Err(e),
            };
            let restarted = match restarted {
                Ok(restarted) => restarted,
                Err(e) => {
                    self.ports.release(port);
                    return Err(e);
                }
            };

            info!(
                "Restarting deployment {} (attempt {}/{}) on port {}",
                id, restarted.restart_count, self.options.max_restarts, port
            );

            match self.launch(guard, &tool, port).await {
                Ok(started) => return Ok(started),
                Err(e) => {
                    warn!("Restart of deployment {} failed: {}", id, e);
                    self.registry
                        .update_status(id, DeploymentStatus::Failed, Some(e.to_string()))
                        .await?;
                    self.ports.release(port);
                }
            }
        }
    }

    /// Reconcile records left non-terminal by a previous engine run.
    ///
    /// No handle exists for their instances: any survivor is terminated by
    /// its locator, then the deployment goes through the restart path.
    /// Returns the number of deployments reconciled.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let stale: Vec<_> = self
            .registry
            .list(&DeploymentFilter::default())
            .into_iter()
            .filter(|d| d.is_active())
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }
        info!("Recovering {} deployments from previous run", stale.len());

        for deployment in &stale {
            let guard = self.registry.lock(&deployment.id).await?;
            let mut port_releasable = true;

            if let Some(port) = deployment.port {
                if let Err(e) = self.ports.reserve(port) {
                    warn!("Deployment {} holds unusable port {}: {}", deployment.id, port, e);
                    port_releasable = false;
                }
            }

            if let Some(process) = &deployment.process {
                if let Err(e) = self
                    .supervisor
                    .terminate_orphan(process, self.options.stop_grace)
                    .await
                {
                    warn!(
                        "Failed to terminate orphan {:?} of deployment {}: {}",
                        process, deployment.id, e
                    );
                    port_releasable = false;
                }
            }

            let recovered = self
                .fail_over(&guard, "engine restarted".to_string(), true, port_releasable)
                .await?;
            info!(
                "Deployment {} recovered as {} (restarts: {})",
                recovered.id, recovered.status, recovered.restart_count
            );
        }

        Ok(stale.len())
    }

    /// Port pool occupancy and deployment counts by status
    pub fn status(&self) -> StatusResponse {
        let mut deployments = BTreeMap::new();
        for status in [
            DeploymentStatus::Starting,
            DeploymentStatus::Running,
            DeploymentStatus::Stopped,
            DeploymentStatus::Failed,
        ] {
            deployments.insert(status.to_string(), 0);
        }
        for deployment in self.registry.list(&DeploymentFilter::default()) {
            *deployments.entry(deployment.status.to_string()).or_insert(0) += 1;
        }

        StatusResponse {
            ports_total: self.ports.capacity(),
            ports_in_use: self.ports.in_use(),
            deployments,
        }
    }

    /// Launch `tool` for the locked deployment and record its locator
    async fn launch(
        &self,
        guard: &LifecycleGuard,
        tool: &Tool,
        port: u16,
    ) -> Result<Deployment, EngineError> {
        let id = guard.deployment_id();
        let process = self.supervisor.start(id, tool, port).await?;

        match self.registry.set_process(id, process).await {
            Ok(started) => Ok(started),
            Err(e) => {
                let _ = self.supervisor.stop(id, self.options.stop_grace).await;
                Err(e)
            }
        }
    }
}
