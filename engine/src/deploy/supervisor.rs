//! Process supervisor
//!
//! Starts one out-of-process instance per deployment, keeps the live handle
//! for it, and stops it gracefully (then forcibly) on request. Launch
//! mechanics are dispatched on the tool's `launch_config` tag to a
//! [`Launcher`] implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::deploy::docker::ContainerLauncher;
use crate::deploy::native::NativeLauncher;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::ProcessRef;
use crate::models::tool::{LaunchKind, Tool};

/// Supervisor options
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Upper bound for a single launch call
    pub start_timeout: Duration,

    /// Default grace period between the graceful signal and the forced kill
    pub stop_grace: Duration,

    /// Delay after launch before checking for an immediate crash
    pub settle: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
            settle: Duration::from_millis(200),
        }
    }
}

/// What a launcher needs to start an instance
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub deployment_id: String,
    pub tool: Tool,
    pub port: u16,
}

/// A launched, out-of-process service instance
#[async_trait]
pub trait Instance: Send + Sync {
    /// Persistable locator for this instance
    fn process_ref(&self) -> ProcessRef;

    /// Non-blocking liveness check. Never fails; only a confirmed exit is
    /// `false`.
    async fn is_alive(&self) -> bool;

    /// Graceful termination, forced once `grace` has elapsed.
    /// Must be safe to call on an instance that already exited.
    async fn terminate(&self, grace: Duration) -> Result<(), EngineError>;
}

/// One launch mechanism (native process, container, ...)
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn Instance>, EngineError>;

    /// Terminate an instance this launcher started during a previous engine
    /// run, known only by its locator. Gone instances are not an error.
    async fn terminate_orphan(&self, process: &ProcessRef, grace: Duration)
        -> Result<(), EngineError>;
}

/// Live handle to a supervised instance. Owned by the supervisor only.
pub struct ProcessHandle {
    deployment_id: String,
    port: u16,
    instance: Box<dyn Instance>,
}

impl ProcessHandle {
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Process supervisor
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    launchers: HashMap<LaunchKind, Arc<dyn Launcher>>,
    handles: Mutex<HashMap<String, Arc<ProcessHandle>>>,
}

impl ProcessSupervisor {
    /// Create a supervisor with the native and container launchers.
    /// Instance output is written below `log_dir` when given.
    pub fn new(options: SupervisorOptions, log_dir: Option<Dir>) -> Self {
        Self::with_launchers(
            options,
            Arc::new(NativeLauncher::new(log_dir)),
            Arc::new(ContainerLauncher::new()),
        )
    }

    /// Create a supervisor with explicit launchers
    pub fn with_launchers(
        options: SupervisorOptions,
        process_launcher: Arc<dyn Launcher>,
        container_launcher: Arc<dyn Launcher>,
    ) -> Self {
        let mut launchers: HashMap<LaunchKind, Arc<dyn Launcher>> = HashMap::new();
        launchers.insert(LaunchKind::Process, process_launcher);
        launchers.insert(LaunchKind::Container, container_launcher);

        Self {
            options,
            launchers,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Launch an instance of `tool` listening on `port`.
    ///
    /// Returns once the launch call succeeded and the instance survived the
    /// settle window; readiness is left to the health monitor.
    pub async fn start(
        &self,
        deployment_id: &str,
        tool: &Tool,
        port: u16,
    ) -> Result<ProcessRef, EngineError> {
        let kind = tool.launch_config.kind();
        let launcher = self.launchers.get(&kind).cloned().ok_or_else(|| {
            EngineError::StartFailure(format!("No launcher for {:?} tools", kind))
        })?;

        let request = LaunchRequest {
            deployment_id: deployment_id.to_string(),
            tool: tool.clone(),
            port,
        };

        info!(
            "Starting {} ({:?}) for deployment {} on port {}",
            tool.slug, kind, deployment_id, port
        );

        let instance =
            match tokio::time::timeout(self.options.start_timeout, launcher.launch(&request)).await
            {
                Ok(Ok(instance)) => instance,
                Ok(Err(EngineError::StartFailure(e))) => return Err(EngineError::StartFailure(e)),
                Ok(Err(e)) => return Err(EngineError::StartFailure(e.to_string())),
                Err(_) => {
                    return Err(EngineError::StartFailure(format!(
                        "Launch timed out after {:?}",
                        self.options.start_timeout
                    )))
                }
            };

        if !self.options.settle.is_zero() {
            tokio::time::sleep(self.options.settle).await;
        }
        if !instance.is_alive().await {
            let _ = instance.terminate(Duration::ZERO).await;
            return Err(EngineError::StartFailure(format!(
                "{} exited immediately after launch",
                tool.slug
            )));
        }

        let process_ref = instance.process_ref();
        let handle = Arc::new(ProcessHandle {
            deployment_id: deployment_id.to_string(),
            port,
            instance,
        });

        let previous = self
            .handles
            .lock()
            .await
            .insert(deployment_id.to_string(), handle);
        if let Some(previous) = previous {
            warn!(
                "Deployment {} already had a live handle on port {}, terminating it",
                deployment_id,
                previous.port()
            );
            let _ = previous.instance.terminate(self.options.stop_grace).await;
        }

        debug!("Deployment {} started as {:?}", deployment_id, process_ref);
        Ok(process_ref)
    }

    /// Liveness of the instance held for `deployment_id`. Unknown ids are dead.
    pub async fn is_alive(&self, deployment_id: &str) -> bool {
        let handle = self.handles.lock().await.get(deployment_id).cloned();
        match handle {
            Some(handle) => handle.instance.is_alive().await,
            None => false,
        }
    }

    /// Whether a handle is held for `deployment_id`
    pub async fn has_handle(&self, deployment_id: &str) -> bool {
        self.handles.lock().await.contains_key(deployment_id)
    }

    /// Stop the instance held for `deployment_id` and release its handle.
    /// Idempotent: stopping an unknown or dead instance succeeds.
    ///
    /// The handle is kept when termination fails, so the instance stays
    /// supervised and the stop can be retried.
    pub async fn stop(&self, deployment_id: &str, grace: Duration) -> Result<(), EngineError> {
        let handle = self.handles.lock().await.remove(deployment_id);
        let Some(handle) = handle else {
            debug!("No live handle for deployment {}, nothing to stop", deployment_id);
            return Ok(());
        };

        info!(
            "Stopping deployment {} (port {}, grace {:?})",
            handle.deployment_id(),
            handle.port(),
            grace
        );
        if let Err(e) = handle.instance.terminate(grace).await {
            warn!(
                "Deployment {} did not terminate, keeping its handle: {}",
                deployment_id, e
            );
            self.handles
                .lock()
                .await
                .entry(deployment_id.to_string())
                .or_insert(handle);
            return Err(e);
        }
        Ok(())
    }

    /// Terminate an instance left behind by a previous engine run
    pub async fn terminate_orphan(
        &self,
        process_ref: &ProcessRef,
        grace: Duration,
    ) -> Result<(), EngineError> {
        let kind = process_ref.launch_kind();
        let launcher = self.launchers.get(&kind).cloned().ok_or_else(|| {
            EngineError::Internal(format!("No launcher for {:?} instances", kind))
        })?;
        launcher.terminate_orphan(process_ref, grace).await
    }

    /// Stop every instance still held
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<_> = self.handles.lock().await.drain().collect();
        if handles.is_empty() {
            return;
        }

        info!("Stopping {} supervised instances...", handles.len());
        let stops = handles.into_iter().map(|(id, handle)| async move {
            if let Err(e) = handle.instance.terminate(grace).await {
                warn!("Failed to stop deployment {}: {}", id, e);
            }
        });
        futures::future::join_all(stops).await;
    }
}
