//! Deployment registry
//!
//! Durable, in-memory indexed record of every deployment. Each record has:
//! - a write lock serializing mutate-then-persist, so the persisted order of
//!   writes matches the order in which they became visible;
//! - a lifecycle lock held by whoever drives the deployment through a
//!   lifecycle operation (deploy, stop, health evaluation, restart).
//!
//! Snapshot reads never wait on either lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::deploy::fsm::{DeploymentStatus, HealthStatus};
use crate::deploy::store::DeploymentStore;
use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentFilter, ProcessRef};
use crate::utils::generate_uuid;

/// Proof that the caller holds a deployment's lifecycle lock
pub struct LifecycleGuard {
    deployment_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl LifecycleGuard {
    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }
}

struct Slot {
    record: RwLock<Deployment>,
    write: Mutex<()>,
    lifecycle: Arc<Mutex<()>>,
}

impl Slot {
    fn new(deployment: Deployment) -> Self {
        Self {
            record: RwLock::new(deployment),
            write: Mutex::new(()),
            lifecycle: Arc::new(Mutex::new(())),
        }
    }

    fn snapshot(&self) -> Deployment {
        self.record.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Deployment registry
pub struct DeploymentRegistry {
    store: Arc<dyn DeploymentStore>,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl DeploymentRegistry {
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self {
            store,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Load persisted records. Returns the number of records loaded.
    pub async fn load(&self) -> Result<usize, EngineError> {
        let deployments = self.store.load_all().await?;
        let count = deployments.len();

        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        for deployment in deployments {
            slots.insert(deployment.id.clone(), Arc::new(Slot::new(deployment)));
        }

        info!("Loaded {} deployment records", count);
        Ok(count)
    }

    /// Persist a new STARTING record for `tool_id` on `port`.
    ///
    /// The record's lifecycle lock is taken before the record becomes
    /// visible, so no other lifecycle operation can interleave with the
    /// launch that follows.
    pub async fn create(
        &self,
        tool_id: &str,
        port: u16,
        endpoint_url: String,
    ) -> Result<(Deployment, LifecycleGuard), EngineError> {
        let deployment = Deployment::new(generate_uuid(), tool_id.to_string(), port, endpoint_url);
        self.store.save(&deployment).await?;

        let slot = Arc::new(Slot::new(deployment.clone()));
        let guard = slot
            .lifecycle
            .clone()
            .try_lock_owned()
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(deployment.id.clone(), slot);

        debug!("Created deployment {} for tool {}", deployment.id, tool_id);
        Ok((
            deployment.clone(),
            LifecycleGuard {
                deployment_id: deployment.id,
                _guard: guard,
            },
        ))
    }

    /// Current snapshot of a deployment
    pub fn get(&self, id: &str) -> Result<Deployment, EngineError> {
        Ok(self.slot(id)?.snapshot())
    }

    /// Snapshots matching `filter`, most recently deployed first
    pub fn list(&self, filter: &DeploymentFilter) -> Vec<Deployment> {
        let slots: Vec<_> = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut deployments: Vec<_> = slots
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|d| filter.matches(d))
            .collect();
        deployments.sort_by(|a, b| b.deployed_at.cmp(&a.deployed_at));
        deployments
    }

    /// Wait for the lifecycle lock of a deployment
    pub async fn lock(&self, id: &str) -> Result<LifecycleGuard, EngineError> {
        let lifecycle = self.slot(id)?.lifecycle.clone();
        Ok(LifecycleGuard {
            deployment_id: id.to_string(),
            _guard: lifecycle.lock_owned().await,
        })
    }

    /// Take the lifecycle lock if nobody holds it
    pub fn try_lock(&self, id: &str) -> Option<LifecycleGuard> {
        let lifecycle = self.slot(id).ok()?.lifecycle.clone();
        lifecycle.try_lock_owned().ok().map(|guard| LifecycleGuard {
            deployment_id: id.to_string(),
            _guard: guard,
        })
    }

    /// Transition `status`, validated against the state machine.
    ///
    /// Entering STOPPED or FAILED clears the port, endpoint and process
    /// locator in the same write.
    pub async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            d.status = d
                .status
                .transition(status)
                .map_err(|e| EngineError::InvalidTransition(format!("deployment {}: {}", d.id, e)))?;

            match status {
                DeploymentStatus::Stopped | DeploymentStatus::Failed => {
                    d.port = None;
                    d.endpoint_url = None;
                    d.process = None;
                    if status == DeploymentStatus::Stopped {
                        d.stopped_at = Some(Utc::now());
                    }
                }
                DeploymentStatus::Running | DeploymentStatus::Starting => {}
            }
            if reason.is_some() {
                d.last_error = reason;
            }
            Ok(())
        })
        .await
    }

    /// Record a health observation.
    ///
    /// Ignored for deployments that are no longer STARTING or RUNNING, so a
    /// late probe result cannot touch a terminal record.
    pub async fn update_health(
        &self,
        id: &str,
        health: HealthStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            if !d.is_active() {
                return Ok(());
            }
            d.health_status = health;
            d.last_health_check_at = Some(checked_at);
            match health {
                HealthStatus::Healthy => d.consecutive_unhealthy = 0,
                HealthStatus::Unhealthy => d.consecutive_unhealthy += 1,
                HealthStatus::Unknown => {}
            }
            Ok(())
        })
        .await
    }

    /// Promote a ready STARTING deployment to RUNNING / HEALTHY
    pub async fn mark_running(
        &self,
        id: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            d.status = d
                .status
                .transition(DeploymentStatus::Running)
                .map_err(|e| EngineError::InvalidTransition(format!("deployment {}: {}", d.id, e)))?;
            d.health_status = HealthStatus::Healthy;
            d.last_health_check_at = Some(checked_at);
            d.consecutive_unhealthy = 0;
            Ok(())
        })
        .await
    }

    /// Terminal write for a user stop. Idempotent.
    ///
    /// STARTING/RUNNING become STOPPED. A FAILED deployment keeps its
    /// status but is flagged so it is never restarted again.
    pub async fn mark_stopped(&self, id: &str) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            d.stop_requested = true;
            match d.status {
                DeploymentStatus::Stopped => {}
                DeploymentStatus::Failed => {
                    d.stopped_at.get_or_insert_with(Utc::now);
                }
                DeploymentStatus::Starting | DeploymentStatus::Running => {
                    d.status = DeploymentStatus::Stopped;
                    d.port = None;
                    d.endpoint_url = None;
                    d.process = None;
                    d.stopped_at = Some(Utc::now());
                }
            }
            Ok(())
        })
        .await
    }

    /// Flag a deployment so no automatic restart follows. Written before
    /// its instance is terminated.
    pub async fn request_stop(&self, id: &str) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            d.stop_requested = true;
            Ok(())
        })
        .await
    }

    /// FAILED -> STARTING on a new port, consuming one unit of restart budget
    pub async fn begin_restart(
        &self,
        id: &str,
        port: u16,
        endpoint_url: String,
    ) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            if d.stop_requested {
                return Err(EngineError::InvalidTransition(format!(
                    "deployment {} was stopped by user",
                    d.id
                )));
            }
            d.status = d
                .status
                .transition(DeploymentStatus::Starting)
                .map_err(|e| EngineError::InvalidTransition(format!("deployment {}: {}", d.id, e)))?;
            d.restart_count += 1;
            d.port = Some(port);
            d.endpoint_url = Some(endpoint_url);
            d.health_status = HealthStatus::Unknown;
            d.consecutive_unhealthy = 0;
            d.started_at = Some(Utc::now());
            Ok(())
        })
        .await
    }

    /// Attach the process locator of a freshly launched instance
    pub async fn set_process(
        &self,
        id: &str,
        process: ProcessRef,
    ) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            d.process = Some(process);
            Ok(())
        })
        .await
    }

    /// Record a failure reason without changing status
    pub async fn set_error(&self, id: &str, reason: String) -> Result<Deployment, EngineError> {
        self.update(id, |d| {
            d.last_error = Some(reason);
            Ok(())
        })
        .await
    }

    /// Apply `f` to a copy of the record, persist the copy, then publish it
    async fn update<F>(&self, id: &str, f: F) -> Result<Deployment, EngineError>
    where
        F: FnOnce(&mut Deployment) -> Result<(), EngineError>,
    {
        let slot = self.slot(id)?;
        let _write = slot.write.lock().await;

        let current = slot.snapshot();
        let mut next = current.clone();
        f(&mut next)?;
        if next == current {
            return Ok(next);
        }

        self.store.save(&next).await?;
        *slot.record.write().unwrap_or_else(|e| e.into_inner()) = next.clone();
        Ok(next)
    }

    fn slot(&self, id: &str) -> Result<Arc<Slot>, EngineError> {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("deployment {}", id)))
    }
}
