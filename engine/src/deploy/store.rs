//! Durable storage for deployment records

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::Deployment;

/// Persistence backend for the deployment registry
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Persist the full record, replacing any previous version
    async fn save(&self, deployment: &Deployment) -> Result<(), EngineError>;

    /// Read every persisted record
    async fn load_all(&self) -> Result<Vec<Deployment>, EngineError>;
}

/// One JSON file per deployment, written atomically
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: Dir,
}

impl JsonFileStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Dir {
        &self.dir
    }
}

#[async_trait]
impl DeploymentStore for JsonFileStore {
    async fn save(&self, deployment: &Deployment) -> Result<(), EngineError> {
        let file = self.dir.file(&format!("{}.json", deployment.id));
        let contents = serde_json::to_vec_pretty(deployment)?;
        file.write_atomic(&contents).await
    }

    async fn load_all(&self) -> Result<Vec<Deployment>, EngineError> {
        let mut deployments = Vec::new();
        for path in self.dir.files_with_extension("json").await? {
            let file = crate::filesys::file::File::new(&path);
            match file.read_json::<Deployment>().await {
                Ok(deployment) => deployments.push(deployment),
                Err(e) => warn!("Skipping unreadable deployment record {}: {}", path.display(), e),
            }
        }
        Ok(deployments)
    }
}

/// Volatile store for tests and ephemeral engines
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, Deployment>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeploymentStore for InMemoryStore {
    async fn save(&self, deployment: &Deployment) -> Result<(), EngineError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Deployment>, EngineError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.values().cloned().collect())
    }
}
