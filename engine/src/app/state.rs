//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::app::options::AppOptions;
use crate::catalog::{InMemoryCatalog, ToolCatalog};
use crate::deploy::ports::PortAllocator;
use crate::deploy::store::{DeploymentStore, JsonFileStore};
use crate::deploy::supervisor::ProcessSupervisor;
use crate::deploy::{DeploymentEngine, DeploymentRegistry};
use crate::errors::EngineError;
use crate::http::client::HttpClient;
use crate::models::usage::UsageRecord;
use crate::routing::RequestRouter;
use crate::workers::usage::{JsonLinesSink, UsageRecorder, UsageSink};

/// Main application state
pub struct AppState {
    /// Deploy / stop / restart coordination
    pub engine: Arc<DeploymentEngine>,

    /// Routes tool traffic to running deployments
    pub router: Arc<RequestRouter>,

    /// HTTP client for probes and forwarding
    pub http_client: HttpClient,

    /// Destination of usage records
    pub usage_sink: Arc<dyn UsageSink>,
}

impl AppState {
    /// Initialize application state from the data directory.
    ///
    /// Returns the receiving end of the usage queue for the usage worker.
    pub async fn init(
        options: &AppOptions,
    ) -> Result<(Self, mpsc::Receiver<UsageRecord>), EngineError> {
        info!("Initializing application state...");

        let layout = &options.layout;
        layout.setup().await?;

        let store = Arc::new(JsonFileStore::new(layout.deployments_dir()));
        let supervisor = Arc::new(ProcessSupervisor::new(
            options.supervisor.clone(),
            Some(layout.instance_logs_dir()),
        ));
        let catalog = Arc::new(InMemoryCatalog::load_file(&layout.tools_file()).await?);
        let usage_sink = Arc::new(JsonLinesSink::new(layout.usage_file()));

        Self::assemble(options, store, supervisor, catalog, usage_sink).await
    }

    /// Wire the engine together from explicit collaborators, reload
    /// persisted deployments and reconcile those left active.
    pub async fn assemble(
        options: &AppOptions,
        store: Arc<dyn DeploymentStore>,
        supervisor: Arc<ProcessSupervisor>,
        catalog: Arc<dyn ToolCatalog>,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Result<(Self, mpsc::Receiver<UsageRecord>), EngineError> {
        let registry = Arc::new(DeploymentRegistry::new(store));
        registry.load().await?;

        let ports = Arc::new(PortAllocator::new(options.ports.start, options.ports.end)?);
        let engine = Arc::new(DeploymentEngine::new(
            options.engine.clone(),
            registry.clone(),
            ports,
            supervisor,
            catalog.clone(),
        ));
        engine.recover().await?;

        let http_client = HttpClient::new()?;
        let (recorder, usage_rx) = UsageRecorder::channel(options.usage_channel_capacity);
        let router = Arc::new(RequestRouter::new(
            options.router.clone(),
            catalog,
            registry,
            http_client.clone(),
            recorder,
        ));

        let state = Self {
            engine,
            router,
            http_client,
            usage_sink,
        };
        Ok((state, usage_rx))
    }

    /// Shutdown application state: stop every supervised instance
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        info!("Shutting down application state...");
        self.engine
            .supervisor()
            .shutdown(self.engine.options().stop_grace)
            .await;
        Ok(())
    }
}
