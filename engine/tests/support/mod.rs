//! Shared test fixtures: an in-process tool launcher and engine harness

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use toolhost::catalog::InMemoryCatalog;
use toolhost::deploy::ports::PortAllocator;
use toolhost::deploy::store::InMemoryStore;
use toolhost::deploy::supervisor::{
    Instance, LaunchRequest, Launcher, ProcessSupervisor, SupervisorOptions,
};
use toolhost::deploy::{DeploymentEngine, DeploymentRegistry, EngineOptions};
use toolhost::errors::EngineError;
use toolhost::http::HttpClient;
use toolhost::models::deployment::ProcessRef;
use toolhost::models::tool::{LaunchConfig, Tool};
use toolhost::workers::health;

/// Ports handed to tests, kept disjoint across tests of one binary
static NEXT_PORT: AtomicU16 = AtomicU16::new(43100);

pub fn port_range(size: u16) -> (u16, u16) {
    let start = NEXT_PORT.fetch_add(size, Ordering::SeqCst);
    (start, start + size - 1)
}

pub fn tool(id: &str, slug: &str) -> Tool {
    Tool {
        id: id.to_string(),
        slug: slug.to_string(),
        name: slug.to_string(),
        launch_config: LaunchConfig::Process {
            command: "in-process".to_string(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
        },
        health_path: "/health".to_string(),
    }
}

// ============================== FAKE TOOL SERVICE ================================ //

struct ServiceState {
    port: u16,
    health: Arc<AtomicU16>,
}

async fn health_handler(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    let code = state.health.load(Ordering::SeqCst);
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn slow_handler() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(3)).await;
    "late"
}

/// Echo the request back as JSON
async fn echo_handler(State(state): State<Arc<ServiceState>>, request: Request) -> impl IntoResponse {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    (
        StatusCode::OK,
        [("x-served-by", state.port.to_string())],
        Json(json!({
            "port": state.port,
            "method": parts.method.to_string(),
            "path": parts.uri.path(),
            "query": parts.uri.query(),
            "x_custom": header("x-custom"),
            "x_user_id": header("x-user-id"),
            "x_drop": header("x-drop"),
            "body": String::from_utf8_lossy(&body),
        })),
    )
}

/// Control over one launched in-process instance
pub struct Control {
    pub port: u16,
    pub health: Arc<AtomicU16>,
    alive: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Control {
    /// Simulate a crash: the listener goes away without a stop request
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

struct InProcessInstance {
    control: Arc<Control>,
    refuse_termination: Arc<AtomicBool>,
}

#[async_trait]
impl Instance for InProcessInstance {
    fn process_ref(&self) -> ProcessRef {
        ProcessRef::InProcess {
            label: format!("in-process:{}", self.control.port),
        }
    }

    async fn is_alive(&self) -> bool {
        self.control.is_alive()
    }

    async fn terminate(&self, grace: Duration) -> Result<(), EngineError> {
        if self.refuse_termination.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("kill failed".to_string()));
        }
        self.control.alive.store(false, Ordering::SeqCst);
        if let Some(tx) = self.control.stop_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let task = self.control.task.lock().unwrap().take();
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                abort.abort();
            }
        }
        Ok(())
    }
}

/// Launches an axum server inside the test process on the assigned port
#[derive(Default)]
pub struct InProcessLauncher {
    controls: Mutex<HashMap<String, Arc<Control>>>,
    launches: AtomicUsize,
    failures_left: AtomicUsize,
    initial_health: AtomicU16,
    launch_delay_ms: AtomicU64,
    refuse_termination: Arc<AtomicBool>,
    refuse_orphan_termination: AtomicBool,
    orphans_terminated: AtomicUsize,
}

impl InProcessLauncher {
    pub fn new() -> Self {
        Self {
            initial_health: AtomicU16::new(200),
            ..Default::default()
        }
    }

    /// Make the next `n` launches fail
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Health status answered by instances launched from now on
    pub fn set_initial_health(&self, code: u16) {
        self.initial_health.store(code, Ordering::SeqCst);
    }

    /// Delay every launch from now on
    pub fn set_launch_delay(&self, delay: Duration) {
        self.launch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every instance, launched or not yet launched, refuse to terminate
    pub fn refuse_termination(&self, refuse: bool) {
        self.refuse_termination.store(refuse, Ordering::SeqCst);
    }

    /// Make orphan termination fail
    pub fn refuse_orphan_termination(&self, refuse: bool) {
        self.refuse_orphan_termination.store(refuse, Ordering::SeqCst);
    }

    pub fn orphans_terminated(&self) -> usize {
        self.orphans_terminated.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Control of the latest instance launched for a deployment
    pub fn control(&self, deployment_id: &str) -> Arc<Control> {
        self.controls
            .lock()
            .unwrap()
            .get(deployment_id)
            .cloned()
            .expect("deployment was never launched")
    }
}

#[async_trait]
impl Launcher for InProcessLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn Instance>, EngineError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::StartFailure("launch refused".to_string()));
        }

        let delay = self.launch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let listener = TcpListener::bind(("127.0.0.1", request.port))
            .await
            .map_err(|e| EngineError::StartFailure(format!("bind {}: {}", request.port, e)))?;

        let health = Arc::new(AtomicU16::new(self.initial_health.load(Ordering::SeqCst)));
        let state = Arc::new(ServiceState {
            port: request.port,
            health: health.clone(),
        });
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/slow", get(slow_handler))
            .fallback(echo_handler)
            .with_state(state);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await;
        });

        let control = Arc::new(Control {
            port: request.port,
            health,
            alive: Arc::new(AtomicBool::new(true)),
            task: Mutex::new(Some(task)),
            stop_tx: Mutex::new(Some(stop_tx)),
        });
        self.controls
            .lock()
            .unwrap()
            .insert(request.deployment_id.clone(), control.clone());

        Ok(Box::new(InProcessInstance {
            control,
            refuse_termination: self.refuse_termination.clone(),
        }))
    }

    async fn terminate_orphan(
        &self,
        _process: &ProcessRef,
        _grace: Duration,
    ) -> Result<(), EngineError> {
        if self.refuse_orphan_termination.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("orphan survived".to_string()));
        }
        self.orphans_terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ================================= HARNESS ====================================== //

pub struct Harness {
    pub engine: Arc<DeploymentEngine>,
    pub launcher: Arc<InProcessLauncher>,
    pub catalog: Arc<InMemoryCatalog>,
    pub store: Arc<InMemoryStore>,
    pub client: HttpClient,
    pub health: health::Options,
}

impl Harness {
    pub fn new(max_restarts: u32) -> Self {
        Self::with_store(max_restarts, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(max_restarts: u32, store: Arc<InMemoryStore>) -> Self {
        let launcher = Arc::new(InProcessLauncher::new());
        let catalog = Arc::new(
            InMemoryCatalog::with_tools(vec![
                tool("t-weather", "weather-tool"),
                tool("t-search", "search-tool"),
            ])
            .unwrap(),
        );
        let (start, end) = port_range(20);

        let supervisor = Arc::new(ProcessSupervisor::with_launchers(
            supervisor_options(),
            launcher.clone(),
            launcher.clone(),
        ));
        let engine = Arc::new(DeploymentEngine::new(
            EngineOptions {
                max_restarts,
                stop_grace: Duration::from_secs(1),
                ..Default::default()
            },
            Arc::new(DeploymentRegistry::new(store.clone())),
            Arc::new(PortAllocator::new(start, end).unwrap()),
            supervisor,
            catalog.clone(),
        ));

        Self {
            engine,
            launcher,
            catalog,
            store,
            client: HttpClient::new().unwrap(),
            health: health_options(),
        }
    }

    /// One health monitor pass
    pub async fn pass(&self) -> health::PassSummary {
        health::run_pass(&self.health, &self.engine, &self.client).await
    }
}

pub fn supervisor_options() -> SupervisorOptions {
    SupervisorOptions {
        start_timeout: Duration::from_secs(5),
        stop_grace: Duration::from_secs(1),
        settle: Duration::from_millis(10),
    }
}

pub fn health_options() -> health::Options {
    health::Options {
        interval: Duration::from_millis(50),
        initial_delay: Duration::ZERO,
        probe_timeout: Duration::from_secs(2),
        unhealthy_threshold: 3,
        startup_timeout: Duration::from_secs(60),
    }
}
