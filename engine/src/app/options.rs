//! Application configuration options

use std::time::Duration;

use crate::deploy::supervisor::SupervisorOptions;
use crate::deploy::EngineOptions;
use crate::errors::EngineError;
use crate::routing::RouterOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::{health, usage};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployment port range
    pub ports: PortOptions,

    /// Deploy / stop / restart coordination
    pub engine: EngineOptions,

    /// Process supervisor options
    pub supervisor: SupervisorOptions,

    /// Enable the health monitor worker
    pub enable_health_monitor: bool,

    /// Health monitor options
    pub health_monitor: health::Options,

    /// Request router options
    pub router: RouterOptions,

    /// Usage worker options
    pub usage_worker: usage::Options,

    /// Capacity of the usage record queue
    pub usage_channel_capacity: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            server: ServerOptions::default(),
            ports: PortOptions::default(),
            engine: EngineOptions::default(),
            supervisor: SupervisorOptions::default(),
            enable_health_monitor: true,
            health_monitor: health::Options::default(),
            router: RouterOptions::default(),
            usage_worker: usage::Options::default(),
            usage_channel_capacity: 1024,
        }
    }
}

impl AppOptions {
    /// Derive runtime options from validated settings
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Result<Self, EngineError> {
        settings.validate()?;

        let stop_grace = Duration::from_secs(settings.supervisor.stop_grace_secs);
        let defaults = Self::default();

        Ok(Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: defaults
                    .lifecycle
                    .max_shutdown_delay
                    .max(stop_grace * 2),
            },
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            ports: PortOptions {
                start: settings.ports.start,
                end: settings.ports.end,
            },
            engine: EngineOptions {
                public_host: settings.public_host.clone(),
                max_restarts: settings.health.max_restarts,
                stop_grace,
            },
            supervisor: SupervisorOptions {
                start_timeout: Duration::from_secs(settings.supervisor.start_timeout_secs),
                stop_grace,
                settle: Duration::from_millis(settings.supervisor.settle_millis),
            },
            enable_health_monitor: true,
            health_monitor: health::Options {
                interval: Duration::from_secs(settings.health.interval_secs),
                probe_timeout: Duration::from_secs(settings.health.probe_timeout_secs),
                unhealthy_threshold: settings.health.unhealthy_threshold,
                startup_timeout: Duration::from_secs(settings.health.startup_timeout_secs),
                ..defaults.health_monitor
            },
            router: RouterOptions {
                timeout: Duration::from_secs(settings.router.timeout_secs),
                ..defaults.router
            },
            usage_worker: defaults.usage_worker,
            usage_channel_capacity: settings.usage.channel_capacity,
        })
    }
}

/// Lifecycle options for the engine
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Engine HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Inclusive port range handed out to deployments
#[derive(Debug, Clone, Copy)]
pub struct PortOptions {
    pub start: u16,
    pub end: u16,
}

impl Default for PortOptions {
    fn default() -> Self {
        Self {
            start: 8100,
            end: 8999,
        }
    }
}
