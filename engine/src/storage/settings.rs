//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to a daily file under the data directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Data directory; the platform default when absent
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Host used in deployment endpoint URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub ports: PortSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub usage: UsageSettings,
}

fn default_public_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            data_dir: None,
            public_host: default_public_host(),
            server: ServerSettings::default(),
            ports: PortSettings::default(),
            health: HealthSettings::default(),
            supervisor: SupervisorSettings::default(),
            router: RouterSettings::default(),
            usage: UsageSettings::default(),
        }
    }
}

impl Settings {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ports.start == 0 || self.ports.start > self.ports.end {
            return Err(EngineError::ConfigError(format!(
                "invalid port range {}-{}",
                self.ports.start, self.ports.end
            )));
        }
        if (self.ports.start..=self.ports.end).contains(&self.server.port) {
            return Err(EngineError::ConfigError(format!(
                "server port {} lies inside the deployment port range",
                self.server.port
            )));
        }
        if self.health.interval_secs == 0 {
            return Err(EngineError::ConfigError(
                "health.interval_secs must be positive".to_string(),
            ));
        }
        if self.health.probe_timeout_secs == 0 || self.router.timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.health.unhealthy_threshold == 0 {
            return Err(EngineError::ConfigError(
                "health.unhealthy_threshold must be positive".to_string(),
            ));
        }
        if self.usage.channel_capacity == 0 {
            return Err(EngineError::ConfigError(
                "usage.channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read settings from `file`. A missing file yields the defaults.
pub async fn load_settings(file: &File) -> Result<Settings, EngineError> {
    if !file.exists().await {
        info!(
            "Settings file {} not found, using defaults",
            file.path().display()
        );
        return Ok(Settings::default());
    }

    file.read_json().await.map_err(|e| {
        EngineError::ConfigError(format!("{}: {}", file.path().display(), e))
    })
}

/// Engine API listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Port range handed out to deployments (inclusive)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    #[serde(default = "default_port_start")]
    pub start: u16,

    #[serde(default = "default_port_end")]
    pub end: u16,
}

fn default_port_start() -> u16 {
    8100
}

fn default_port_end() -> u16 {
    8999
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Consecutive UNHEALTHY passes before a restart
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
}

fn default_health_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_max_restarts() -> u32 {
    3
}

fn default_startup_timeout() -> u64 {
    120
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            probe_timeout_secs: default_probe_timeout(),
            unhealthy_threshold: default_unhealthy_threshold(),
            max_restarts: default_max_restarts(),
            startup_timeout_secs: default_startup_timeout(),
        }
    }
}

/// Process supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// How long a fresh instance must survive before launch is reported
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
}

fn default_start_timeout() -> u64 {
    30
}

fn default_stop_grace() -> u64 {
    10
}

fn default_settle_millis() -> u64 {
    200
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout(),
            stop_grace_secs: default_stop_grace(),
            settle_millis: default_settle_millis(),
        }
    }
}

/// Request router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_router_timeout")]
    pub timeout_secs: u64,
}

fn default_router_timeout() -> u64 {
    30
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_router_timeout(),
        }
    }
}

/// Usage recorder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSettings {
    #[serde(default = "default_usage_capacity")]
    pub channel_capacity: usize,
}

fn default_usage_capacity() -> usize {
    1024
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_usage_capacity(),
        }
    }
}
