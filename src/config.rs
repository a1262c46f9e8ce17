//! Configuration module
//!
//! TOML file, by default at `~/.config/ocpp-runtime/config.toml`
//! (`OCPP_CONFIG` overrides the path). Every field has a default, so an
//! empty or partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoints::{CentralSystemConfig, ChargePointConfig};
use crate::interfaces::ws::{Backoff, ClientConfig, Liveness, ServerConfig, OCPP16};
use crate::support::errors::ConfigError;

pub const CONFIG_ENV_VAR: &str = "OCPP_CONFIG";

/// `~/.config/ocpp-runtime/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-runtime")
        .join("config.toml")
}

/// `OCPP_CONFIG` when set, else [`default_config_path`].
pub fn config_path_from_env() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub client: ClientSection,
    pub logging: LoggingSection,
    pub metrics: MetricsSection,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.queue_capacity == 0 || self.client.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.server.request_timeout_secs == 0 || self.client.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be at least 1".into()));
        }
        if !self.server.subprotocols.iter().any(|p| p == OCPP16) {
            return Err(ConfigError::Invalid(format!(
                "server.subprotocols must include {}",
                OCPP16
            )));
        }
        if self.server.heartbeat_interval_secs == 0 || self.server.heartbeat_interval_secs > i32::MAX as u32 {
            return Err(ConfigError::Invalid("heartbeat_interval_secs out of range".into()));
        }
        if self.client.multiplier < 1.0 || !(0.0..=1.0).contains(&self.client.jitter) {
            return Err(ConfigError::Invalid(
                "client backoff needs multiplier >= 1 and jitter within 0..=1".into(),
            ));
        }
        Ok(())
    }

    pub fn central_system(&self) -> CentralSystemConfig {
        let server = &self.server;
        CentralSystemConfig {
            server: ServerConfig {
                listen_addr: server.address(),
                base_path: server.base_path.clone(),
                subprotocols: server.subprotocols.clone(),
                liveness: Liveness {
                    ping_interval: Duration::from_secs(server.ping_interval_secs),
                    max_missed_pongs: server.max_missed_pongs,
                },
                tls: None,
            },
            request_timeout: Duration::from_secs(server.request_timeout_secs),
            queue_capacity: server.queue_capacity,
            ..CentralSystemConfig::default()
        }
    }

    pub fn charge_point(&self, client_id: impl Into<String>) -> ChargePointConfig {
        let client = &self.client;
        ChargePointConfig {
            request_timeout: Duration::from_secs(client.request_timeout_secs),
            queue_capacity: client.queue_capacity,
            client: ClientConfig {
                liveness: Liveness {
                    ping_interval: Duration::from_secs(client.ping_interval_secs),
                    max_missed_pongs: client.max_missed_pongs,
                },
                backoff: Backoff {
                    initial_delay: Duration::from_millis(client.initial_delay_ms),
                    max_delay: Duration::from_millis(client.max_delay_ms),
                    multiplier: client.multiplier,
                    jitter: client.jitter,
                },
                ..ClientConfig::default()
            },
            ..ChargePointConfig::new(client_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub subprotocols: Vec<String>,
    /// Interval handed to charge points in BootNotification responses.
    pub heartbeat_interval_secs: u32,
    pub ping_interval_secs: u64,
    pub max_missed_pongs: u32,
    pub request_timeout_secs: u64,
    pub queue_capacity: usize,
    pub shutdown_timeout_secs: u64,
}

impl ServerSection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8887,
            base_path: String::new(),
            subprotocols: vec![OCPP16.to_string()],
            heartbeat_interval_secs: 300,
            ping_interval_secs: 30,
            max_missed_pongs: 2,
            request_timeout_secs: 30,
            queue_capacity: 64,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub ping_interval_secs: u64,
    pub max_missed_pongs: u32,
    pub request_timeout_secs: u64,
    pub queue_capacity: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            max_missed_pongs: 2,
            request_timeout_secs: 30,
            queue_capacity: 1,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9100".to_string(),
        }
    }
}
