//! Service configuration
//!
//! Layered with figment: built-in defaults, then the YAML file, then
//! `STATIONSRV_*` environment variables (`__` separates nested keys, e.g.
//! `STATIONSRV_MQTT__HOST`).

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config/stationsrv.yaml";
const ENV_PREFIX: &str = "STATIONSRV_";

/// HTTP/websocket listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub bind_address: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "stationsrv".to_string(),
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic root for the fleet, `<namespace>/devices/<serial>/...`
    pub namespace: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Capacity of the client request queue
    pub request_capacity: usize,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "stationsrv".to_string(),
            namespace: "pi".to_string(),
            keep_alive_secs: 30,
            username: None,
            password: None,
            request_capacity: 10,
            reconnect_min_secs: 1,
            reconnect_max_secs: 120,
        }
    }
}

/// Circuit breaker thresholds for one dependency
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl BreakerSettings {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    /// Guards state reconciler calls
    pub storage: BreakerSettings,
    /// Guards broker publishes
    pub broker: BreakerSettings,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            storage: BreakerSettings {
                failure_threshold: 3,
                recovery_timeout_secs: 30,
            },
            broker: BreakerSettings {
                failure_threshold: 5,
                recovery_timeout_secs: 60,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Rolling file output directory, console only when unset
    pub dir: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub mqtt: MqttConfig,
    pub breakers: BreakersConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from the default path; a missing file falls back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` if it exists, then apply environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if path.exists() {
            figment = figment.merge(Yaml::file(path));
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load from a file that must exist
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BridgeError::config(format!(
                "Config file {} not found",
                path.display()
            )));
        }

        Self::extract(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.host.is_empty() {
            return Err(BridgeError::config("mqtt.host must not be empty"));
        }
        if self.mqtt.port == 0 {
            return Err(BridgeError::config("mqtt.port must be greater than 0"));
        }
        if self.mqtt.namespace.is_empty() || self.mqtt.namespace.contains(['+', '#']) {
            return Err(BridgeError::config(
                "mqtt.namespace must be a non-empty topic level without wildcards",
            ));
        }
        if self.mqtt.reconnect_min_secs == 0
            || self.mqtt.reconnect_min_secs > self.mqtt.reconnect_max_secs
        {
            return Err(BridgeError::config(
                "mqtt.reconnect_min_secs must be in 1..=reconnect_max_secs",
            ));
        }
        for (name, breaker) in [
            ("storage", &self.breakers.storage),
            ("broker", &self.breakers.broker),
        ] {
            if breaker.failure_threshold == 0 {
                return Err(BridgeError::config(format!(
                    "breakers.{name}.failure_threshold must be greater than 0"
                )));
            }
        }
        if self.service.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(BridgeError::config(format!(
                "service.bind_address '{}' is not a socket address",
                self.service.bind_address
            )));
        }

        Ok(())
    }
}
