//! Application configuration: built-in defaults, an optional TOML file and
//! environment overrides, applied in that order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};

use crate::mqtt::config::MqttConfig;

const CONFIG_DIR: &str = "esp32-mqtt-client";
const CONFIG_FILE: &str = "config.toml";

pub const ENV_CONFIG_PATH: &str = "ESP32_MQTT_CONFIG";
pub const ENV_BROKER: &str = "ESP32_MQTT_BROKER";
pub const ENV_PORT: &str = "ESP32_MQTT_PORT";
pub const ENV_KEEPALIVE: &str = "ESP32_MQTT_KEEPALIVE";
pub const ENV_CLIENT_ID: &str = "ESP32_MQTT_CLIENT_ID";

// rumqttc rejects keepalive intervals below this
const MIN_KEEPALIVE_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {key}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    /// Maximum tracing level written to stderr
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the configuration for this process.
    ///
    /// The file is taken from `$ESP32_MQTT_CONFIG` when set, otherwise from
    /// the user config directory. A missing file means defaults.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) => Self::from_file(&path).await?,
            None => {
                warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        if !exists {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Applies `ESP32_MQTT_*` overrides; `lookup` resolves a variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(broker) = lookup(ENV_BROKER) {
            self.mqtt.broker = broker;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.mqtt.port = parse_override(ENV_PORT, port)?;
        }
        if let Some(keepalive) = lookup(ENV_KEEPALIVE) {
            self.mqtt.keepalive_secs = parse_override(ENV_KEEPALIVE, keepalive)?;
        }
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.mqtt.client_id = client_id;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mqtt = &self.mqtt;
        if mqtt.broker.trim().is_empty() {
            return Err(ConfigError::Invalid("broker must not be empty".to_string()));
        }
        if mqtt.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".to_string()));
        }
        // MqttOptions::new panics on these
        if mqtt.client_id.is_empty() || mqtt.client_id.starts_with(' ') {
            return Err(ConfigError::Invalid(
                "client_id must not be empty or start with a space".to_string(),
            ));
        }
        if mqtt.keepalive_secs < MIN_KEEPALIVE_SECS {
            return Err(ConfigError::Invalid(format!(
                "keepalive_secs must be at least {}",
                MIN_KEEPALIVE_SECS
            )));
        }
        if mqtt.request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "request_capacity must not be 0".to_string(),
            ));
        }
        for topic in mqtt.topics.all() {
            if topic.is_empty() || topic.contains(&['+', '#'][..]) {
                return Err(ConfigError::Invalid(format!(
                    "topic {:?} must be a non-empty name without wildcards",
                    topic
                )));
            }
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log_level {:?}", self.log_level)))
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride { key, value })
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    })
}
