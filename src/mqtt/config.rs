use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BROKER: &str = "broker.hivemq.com";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;

/// Topics shared with the ESP32 firmware.
///
/// These strings are the wire contract with the device and are never
/// rewritten at runtime; they only live in the config so a test bench can
/// point the client at a differently prefixed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Publish target, payload `{"state": <bool>}`
    pub led_control: String,
    /// Subscribed, LED state change reports
    pub led_status: String,
    /// Subscribed, full device status reports
    pub device_status: String,
    /// Publish target, bare `status` / `restart` text
    pub device_command: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            led_control: "esp32/led/control".to_string(),
            led_status: "esp32/led/status".to_string(),
            device_status: "esp32/device/status".to_string(),
            device_command: "esp32/device/command".to_string(),
        }
    }
}

impl Topics {
    /// Topics the client subscribes to once the broker accepts the connection.
    pub fn subscriptions(&self) -> [&str; 2] {
        [self.led_status.as_str(), self.device_status.as_str()]
    }

    pub fn all(&self) -> [&str; 4] {
        [
            self.led_control.as_str(),
            self.led_status.as_str(),
            self.device_status.as_str(),
            self.device_command.as_str(),
        ]
    }
}

/// Behaviour of the event loop after the broker connection drops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay_ms: u64,
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub keepalive_secs: u64,
    pub client_id: String,
    /// How long startup waits for the broker's connect acknowledgment
    pub connect_timeout_ms: u64,
    /// How long shutdown waits for the event loop to flush the disconnect
    pub shutdown_timeout_ms: u64,
    /// Capacity of the client's outgoing request queue
    pub request_capacity: usize,
    pub reconnect: ReconnectPolicy,
    pub topics: Topics,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER.to_string(),
            port: DEFAULT_PORT,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            client_id: default_client_id(),
            connect_timeout_ms: 2000,
            shutdown_timeout_ms: 1000,
            request_capacity: 10,
            reconnect: ReconnectPolicy::default(),
            topics: Topics::default(),
        }
    }
}

impl MqttConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// `host:port` as shown on the console
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

// Public brokers kick the older session when two clients share an id.
fn default_client_id() -> String {
    format!("esp32-test-client-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics_match_firmware() {
        let topics = Topics::default();
        assert_eq!(topics.led_control, "esp32/led/control");
        assert_eq!(topics.led_status, "esp32/led/status");
        assert_eq!(topics.device_status, "esp32/device/status");
        assert_eq!(topics.device_command, "esp32/device/command");
        assert_eq!(
            topics.subscriptions(),
            ["esp32/led/status", "esp32/device/status"]
        );
    }

    #[test]
    fn default_connection_parameters() {
        let config = MqttConfig::default();
        assert_eq!(config.broker_address(), "broker.hivemq.com:1883");
        assert_eq!(config.keepalive(), Duration::from_secs(60));
        assert!(config.client_id.starts_with("esp32-test-client-"));
        assert!(!config.reconnect.enabled);
    }
}
