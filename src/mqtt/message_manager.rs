//! Inbound message decoding and console rendering.
//!
//! The device answers on two topics with small JSON objects. Anything that is
//! not a JSON object is shown as plain text, which is how the firmware's
//! free-form diagnostics end up on the console.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use tracing::debug;

use super::config::Topics;

const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// A publish received from the broker, stamped with local receive time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.clock(), self.topic, self.text())
    }
}

impl InboundMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::received_at(topic, payload, chrono::Local::now().naive_local())
    }

    pub fn received_at(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        timestamp: NaiveDateTime,
    ) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            timestamp,
        }
    }

    /// Payload as text; invalid UTF-8 sequences are replaced rather than rejected.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Receive time as `HH:MM:SS`
    pub fn clock(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Report published by the firmware after every LED change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedStatusReport {
    #[serde(default = "unknown", deserialize_with = "text_or_unknown")]
    pub led_state: String,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub message: String,
}

impl Default for LedStatusReport {
    fn default() -> Self {
        Self {
            led_state: unknown(),
            message: String::new(),
        }
    }
}

/// Periodic and on-demand device health report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceStatusReport {
    #[serde(default = "unknown", deserialize_with = "text_or_unknown")]
    pub device_id: String,
    #[serde(default = "unknown", deserialize_with = "text_or_unknown")]
    pub ip: String,
    /// Seconds since boot
    #[serde(default, deserialize_with = "count_or_zero")]
    pub uptime: u64,
    /// Free heap in bytes
    #[serde(default, rename = "heap", deserialize_with = "count_or_zero")]
    pub free_heap: u64,
    #[serde(default, deserialize_with = "flag_or_false")]
    pub led_state: bool,
    #[serde(default, deserialize_with = "flag_or_false")]
    pub mqtt_connected: bool,
}

impl Default for DeviceStatusReport {
    fn default() -> Self {
        Self {
            device_id: unknown(),
            ip: unknown(),
            uptime: 0,
            free_heap: 0,
            led_state: false,
            mqtt_connected: false,
        }
    }
}

fn unknown() -> String {
    "unknown".to_string()
}

// Report fields never fail a decode: a null or mistyped value falls back to
// the field's default. The firmware sends `led_state` as a bool on the LED
// topic, so text fields keep the JSON spelling of any other scalar.
fn text_or<'de, D>(deserializer: D, fallback: fn() -> String) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => fallback(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

fn text_or_unknown<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    text_or(deserializer, unknown)
}

fn text_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    text_or(deserializer, String::new)
}

// Fractional values are truncated, negative ones are treated as missing.
fn count_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or_default(),
        _ => 0,
    })
}

fn flag_or_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    LedStatus(LedStatusReport),
    DeviceStatus(DeviceStatusReport),
    PlainText,
}

/// Maps inbound messages to their console representation by topic.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    topics: Topics,
}

impl MessageRouter {
    pub fn new(topics: Topics) -> Self {
        Self { topics }
    }

    pub fn decode(&self, msg: &InboundMessage) -> DecodedMessage {
        let object = match serde_json::from_slice::<Value>(&msg.payload) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                debug!("Payload on {} is JSON but not an object", msg.topic);
                return DecodedMessage::PlainText;
            }
            Err(e) => {
                debug!("Payload on {} is not JSON: {}", msg.topic, e);
                return DecodedMessage::PlainText;
            }
        };

        let decoded = if msg.topic == self.topics.led_status {
            serde_json::from_value(Value::Object(object)).map(DecodedMessage::LedStatus)
        } else if msg.topic == self.topics.device_status {
            serde_json::from_value(Value::Object(object)).map(DecodedMessage::DeviceStatus)
        } else {
            Ok(DecodedMessage::PlainText)
        };

        decoded.unwrap_or_else(|e| {
            debug!("Report on {} could not be decoded: {}", msg.topic, e);
            DecodedMessage::PlainText
        })
    }

    pub fn render(&self, msg: &InboundMessage) -> String {
        match self.decode(msg) {
            DecodedMessage::LedStatus(report) => format!(
                "[{}] LED Status: {} ({})",
                msg.clock(),
                report.led_state,
                report.message
            ),
            DecodedMessage::DeviceStatus(report) => [
                format!("[{}] Device Status:", msg.clock()),
                format!("   Device ID: {}", report.device_id),
                format!("   IP Address: {}", report.ip),
                format!("   Uptime: {}s", report.uptime),
                format!("   Free Heap: {} bytes", report.free_heap),
                format!("   LED State: {}", report.led_state),
                format!("   MQTT Connected: {}", report.mqtt_connected),
            ]
            .join("\n"),
            DecodedMessage::PlainText => msg.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at_noon(topic: &str, payload: &str) -> InboundMessage {
        let timestamp = NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 34, 56))
            .unwrap();
        InboundMessage::received_at(topic, payload, timestamp)
    }

    fn router() -> MessageRouter {
        MessageRouter::new(Topics::default())
    }

    #[test]
    fn device_status_block_shows_all_fields() {
        let msg = at_noon(
            "esp32/device/status",
            r#"{"device_id":"esp32-1","ip":"10.0.0.5","uptime":120,"heap":50000,"led_state":true,"mqtt_connected":true}"#,
        );

        assert_eq!(
            router().render(&msg),
            "[12:34:56] Device Status:\n   Device ID: esp32-1\n   IP Address: 10.0.0.5\n   \
             Uptime: 120s\n   Free Heap: 50000 bytes\n   LED State: true\n   MQTT Connected: true"
        );
    }

    #[test]
    fn device_status_decodes_exact_values() {
        let msg = at_noon(
            "esp32/device/status",
            r#"{"device":"ESP32","device_id":"lab","ip":"192.168.1.7","ssid":"bench","rssi":-61,
                "uptime":86400,"heap":123456,"led_state":false,"mqtt_connected":true,"api_version":"1.0"}"#,
        );

        assert_eq!(
            router().decode(&msg),
            DecodedMessage::DeviceStatus(DeviceStatusReport {
                device_id: "lab".to_string(),
                ip: "192.168.1.7".to_string(),
                uptime: 86400,
                free_heap: 123456,
                led_state: false,
                mqtt_connected: true,
            })
        );
    }

    #[test]
    fn device_status_missing_fields_use_defaults() {
        let msg = at_noon("esp32/device/status", r#"{"uptime": 5}"#);

        assert_eq!(
            router().decode(&msg),
            DecodedMessage::DeviceStatus(DeviceStatusReport {
                uptime: 5,
                ..DeviceStatusReport::default()
            })
        );

        let empty = at_noon("esp32/device/status", "{}");
        let rendered = router().render(&empty);
        assert!(rendered.contains("Device ID: unknown"));
        assert!(rendered.contains("IP Address: unknown"));
        assert!(rendered.contains("Uptime: 0s"));
        assert!(rendered.contains("Free Heap: 0 bytes"));
        assert!(rendered.contains("LED State: false"));
        assert!(rendered.contains("MQTT Connected: false"));
    }

    #[test]
    fn led_status_line() {
        let msg = at_noon(
            "esp32/led/status",
            r#"{"success":true,"message":"LED turned on","led_state":true,"device_id":"esp32-1"}"#,
        );
        assert_eq!(
            router().render(&msg),
            "[12:34:56] LED Status: true (LED turned on)"
        );

        let text_state = at_noon("esp32/led/status", r#"{"led_state":"on"}"#);
        assert_eq!(router().render(&text_state), "[12:34:56] LED Status: on ()");

        let empty = at_noon("esp32/led/status", "{}");
        assert_eq!(
            router().decode(&empty),
            DecodedMessage::LedStatus(LedStatusReport::default())
        );
        assert_eq!(router().render(&empty), "[12:34:56] LED Status: unknown ()");
    }

    #[test]
    fn non_json_payload_is_printed_verbatim() {
        for payload in ["ESP32 online", "  padded text ", "{broken", "status", ""] {
            let msg = at_noon("esp32/led/status", payload);
            assert_eq!(router().decode(&msg), DecodedMessage::PlainText);
            assert_eq!(
                router().render(&msg),
                format!("[12:34:56] esp32/led/status: {}", payload)
            );
        }
    }

    #[test]
    fn non_object_json_falls_back_to_text() {
        for payload in ["42", "true", r#""hello""#, r#"["esp32-1","10.0.0.5",1,2,true,true]"#] {
            let msg = at_noon("esp32/device/status", payload);
            assert_eq!(router().decode(&msg), DecodedMessage::PlainText);
            assert_eq!(
                router().render(&msg),
                format!("[12:34:56] esp32/device/status: {}", payload)
            );
        }
    }

    #[test]
    fn mistyped_fields_take_defaults() {
        let msg = at_noon(
            "esp32/device/status",
            r#"{"device_id":"esp32-1","ip":null,"uptime":120.5,"heap":null,"led_state":1,"mqtt_connected":true}"#,
        );
        assert_eq!(
            router().render(&msg),
            "[12:34:56] Device Status:\n   Device ID: esp32-1\n   IP Address: unknown\n   \
             Uptime: 120s\n   Free Heap: 0 bytes\n   LED State: false\n   MQTT Connected: true"
        );

        let msg = at_noon("esp32/device/status", r#"{"uptime":"long","heap":-1,"device_id":7}"#);
        assert_eq!(
            router().decode(&msg),
            DecodedMessage::DeviceStatus(DeviceStatusReport {
                device_id: "7".to_string(),
                ..DeviceStatusReport::default()
            })
        );

        let led = at_noon("esp32/led/status", r#"{"led_state":null,"message":false}"#);
        assert_eq!(router().render(&led), "[12:34:56] LED Status: unknown (false)");
    }

    #[test]
    fn json_on_other_topic_is_plain_text() {
        let msg = at_noon("esp32/other", r#"{"led_state":true}"#);
        assert_eq!(router().decode(&msg), DecodedMessage::PlainText);
        assert_eq!(
            router().render(&msg),
            r#"[12:34:56] esp32/other: {"led_state":true}"#
        );
    }
}
