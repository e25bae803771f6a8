//! # MQTT Integration Module
//!
//! Wraps the broker connection used to talk to the ESP32. The protocol work
//! (handshake, keepalive, packet encoding) is done by `rumqttc`; this module
//! adapts it to the two seams the rest of the client uses:
//!
//! - [`mqtt_handler::SessionEvents`]: connect / message / disconnect callbacks
//!   invoked from the event loop task
//! - [`mqtt_handler::Transport`]: non-blocking subscribe and publish
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker parameters and the device topic set
//! ├── message_manager.rs  - Inbound message decoding and console rendering
//! └── mqtt_handler.rs     - Session lifecycle and event loop
//! ```
//!
//! ## Threading
//!
//! The event loop runs on its own tokio task and is the only writer of the
//! connection state. Publishes come from the command loop and are queued on
//! the client without waiting for the broker.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
