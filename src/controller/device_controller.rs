use tracing::{debug, error, info, warn};

use crate::mqtt::config::MqttConfig;
use crate::mqtt::message_manager::{InboundMessage, MessageRouter};
use crate::mqtt::mqtt_handler::{
    ConnectOutcome, ConnectionState, DisconnectReason, SessionError, SessionEvents, SessionState,
    Transport,
};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Not connected to MQTT broker")]
    NotConnected,

    #[error("Publish rejected: {0}")]
    Rejected(#[from] SessionError),
}

/// Payload understood by the firmware's LED handler.
pub fn led_payload(on: bool) -> String {
    format!("{{\"state\": {}}}", on)
}

/// Owns the connection state and turns operator actions into publishes.
///
/// The event loop drives it through [`SessionEvents`]; the command loop calls
/// the publishing methods. The two only meet in [`SessionState`].
pub struct DeviceController<T: Transport> {
    config: MqttConfig,
    transport: T,
    state: SessionState,
    router: MessageRouter,
}

impl<T: Transport> DeviceController<T> {
    pub fn new(config: MqttConfig, transport: T) -> Self {
        let router = MessageRouter::new(config.topics.clone());
        Self {
            config,
            transport,
            state: SessionState::default(),
            router,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn control_led(&self, on: bool) -> Result<(), CommandError> {
        self.publish(&self.config.topics.led_control, led_payload(on))
    }

    pub fn request_status(&self) -> Result<(), CommandError> {
        self.publish(&self.config.topics.device_command, "status")
    }

    pub fn restart_device(&self) -> Result<(), CommandError> {
        self.publish(&self.config.topics.device_command, "restart")
    }

    fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), CommandError> {
        if !self.is_connected() {
            warn!("Dropping publish to {}: not connected", topic);
            return Err(CommandError::NotConnected);
        }
        self.transport.publish(topic, payload.into()).map_err(|e| {
            error!("Publish to {} failed: {}", topic, e);
            CommandError::from(e)
        })
    }
}

impl<T: Transport + 'static> DeviceController<T> {
    /// Reports the end of a caller-initiated shutdown. A connection that was
    /// already lost has been reported by the event loop.
    pub fn report_shutdown(&self) {
        if self.is_connected() {
            self.on_disconnect(DisconnectReason::Requested);
        } else {
            debug!("Shutdown after connection was already closed");
        }
    }
}

impl<T: Transport + 'static> SessionEvents for DeviceController<T> {
    fn on_connect(&self, outcome: ConnectOutcome) {
        match &outcome {
            ConnectOutcome::Accepted => {
                println!("Connected to MQTT broker: {}", self.config.broker_address());
                println!("Subscribing to ESP32 topics...");
                for topic in self.config.topics.subscriptions() {
                    match self.transport.subscribe(topic) {
                        Ok(()) => println!("   - {}", topic),
                        Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
                    }
                }
                self.state.set(ConnectionState::Connected);
            }
            ConnectOutcome::Refused(code) => {
                let rc = outcome.return_code().unwrap_or_default();
                println!("Failed to connect, return code {}", rc);
                warn!("Broker refused connection: {:?}", code);
                self.state.set(ConnectionState::Failed);
            }
            ConnectOutcome::Unreachable(reason) => {
                println!("Connection error: {}", reason);
                self.state.set(ConnectionState::Failed);
            }
        }
    }

    fn on_message(&self, msg: InboundMessage) {
        println!("{}", self.router.render(&msg));
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        self.state.set(ConnectionState::Disconnected);
        match reason {
            DisconnectReason::Unexpected(cause) => {
                println!("Unexpected MQTT disconnection: {}", cause);
                if self.config.reconnect.enabled {
                    println!(
                        "Attempting to reconnect in {}ms...",
                        self.config.reconnect.delay_ms
                    );
                }
            }
            DisconnectReason::Requested => {
                info!("Closed connection to {}", self.config.broker_address());
                println!("Disconnected from MQTT broker");
            }
        }
    }
}
