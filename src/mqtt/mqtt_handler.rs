use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{MqttConfig, ReconnectPolicy};
use super::message_manager::InboundMessage;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Failed,
}

/// Result of a connection attempt, as reported to [`SessionEvents::on_connect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accepted,
    /// The broker answered with a non-success CONNACK
    Refused(ConnectReturnCode),
    /// No CONNACK at all: DNS, TCP or protocol failure
    Unreachable(String),
}

impl ConnectOutcome {
    /// Numeric CONNACK return code, `0` meaning accepted.
    pub fn return_code(&self) -> Option<u8> {
        match self {
            ConnectOutcome::Accepted => Some(0),
            ConnectOutcome::Refused(code) => Some(match code {
                ConnectReturnCode::Success => 0,
                ConnectReturnCode::RefusedProtocolVersion => 1,
                ConnectReturnCode::BadClientId => 2,
                ConnectReturnCode::ServiceUnavailable => 3,
                ConnectReturnCode::BadUserNamePassword => 4,
                ConnectReturnCode::NotAuthorized => 5,
            }),
            ConnectOutcome::Unreachable(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Caller-initiated close during shutdown
    Requested,
    Unexpected(String),
}

/// Callbacks driven by the session's event loop task.
///
/// Implementations run on the event loop task, concurrently with whoever
/// publishes through the [`Transport`], and must not block.
pub trait SessionEvents: Send + Sync + 'static {
    fn on_connect(&self, outcome: ConnectOutcome);
    fn on_message(&self, msg: InboundMessage);
    fn on_disconnect(&self, reason: DisconnectReason);
}

/// Outbound half of the session. Requests are queued without waiting for
/// the broker; an `Err` means the request was never accepted.
pub trait Transport: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), SessionError>;
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Client request rejected: {0}")]
    Client(#[from] ClientError),

    #[error("Event loop already started")]
    AlreadyStarted,
}

/// Connection state shared between the event loop callbacks (the only
/// writer) and the command loop.
#[derive(Debug)]
pub struct SessionState {
    state: watch::Sender<ConnectionState>,
}

impl Default for SessionState {
    fn default() -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self { state }
    }
}

impl SessionState {
    pub fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current() == ConnectionState::Connected
    }

    pub fn set(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    /// Waits until the first connection attempt has either succeeded or
    /// failed. Returns `None` on timeout.
    pub async fn wait_settled(&self, timeout: Duration) -> Option<ConnectionState> {
        let mut rx = self.state.subscribe();
        let settled = async move {
            rx.wait_for(|state| *state != ConnectionState::Disconnected)
                .await
                .map(|state| *state)
        };
        tokio::time::timeout(timeout, settled).await.ok()?.ok()
    }
}

/// Publishing handle onto the session's client.
#[derive(Clone, Debug)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl Transport for MqttTransport {
    fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        self.client.try_subscribe(topic, QoS::AtMostOnce)?;
        debug!("Queued subscribe for {}", topic);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError> {
        let len = payload.len();
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)?;
        debug!("Queued publish to {} ({} bytes)", topic, len);
        Ok(())
    }
}

/// Owns the MQTT client and its event loop task.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    cancel: CancellationToken,
    event_loop_handle: Option<JoinHandle<()>>,
    reconnect: ReconnectPolicy,
    shutdown_timeout: Duration,
}

impl MqttSession {
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        mqtt_options
            .set_keep_alive(config.keepalive())
            .set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.request_capacity);

        MqttSession {
            client,
            eventloop: Some(eventloop),
            cancel: CancellationToken::new(),
            event_loop_handle: None,
            reconnect: config.reconnect.clone(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    pub fn transport(&self) -> MqttTransport {
        MqttTransport {
            client: self.client.clone(),
        }
    }

    /// Spawns the event loop. The connection is opened by the loop's first
    /// poll; its outcome arrives through `events.on_connect`.
    pub fn start<E: SessionEvents>(&mut self, events: Arc<E>) -> Result<(), SessionError> {
        let eventloop = self.eventloop.take().ok_or(SessionError::AlreadyStarted)?;
        info!("Starting MQTT event loop");
        self.event_loop_handle = Some(tokio::spawn(run_event_loop(
            eventloop,
            events,
            self.cancel.clone(),
            self.reconnect.clone(),
        )));
        Ok(())
    }

    /// Stops callback delivery, sends DISCONNECT and waits for the event
    /// loop to flush it.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop finished"),
                Ok(Err(e)) => warn!("Event loop task failed: {}", e),
                Err(_) => {
                    warn!(
                        "Event loop did not finish within {:?}, aborting",
                        self.shutdown_timeout
                    );
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            error!("MqttSession dropped without shutdown(), aborting event loop");
            self.cancel.cancel();
            handle.abort();
        }
    }
}

fn connect_outcome(err: ConnectionError) -> ConnectOutcome {
    match err {
        ConnectionError::ConnectionRefused(code) => ConnectOutcome::Refused(code),
        other => ConnectOutcome::Unreachable(other.to_string()),
    }
}

async fn run_event_loop<E: SessionEvents>(
    mut eventloop: EventLoop,
    events: Arc<E>,
    cancel: CancellationToken,
    reconnect: ReconnectPolicy,
) {
    let mut connected = false;
    let mut draining = false;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled(), if !draining => {
                // Teardown has begun: keep polling only to flush DISCONNECT.
                draining = true;
                continue;
            }
            event = eventloop.poll() => event,
        };

        if draining {
            match event {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT flushed");
                    break;
                }
                Err(e) => {
                    debug!("Event loop closed during teardown: {}", e);
                    break;
                }
                Ok(_) => continue,
            }
        }

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("Broker accepted connection (session present: {})", ack.session_present);
                connected = true;
                events.on_connect(ConnectOutcome::Accepted);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received {} bytes on {}",
                    publish.payload.len(),
                    publish.topic
                );
                events.on_message(InboundMessage::from_topic(
                    publish.topic,
                    publish.payload.to_vec(),
                ));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                // Not sent by MQTT 3.1.1 brokers; treat it as a drop.
                connected = false;
                events.on_disconnect(DisconnectReason::Unexpected(
                    "broker sent DISCONNECT".to_string(),
                ));
                if !reconnect.enabled {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent outside teardown");
                break;
            }
            Ok(other) => debug!("MQTT event: {:?}", other),
            Err(e) => {
                if connected {
                    connected = false;
                    warn!("Connection lost: {}", e);
                    events.on_disconnect(DisconnectReason::Unexpected(e.to_string()));
                } else {
                    warn!("Connection attempt failed: {}", e);
                    events.on_connect(connect_outcome(e));
                }

                if !reconnect.enabled {
                    break;
                }

                debug!("Reconnecting in {:?}", reconnect.delay());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect.delay()) => {}
                }
            }
        }
    }

    info!("MQTT event loop stopped");
}
