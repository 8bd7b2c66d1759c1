//! MQTT connection handles.
//!
//! A [`ConnectionHandle`] represents one live session to the broker. The bridge
//! keeps exactly one long-lived handle for publishing and opens a dedicated
//! handle for every streaming subscription, so inbound messages never cross
//! between subscribers.
//!
//! Handles are produced by a [`Connector`]. The production connector is
//! [`RumqttcConnector`]; the trait exists so the HTTP layer can run against
//! other broker clients.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::config::MqttSettings;

mod rumqtt;

pub use rumqtt::RumqttcConnector;

/// Capacity of the inbound message queue of a single session.
pub const INBOUND_CAPACITY: usize = 256;

/// Largest message payload carried in either direction.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Packet size limit of every session: the payload plus fixed header, the
/// longest possible topic and a packet id.
pub const MAX_PACKET_BYTES: usize = MAX_PAYLOAD_BYTES + 5 + 2 + u16::MAX as usize + 2;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("MQTT request rejected: {0}")]
    Request(String),

    #[error("MQTT connection failed: {0}")]
    Connection(String),

    #[error("MQTT connection closed")]
    Closed,

    #[error("inbound messages already taken from this connection")]
    MessagesTaken,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Closed,
}

/// What a session is used for. Decides reconnect behaviour and client id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    /// The shared, process-lifetime publisher. Reconnects on transport errors.
    Publisher,
    /// A per-request subscription. Closed on the first transport error.
    Subscription,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publisher => write!(f, "publisher"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// A message delivered by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Client side of a broker session.
///
/// Every call only enqueues a request for the session's event loop; none of
/// them wait for the broker.
pub trait BrokerClient: Send + Sync {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError>;
    fn subscribe(&self, topic: &str) -> Result<(), MqttError>;
    fn disconnect(&self) -> Result<(), MqttError>;
}

/// Opens broker sessions.
pub trait Connector: Send + Sync {
    /// Starts a new session. Must be called from within a tokio runtime.
    ///
    /// The returned handle starts in [`ConnectionState::Connecting`]; use
    /// [`ConnectionHandle::wait_connected`] to wait for the broker.
    fn connect(
        &self,
        settings: &MqttSettings,
        kind: SessionKind,
    ) -> Result<ConnectionHandle, MqttError>;
}

/// One live session to the broker. Closed when dropped.
pub struct ConnectionHandle {
    client: Box<dyn BrokerClient>,
    state: watch::Receiver<ConnectionState>,
    messages: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    subscriptions: Mutex<BTreeSet<String>>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    /// Assembles a handle from a broker client, the state published by the
    /// session's event loop and the queue of inbound messages.
    pub fn new(
        client: impl BrokerClient + 'static,
        state: watch::Receiver<ConnectionState>,
        messages: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        Self {
            client: Box::new(client),
            state,
            messages: Mutex::new(Some(messages)),
            subscriptions: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            return ConnectionState::Closed;
        }
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits until the broker acknowledged the session.
    pub async fn wait_connected(&self) -> Result<(), MqttError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state)
            .map_err(|_| MqttError::Connection("session ended before connecting".to_string()))?;
        match reached {
            ConnectionState::Connected if !self.is_closed() => Ok(()),
            _ => Err(MqttError::Connection(
                "session closed before connecting".to_string(),
            )),
        }
    }

    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), MqttError> {
        if self.is_closed() {
            return Err(MqttError::Closed);
        }
        self.client.publish(topic, payload.into())
    }

    pub fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        if self.is_closed() {
            return Err(MqttError::Closed);
        }
        self.client.subscribe(topic)?;
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(topic.to_string());
        Ok(())
    }

    /// Topics subscribed through this handle.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Takes the receiver of inbound messages, in broker delivery order.
    ///
    /// The receiver ends when the session ends. It can be taken once.
    pub fn messages(&self) -> Result<mpsc::Receiver<InboundMessage>, MqttError> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(MqttError::MessagesTaken)
    }

    /// Closes the session. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.client.disconnect() {
            log::debug!("MQTT disconnect request not delivered: {}", err);
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.state())
            .field("subscriptions", &self.subscriptions())
            .finish()
    }
}
