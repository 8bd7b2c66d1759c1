#![allow(dead_code)]

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};

use http_mqtt_bridge::mqtt::INBOUND_CAPACITY;
use http_mqtt_bridge::{
    AppState, BridgeConfig, BrokerClient, ConfigLayer, ConnectionHandle, ConnectionState,
    Connector, InboundMessage, MqttError, MqttSettings, SessionKind,
};

/// In-process broker. Every session receives every message on the bus so
/// topic filtering on the bridge side is exercised.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    bus: broadcast::Sender<InboundMessage>,
    published: Mutex<Vec<InboundMessage>>,
    sessions: Mutex<Vec<Arc<SessionRecord>>>,
    fail_publishes: AtomicBool,
    refuse_connections: AtomicBool,
}

pub struct SessionRecord {
    pub kind: SessionKind,
    closed: watch::Sender<bool>,
    subscriptions: Mutex<Vec<String>>,
}

impl SessionRecord {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }
}

struct MemoryClient {
    broker: Arc<BrokerInner>,
    record: Arc<SessionRecord>,
}

impl BrokerClient for MemoryClient {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        if self.broker.fail_publishes.load(Ordering::SeqCst) {
            return Err(MqttError::Request("broker unavailable".to_string()));
        }
        let message = InboundMessage {
            topic: topic.to_string(),
            payload,
        };
        self.broker.published.lock().unwrap().push(message.clone());
        let _ = self.broker.bus.send(message);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.record
            .subscriptions
            .lock()
            .unwrap()
            .push(topic.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.record.closed.send_replace(true);
        Ok(())
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(BrokerInner {
                bus,
                published: Mutex::new(Vec::new()),
                sessions: Mutex::new(Vec::new()),
                fail_publishes: AtomicBool::new(false),
                refuse_connections: AtomicBool::new(false),
            }),
        }
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.inner.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Subscription sessions opened from now on are refused by the broker.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Delivers a message as if another client had published it.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        let _ = self.inner.bus.send(InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
        });
    }

    /// Messages published through bridge sessions.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.inner
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|message| (message.topic.clone(), message.payload.to_vec()))
            .collect()
    }

    pub fn sessions(&self) -> Vec<Arc<SessionRecord>> {
        self.inner.sessions.lock().unwrap().clone()
    }

    pub fn subscription_sessions(&self) -> Vec<Arc<SessionRecord>> {
        self.sessions()
            .into_iter()
            .filter(|record| record.kind == SessionKind::Subscription)
            .collect()
    }
}

impl Connector for MemoryBroker {
    fn connect(
        &self,
        _settings: &MqttSettings,
        kind: SessionKind,
    ) -> Result<ConnectionHandle, MqttError> {
        let refused = kind == SessionKind::Subscription
            && self.inner.refuse_connections.load(Ordering::SeqCst);
        let (closed, _) = watch::channel(refused);
        let record = Arc::new(SessionRecord {
            kind,
            closed,
            subscriptions: Mutex::new(Vec::new()),
        });
        self.inner.sessions.lock().unwrap().push(record.clone());

        let initial = if refused {
            ConnectionState::Closed
        } else {
            ConnectionState::Connected
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let (msg_tx, msg_rx) = mpsc::channel(INBOUND_CAPACITY);

        if !refused {
            let mut bus = self.inner.bus.subscribe();
            let mut closed = record.closed.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        message = bus.recv() => match message {
                            Ok(message) => {
                                if msg_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        _ = session_closed(&mut closed) => break,
                    }
                }
                state_tx.send_replace(ConnectionState::Closed);
            });
        }

        let client = MemoryClient {
            broker: self.inner.clone(),
            record,
        };
        Ok(ConnectionHandle::new(client, state_rx, msg_rx))
    }
}

async fn session_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

pub fn test_config(secret: &str) -> BridgeConfig {
    BridgeConfig::from_layer(ConfigLayer {
        mqtt_url: Some("mqtt://localhost".to_string()),
        secret: Some(secret.to_string()),
        ..ConfigLayer::default()
    })
    .unwrap()
}

/// App state wired to `broker`, with its publisher session already open.
pub fn test_state(broker: &MemoryBroker, secret: &str) -> AppState {
    let config = test_config(secret);
    let publisher = broker
        .connect(&config.mqtt, SessionKind::Publisher)
        .unwrap();
    AppState::new(Arc::new(config), Arc::new(publisher), Arc::new(broker.clone()))
}
