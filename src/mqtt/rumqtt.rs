use bytes::Bytes;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS,
};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::{
    BrokerClient, ConnectionHandle, ConnectionState, Connector, InboundMessage, MqttError,
    SessionKind, INBOUND_CAPACITY, MAX_PACKET_BYTES,
};
use crate::config::MqttSettings;

const CLIENT_ID_PREFIX: &str = "http_to_mqtt";
const REQUEST_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Connector backed by rumqttc's async client.
///
/// Each session gets its own event loop task. Publisher sessions keep polling
/// (and therefore reconnecting) after transport errors; subscription sessions
/// end on the first one.
#[derive(Clone, Copy, Debug, Default)]
pub struct RumqttcConnector;

impl Connector for RumqttcConnector {
    fn connect(
        &self,
        settings: &MqttSettings,
        kind: SessionKind,
    ) -> Result<ConnectionHandle, MqttError> {
        let client_id = client_id_for(settings.client_id.as_deref(), kind);
        let endpoint = &settings.endpoint;

        let options = mqtt_options(settings, client_id.clone());
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (msg_tx, msg_rx) = mpsc::channel(INBOUND_CAPACITY);

        log::info!(
            "Connecting {} session {} to MQTT broker {} (auth: {})",
            kind,
            client_id,
            endpoint,
            !settings.username.is_empty()
        );
        tokio::spawn(drive_event_loop(eventloop, state_tx, msg_tx, kind, client_id));

        Ok(ConnectionHandle::new(client, state_rx, msg_rx))
    }
}

fn mqtt_options(settings: &MqttSettings, client_id: String) -> MqttOptions {
    let endpoint = &settings.endpoint;
    let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_credentials(settings.username.clone(), settings.password.clone());
    options.set_transport(endpoint.transport());
    // rumqttc defaults to 10 KiB, far below uploads and streamed snapshots.
    options.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
    options
}

impl BrokerClient for AsyncClient {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        self.try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(request_error)
    }

    fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.try_subscribe(topic, QoS::AtMostOnce)
            .map_err(request_error)
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.try_disconnect().map_err(request_error)
    }
}

fn request_error(err: ClientError) -> MqttError {
    MqttError::Request(err.to_string())
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    state: watch::Sender<ConnectionState>,
    messages: mpsc::Sender<InboundMessage>,
    kind: SessionKind,
    client_id: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                log::info!("MQTT session {} connected", client_id);
                state.send_replace(ConnectionState::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if messages.send(message).await.is_err() {
                    log::debug!("MQTT session {} has no message listener", client_id);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::debug!("MQTT session {} disconnecting", client_id);
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                log::debug!("MQTT session {} handle dropped", client_id);
                break;
            }
            Err(ConnectionError::ConnectionRefused(code)) => {
                log::error!("MQTT broker refused session {}: {:?}", client_id, code);
                if kind == SessionKind::Subscription {
                    break;
                }
                state.send_replace(ConnectionState::Connecting);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            Err(err) => match kind {
                SessionKind::Publisher => {
                    log::warn!(
                        "MQTT connection error on {}: {}. Reconnecting...",
                        client_id,
                        err
                    );
                    state.send_replace(ConnectionState::Connecting);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                SessionKind::Subscription => {
                    log::warn!("MQTT connection error on {}: {}", client_id, err);
                    break;
                }
            },
        }
    }
    state.send_replace(ConnectionState::Closed);
    log::info!("MQTT session {} closed", client_id);
}

fn client_id_for(configured: Option<&str>, kind: SessionKind) -> String {
    let suffix = || format!("{:08x}", rand::random::<u32>());
    match configured.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) if kind == SessionKind::Publisher => id.to_string(),
        Some(id) => format!("{}_sub_{}", id, suffix()),
        None => format!("{}_{}", CLIENT_ID_PREFIX, suffix()),
    }
}
