//! http_to_mqtt
//!
//! A small bridge between HTTP clients and an MQTT broker.
//!
//! # Architecture
//!
//! - One long-lived publisher session serves every publish request.
//! - Every streaming subscription owns a dedicated broker session that lives
//!   exactly as long as its HTTP response.
//! - Access is guarded by an optional shared secret presented as `key`.
//!
//! # Module Structure
//!
//! - `config`: layered settings (flags, settings file, environment, defaults)
//! - `transport`: broker URL parsing
//! - `mqtt`: broker sessions behind the `Connector` seam
//! - `api`: HTTP routes, request normalization and streaming
//! - `error`: request errors and their HTTP status mapping

pub mod api;
pub mod config;
pub mod error;
pub mod mqtt;
pub mod transport;

pub use api::{router, AppState, BridgeHandle, BridgeServer};
pub use config::{BridgeConfig, ConfigLayer, KeepAliveSettings, MqttSettings};
pub use error::BridgeError;
pub use mqtt::{
    BrokerClient, ConnectionHandle, ConnectionState, Connector, InboundMessage, MqttError,
    RumqttcConnector, SessionKind,
};
pub use transport::{parse_mqtt_endpoint, MqttEndpoint};
