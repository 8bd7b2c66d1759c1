//! Transport layer helpers for the MQTT side of the bridge.
//!
//! Parses configured broker URLs into endpoints and selects the rumqttc
//! transport (plain TCP or rustls TLS) for them.

mod endpoint;

pub use endpoint::{parse_mqtt_endpoint, MqttEndpoint, DEFAULT_MQTTS_PORT, DEFAULT_MQTT_PORT};
