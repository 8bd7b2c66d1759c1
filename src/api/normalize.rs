//! Derives the outbound MQTT message of a publish request.
//!
//! Precedence:
//! 1. `?path=<field>` selects the body field (or uploaded file) used as payload
//! 2. otherwise the body's `message` field
//! 3. `?topic=` overrides the body's `topic` field
//!
//! Empty query values count as absent.

use bytes::Bytes;
use serde::Deserialize;

use super::body::RequestBody;
use crate::error::BridgeError;

/// Query parameters understood by the publish endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PublishQuery {
    /// Multipart field carrying a single uploaded file.
    pub single: Option<String>,
    /// Body field to publish instead of `message`.
    pub path: Option<String>,
    /// Topic override.
    pub topic: Option<String>,
    pub key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

pub fn normalize(body: &RequestBody, query: &PublishQuery) -> Result<OutboundMessage, BridgeError> {
    let payload = match non_empty(query.path.as_deref()) {
        Some(field) => body.payload(field),
        None => body.payload("message"),
    };
    let topic = non_empty(query.topic.as_deref())
        .map(str::to_string)
        .or_else(|| body.text("topic").filter(|topic| !topic.is_empty()))
        .ok_or(BridgeError::TopicNotSpecified)?;
    Ok(OutboundMessage { topic, payload })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}
