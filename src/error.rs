//! Request-level errors and their HTTP representation.
//!
//! Each handler error is converted at the boundary of its own request. The
//! detailed cause goes to the log; the response carries a short plain-text
//! description that never includes the shared secret or the message payload.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::mqtt::MqttError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Missing or incorrect shared secret.
    #[error("access denied")]
    Unauthorized,

    #[error("topic not specified")]
    TopicNotSpecified,

    /// Missing `topic` query parameter on the subscribe endpoint.
    #[error("subscription topic not specified")]
    SubscribeTopicNotSpecified,

    #[error("failed to upload file: {0}")]
    Upload(String),

    #[error("failed to parse request body: {0}")]
    Body(String),

    #[error("failed to publish message [{message}] to topic [{topic}]: {source}")]
    Publish {
        topic: String,
        message: String,
        #[source]
        source: MqttError,
    },

    #[error("failed to publish keep alive message: {0}")]
    KeepAlive(#[source] MqttError),

    #[error("failed to subscribe to topic [{topic}]: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: MqttError,
    },
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body shown to the client.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::TopicNotSpecified => "Topic not specified",
            Self::SubscribeTopicNotSpecified => "topic not specified",
            Self::Upload(_) => "Failed to upload file",
            Self::Body(_) => "Failed to parse request body",
            Self::Publish { .. } => "Failed to publish message to topic",
            Self::KeepAlive(_) => "Failed to publish keep alive message",
            Self::Subscribe { .. } => "Failed to subscribe to topic",
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        match &self {
            Self::Unauthorized => log::error!("Access denied."),
            other => log::error!("{}", other),
        }
        (self.status(), self.public_message()).into_response()
    }
}
