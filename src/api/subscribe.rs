//! Streaming subscriptions.
//!
//! `GET /subscribe/?topic=X` keeps the response open and writes the raw
//! payload of every message published to `X` as a body chunk, in broker
//! delivery order. Each request owns a dedicated broker session:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Closed
//! ```
//!
//! The session closes when the client goes away (the response body is
//! dropped), when the broker session ends, or when the server shuts down.

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::{mpsc, watch};

use super::body::read_body;
use super::guard::{authorize, presented_key};
use super::AppState;
use crate::error::BridgeError;
use crate::mqtt::{ConnectionHandle, InboundMessage, MqttError, SessionKind};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubscribeQuery {
    pub topic: Option<String>,
    pub key: Option<String>,
}

/// Lifecycle of a session. Before `Connecting` there is no session at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
    Connecting,
    Streaming,
    Closed,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    request: Request,
) -> Result<Response, BridgeError> {
    let body = read_body(request, None).await.ok();
    let key = presented_key(body.as_ref(), query.key.as_deref());
    authorize(&state.config.secret, key.as_deref())?;

    let topic = query
        .topic
        .filter(|topic| !topic.is_empty())
        .ok_or(BridgeError::SubscribeTopicNotSpecified)?;
    let session = SubscriptionSession::open(&state, topic).await?;

    let headers = [
        (CONTENT_TYPE, "application/octet-stream"),
        (CACHE_CONTROL, "no-store"),
    ];
    Ok((headers, Body::from_stream(session.into_stream())).into_response())
}

/// One subscription bound to one HTTP response stream.
pub struct SubscriptionSession {
    topic: String,
    handle: ConnectionHandle,
    messages: mpsc::Receiver<InboundMessage>,
    shutdown: watch::Receiver<bool>,
    state: StreamState,
}

impl SubscriptionSession {
    /// Connects a dedicated session and subscribes to `topic`.
    ///
    /// A session that fails before streaming is closed on the way out.
    pub async fn open(state: &AppState, topic: String) -> Result<Self, BridgeError> {
        log::debug!("Subscription [{}]: Idle -> {:?}", topic, StreamState::Connecting);
        let subscribe_error = |source| BridgeError::Subscribe {
            topic: topic.clone(),
            source,
        };
        let handle = state
            .connector
            .connect(&state.config.mqtt, SessionKind::Subscription)
            .map_err(subscribe_error)?;
        let messages = handle.messages().map_err(subscribe_error)?;

        let mut session = Self {
            topic,
            handle,
            messages,
            shutdown: state.shutdown_signal(),
            state: StreamState::Connecting,
        };
        if let Err(source) = session.subscribe().await {
            return Err(BridgeError::Subscribe {
                topic: session.topic.clone(),
                source,
            });
        }
        session.transition(StreamState::Streaming);
        log::info!("Streaming topic [{}]", session.topic);
        Ok(session)
    }

    async fn subscribe(&self) -> Result<(), MqttError> {
        self.handle.wait_connected().await?;
        self.handle.subscribe(&self.topic)
    }

    fn transition(&mut self, to: StreamState) {
        log::debug!("Subscription [{}]: {:?} -> {:?}", self.topic, self.state, to);
        self.state = to;
    }

    /// Next payload published to the subscribed topic.
    ///
    /// Messages on other topics are dropped. Returns `None` once the session
    /// is closed.
    pub async fn next_payload(&mut self) -> Option<Bytes> {
        while self.state == StreamState::Streaming {
            let next = tokio::select! {
                message = self.messages.recv() => message,
                _ = shutdown_requested(&mut self.shutdown) => None,
            };
            match next {
                Some(message) if message.topic == self.topic => return Some(message.payload),
                Some(message) => {
                    log::trace!(
                        "Dropping message on [{}] for subscription [{}]",
                        message.topic,
                        self.topic
                    );
                }
                None => self.close(),
            }
        }
        None
    }

    /// Closes the dedicated broker session. Idempotent.
    pub fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.transition(StreamState::Closed);
        self.handle.close();
        log::info!("Subscription to [{}] closed", self.topic);
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures::stream::unfold(self, |mut session| async move {
            let payload = session.next_payload().await?;
            Some((Ok(payload), session))
        })
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Resolves once shutdown is requested. Never resolves if the state owning
/// the sender is gone, since nothing can request it anymore.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}
