//! One-shot publishing: the keep-alive endpoint and the generic publish endpoint.

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;

use super::body::{is_multipart, read_body};
use super::guard::{authorize, presented_key};
use super::normalize::{normalize, PublishQuery};
use super::AppState;
use crate::error::BridgeError;

type Accepted = (StatusCode, &'static str);

const ACCEPTED: Accepted = (StatusCode::OK, "OK");

/// `GET /keep_alive/` publishes the configured keep-alive pair.
pub async fn keep_alive(State(state): State<AppState>) -> Result<Accepted, BridgeError> {
    let keep_alive = &state.config.keep_alive;
    state
        .publisher
        .publish(&keep_alive.topic, keep_alive.message.clone())
        .map_err(BridgeError::KeepAlive)?;
    log::debug!("Published keep alive message to [{}]", keep_alive.topic);
    Ok(ACCEPTED)
}

/// `POST /post/` publishes the message derived from the request.
///
/// Order: access guard, body and upload extraction, normalization, publish.
/// An unauthorized request never reports upload or body failures. Multipart
/// requests present their key in the query and are not parsed before the
/// guard passes.
pub async fn publish(
    State(state): State<AppState>,
    Query(query): Query<PublishQuery>,
    request: Request,
) -> Result<Accepted, BridgeError> {
    let secret = &state.config.secret;
    let body = if is_multipart(request.headers()) {
        authorize(secret, query.key.as_deref())?;
        read_body(request, query.single.as_deref()).await?
    } else {
        let body = read_body(request, query.single.as_deref()).await;
        let key = presented_key(body.as_ref().ok(), query.key.as_deref());
        authorize(secret, key.as_deref())?;
        body?
    };

    let message = normalize(&body, &query)?;
    state
        .publisher
        .publish(&message.topic, message.payload.clone())
        .map_err(|source| BridgeError::Publish {
            topic: message.topic.clone(),
            message: String::from_utf8_lossy(&message.payload).into_owned(),
            source,
        })?;
    log::debug!(
        "Published {} bytes to [{}]",
        message.payload.len(),
        message.topic
    );
    Ok(ACCEPTED)
}
