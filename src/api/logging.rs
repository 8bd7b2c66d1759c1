use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use super::body::MAX_BODY_BYTES;
use super::AppState;
use crate::error::BridgeError;

const MAX_LOGGED_PAYLOAD: usize = 1024;

/// Logs every request with its client address, plus the payload in debug mode.
pub async fn log_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = client_address(&request);
    let uri = request.uri().to_string();
    if !state.config.debug {
        log::info!("Request [{}] from {}.", uri, client);
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => return BridgeError::Body(err.to_string()).into_response(),
    };
    log::info!(
        "Request [{}] from {} with payload [{}]",
        uri,
        client,
        preview(&bytes)
    );
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn client_address(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').map(str::trim).find(|ip| !ip.is_empty()));
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.chars().count() <= MAX_LOGGED_PAYLOAD {
        return text.into_owned();
    }
    let mut truncated: String = text.chars().take(MAX_LOGGED_PAYLOAD).collect();
    truncated.push_str("...");
    truncated
}
