//! Shared-secret access guard.

use super::body::RequestBody;
use crate::error::BridgeError;

/// Lets a request through when no secret is configured or the presented key
/// equals it.
pub fn authorize(secret: &str, key: Option<&str>) -> Result<(), BridgeError> {
    if secret.is_empty() || key == Some(secret) {
        return Ok(());
    }
    Err(BridgeError::Unauthorized)
}

/// Key presented by a request: the body's `key` field, else the `key` query
/// parameter.
pub fn presented_key(body: Option<&RequestBody>, query_key: Option<&str>) -> Option<String> {
    body.and_then(|body| body.text("key"))
        .or_else(|| query_key.map(str::to_string))
}
