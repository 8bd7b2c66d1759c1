//! Request body extraction.
//!
//! Bodies are flattened into a field map regardless of encoding:
//! - `application/json` objects (other JSON values yield no fields)
//! - `application/x-www-form-urlencoded` forms
//! - `multipart/form-data`, only when a single-file upload field is named
//!
//! Any other content type yields an empty body.

use axum::body::to_bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::BridgeError;
use crate::mqtt::MAX_PAYLOAD_BYTES;

/// Upper bound for buffered request bodies, uploads included. No publish
/// derived from a body can exceed the broker session's packet limit.
pub const MAX_BODY_BYTES: usize = MAX_PAYLOAD_BYTES;

#[derive(Clone, Debug)]
pub struct UploadedFile {
    /// Multipart field the file was sent in.
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Clone, Debug, Default)]
pub struct RequestBody {
    pub fields: Map<String, Value>,
    pub file: Option<UploadedFile>,
}

impl RequestBody {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields, file: None }
    }

    /// Textual value of a field. Numbers are rendered in decimal.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Payload bytes of a field.
    ///
    /// The uploaded file wins when it was sent under `name`. Strings are used
    /// verbatim, missing and `null` fields are empty, anything else is
    /// rendered as compact JSON.
    pub fn payload(&self, name: &str) -> Bytes {
        if let Some(file) = self.file.as_ref().filter(|file| file.field == name) {
            return file.data.clone();
        }
        match self.fields.get(name) {
            None | Some(Value::Null) => Bytes::new(),
            Some(Value::String(value)) => Bytes::from(value.clone()),
            Some(other) => Bytes::from(other.to_string()),
        }
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Multipart bodies carry uploads and are only read once the request passed
/// the access guard.
pub fn is_multipart(headers: &HeaderMap) -> bool {
    content_type(headers).starts_with("multipart/form-data")
}

/// Reads and decodes the body of `request`.
///
/// `single` names the multipart field that may carry an uploaded file.
pub async fn read_body(request: Request, single: Option<&str>) -> Result<RequestBody, BridgeError> {
    let content_type = content_type(request.headers());

    if content_type.starts_with("multipart/form-data") {
        return match single.filter(|field| !field.is_empty()) {
            Some(field) => read_multipart(request, field).await,
            None => Ok(RequestBody::default()),
        };
    }

    let is_json = content_type.starts_with("application/json")
        || (content_type.starts_with("application/") && content_type.contains("+json"));
    let is_form = content_type.starts_with("application/x-www-form-urlencoded");
    if !is_json && !is_form {
        return Ok(RequestBody::default());
    }

    let bytes = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| BridgeError::Body(e.to_string()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RequestBody::default());
    }
    if is_json {
        parse_json(&bytes)
    } else {
        Ok(parse_form(&bytes))
    }
}

pub fn parse_json(bytes: &[u8]) -> Result<RequestBody, BridgeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| BridgeError::Body(e.to_string()))?;
    match value {
        Value::Object(fields) => Ok(RequestBody::from_fields(fields)),
        _ => Ok(RequestBody::default()),
    }
}

pub fn parse_form(bytes: &[u8]) -> RequestBody {
    let fields = url::form_urlencoded::parse(bytes)
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect();
    RequestBody::from_fields(fields)
}

async fn read_multipart(request: Request, single: &str) -> Result<RequestBody, BridgeError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| BridgeError::Upload(e.body_text()))?;

    let mut body = RequestBody::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BridgeError::Upload(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_none() {
            let value = field
                .text()
                .await
                .map_err(|e| BridgeError::Upload(e.body_text()))?;
            body.fields.insert(name, Value::String(value));
            continue;
        }

        if name != single || body.file.is_some() {
            return Err(BridgeError::Upload(format!(
                "unexpected file field '{}'",
                name
            )));
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| BridgeError::Upload(e.body_text()))?;
        log::debug!(
            "received upload [{}] ({}, {} bytes) in field [{}]",
            file_name.as_deref().unwrap_or("unnamed"),
            content_type.as_deref().unwrap_or("unknown type"),
            data.len(),
            name
        );
        body.file = Some(UploadedFile {
            field: name,
            file_name,
            content_type,
            data,
        });
    }
    Ok(body)
}
