//! The fetch bridge: host types behind the script-facing `fetch`,
//! `Request`, `Response` and `Headers`.

pub mod body;
pub mod headers;

use serde::{Deserialize, Serialize};

use hopp_error::FetchError;

use crate::marshal::HostValue;

pub use body::{decode_body, BodyError, BodyKind, BodyRegistry, BodySnapshot};
pub use headers::Headers;

/// A request handed to the injected fetch transport.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Absolute URL.
    pub url: String,
    /// Uppercased method.
    pub method: String,
    /// Request headers.
    pub headers: Headers,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
}

/// What the transport returns for a completed exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostResponse {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase.
    pub status_text: String,
    /// Response headers.
    pub headers: Headers,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HostResponse {
    /// A response with `status` and a body, with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }
}

/// Arguments `fetch()` sends across the boundary.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchInit {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    /// Inline body as a marshalled value.
    #[serde(default)]
    pub body: Option<HostValue>,
    /// Body owned by a `Request` shadow, already marked consumed by the VM.
    #[serde(default)]
    pub body_id: Option<u32>,
}

/// Scalar fields copied eagerly into a `Response` shadow.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResponse {
    pub body_id: u32,
    pub status: u16,
    pub status_text: String,
    pub ok: bool,
    pub headers: Headers,
    pub url: String,
}

/// Turn an inline body value into bytes.
pub fn body_bytes(value: HostValue) -> Option<Vec<u8>> {
    match value {
        HostValue::Undefined | HostValue::Null => None,
        HostValue::String(s) => Some(s.into_bytes()),
        HostValue::Bytes(b) => Some(b),
        other => Some(other.to_js_string().into_bytes()),
    }
}

/// Validate a `fetch()` call and build the transport request.
///
/// `stored_body` is the body of a `Request` shadow, when one was passed.
pub fn build_fetch_request(
    init: FetchInit,
    stored_body: Option<Vec<u8>>,
) -> Result<FetchRequest, FetchError> {
    let url = url::Url::parse(&init.url)
        .map_err(|e| FetchError::InvalidRequest(format!("invalid URL '{}': {e}", init.url)))?;
    let method = init
        .method
        .as_deref()
        .unwrap_or("GET")
        .trim()
        .to_ascii_uppercase();
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic() || b == b'-') {
        return Err(FetchError::InvalidRequest(format!(
            "invalid method '{method}'"
        )));
    }
    let body = init.body.and_then(body_bytes).or(stored_body);
    if body.is_some() && (method == "GET" || method == "HEAD") {
        return Err(FetchError::InvalidRequest(format!(
            "request with {method} method cannot have a body"
        )));
    }
    Ok(FetchRequest {
        url: url.to_string(),
        method,
        headers: init.headers,
        body,
    })
}

/// Store a transport response's body and produce the shadow fields.
pub fn register_response(
    registry: &mut BodyRegistry,
    url: String,
    response: HostResponse,
) -> SerializedResponse {
    let content_type = response.headers.get("content-type").map(str::to_string);
    let body_id = registry.register(response.body, content_type);
    SerializedResponse {
        body_id,
        status: response.status,
        status_text: response.status_text,
        ok: (200..300).contains(&response.status),
        headers: response.headers,
        url,
    }
}
