//! Handler results and their native encoding.
//!
//! # Responsibilities
//! - Model what a handler may return ([`Reply`], [`Response`])
//! - Pick the cheapest correct native encoding for a reply ([`serialize`])
//!
//! # Tiers
//! Checked in order, first match wins:
//! 1. `Text`: plain string, status 200, sent as a text response
//! 2. `Json`: serialized once, sent with `content-type: application/json`
//! 3. `Empty`: status 200, body `"OK"`
//! 4. `PlainText`: a `Response` with at most one header, that header being a
//!    text/plain (or empty) content type, whose body is valid UTF-8
//! 5. `General`: every header in order, body base64-encoded in an envelope
//!
//! # Design Decisions
//! - Serialization is pure; the dispatcher performs the single native send
//! - A tier 4 candidate that fails the text read keeps its status and headers

use bytes::Bytes;
use serde::Serialize;

use crate::net::{NativeError, NativeListener, RequestId, WireBody};

pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Body of a [`Response`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
}

impl ResponseBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResponseBody::Empty => &[],
            ResponseBody::Text(text) => text.as_bytes(),
            ResponseBody::Bytes(bytes) => bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// A fully specified HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: ResponseBody,
}

impl Response {
    /// Empty response with the given status and no headers.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Text response with `content-type: text/plain;charset=utf-8`.
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("content-type", TEXT_CONTENT_TYPE)
            .with_body(ResponseBody::Text(text.into()))
    }

    /// Binary response; no headers are added.
    pub fn bytes(status: u16, bytes: impl Into<Bytes>) -> Self {
        Self::new(status).with_body(ResponseBody::Bytes(bytes.into()))
    }

    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_string(value)?;
        Ok(Self::new(status)
            .with_header("content-type", JSON_CONTENT_TYPE)
            .with_body(ResponseBody::Text(body)))
    }

    /// Append a header. Order is kept and duplicates are allowed.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header matching `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }
}

/// Anything a handler may hand back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Json(serde_json::Value),
    Empty,
    Response(Response),
}

impl Reply {
    /// Serialize any value into a JSON reply. `null` becomes [`Reply::Empty`].
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(if value.is_null() {
            Reply::Empty
        } else {
            Reply::Json(value)
        })
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        if value.is_null() {
            Reply::Empty
        } else {
            Reply::Json(value)
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Response(response)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

/// Encoding strategy chosen for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Text,
    Json,
    Empty,
    PlainText,
    General,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Text => "text",
            Tier::Json => "json",
            Tier::Empty => "empty",
            Tier::PlainText => "plain_text",
            Tier::General => "general",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response in the shape the native listener accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeResponse {
    Text {
        status: u16,
        text: String,
    },
    Full {
        status: u16,
        headers: Vec<(String, String)>,
        body: WireBody,
    },
}

impl NativeResponse {
    pub fn status(&self) -> u16 {
        match self {
            NativeResponse::Text { status, .. } | NativeResponse::Full { status, .. } => *status,
        }
    }

    /// Hand the response to the listener. This is the only native send per request.
    pub fn send(self, native: &dyn NativeListener, id: RequestId) -> Result<(), NativeError> {
        match self {
            NativeResponse::Text { status, text } => native.send_text_response(id, status, text),
            NativeResponse::Full { status, headers, body } => native.send_response(id, status, headers, body),
        }
    }
}

/// A serialized reply together with the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serialized {
    pub tier: Tier,
    pub response: NativeResponse,
}

/// Encode a handler reply for the native listener.
pub fn serialize(reply: Reply) -> Serialized {
    match reply {
        Reply::Text(text) => Serialized {
            tier: Tier::Text,
            response: NativeResponse::Text { status: 200, text },
        },
        Reply::Json(value) => Serialized {
            tier: Tier::Json,
            response: NativeResponse::Full {
                status: 200,
                headers: vec![("content-type".to_string(), JSON_CONTENT_TYPE.to_string())],
                body: WireBody::Text(value.to_string()),
            },
        },
        Reply::Empty => Serialized {
            tier: Tier::Empty,
            response: NativeResponse::Text {
                status: 200,
                text: "OK".to_string(),
            },
        },
        Reply::Response(response) => serialize_response(response),
    }
}

fn serialize_response(response: Response) -> Serialized {
    let Response { status, headers, body } = response;

    if !is_plain_text(&headers) {
        return general(status, headers, body);
    }

    match body_text(body) {
        Ok(text) => Serialized {
            tier: Tier::PlainText,
            response: NativeResponse::Text { status, text },
        },
        Err((reason, body)) => {
            tracing::debug!(status, reason, "Text fast path not applicable, using general encoding");
            general(status, headers, body)
        }
    }
}

fn general(status: u16, headers: Vec<(String, String)>, body: ResponseBody) -> Serialized {
    Serialized {
        tier: Tier::General,
        response: NativeResponse::Full {
            status,
            headers,
            body: WireBody::base64(body.as_bytes()),
        },
    }
}

/// At most one header, and if present it is a text/plain (or empty) content type.
fn is_plain_text(headers: &[(String, String)]) -> bool {
    match headers {
        [] => true,
        [(name, value)] if name.eq_ignore_ascii_case("content-type") => {
            let essence = value.split(';').next().unwrap_or("").trim();
            essence.is_empty() || essence.eq_ignore_ascii_case("text/plain")
        }
        _ => false,
    }
}

/// Read the body as text, handing it back untouched when it is not UTF-8.
fn body_text(body: ResponseBody) -> Result<String, (&'static str, ResponseBody)> {
    match body {
        ResponseBody::Empty => Ok(String::new()),
        ResponseBody::Text(text) => Ok(text),
        ResponseBody::Bytes(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => Err(("body is not valid UTF-8", ResponseBody::Bytes(bytes))),
        },
    }
}
