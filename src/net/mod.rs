//! Native listener layer.
//!
//! # Data Flow
//! ```text
//! Incoming TCP/TLS connection
//!     → listener.rs (bind, accept loop, TLS via axum-server)
//!     → service.rs (park request in the store, emit HttpEvent)
//!     → store.rs (RequestId → parked request arena)
//!     → bridge dispatches, answers by RequestId
//!     → service.rs writes the response and releases the handle
//! ```
//!
//! # Design Decisions
//! - The bridge only ever holds `ServerId` / `RequestId` integers; every
//!   access goes back through [`NativeListener`] and is validated against the
//!   store, so a stale id is an error rather than a dangling reference.
//! - The trait is object safe; async operations return boxed futures.
//! - [`loopback::LoopbackListener`] implements the same contract in memory.

pub mod listener;
pub mod loopback;
pub mod service;
pub mod store;
pub mod tls;

use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use listener::{AxumListener, ListenerSettings};
pub use loopback::{LoopbackListener, SyntheticRequest};
pub use store::{OutgoingResponse, RequestStore};
pub use tls::TlsConfig;

/// Identifier of one listening server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(u64);

impl ServerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "srv-{}", self.0)
    }
}

/// Identifier of one in-flight request inside a listener's request store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Event emitted by a listener for every request it parks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpEvent {
    pub server_id: ServerId,
    pub request_id: RequestId,
}

/// Parameters of a listener-start call.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub port: u16,
    pub hostname: String,
    pub tls: Option<TlsConfig>,
}

/// What a successful listener-start call reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub id: ServerId,
    /// Actual port (differs from the requested one when 0 was passed).
    pub port: u16,
    pub hostname: String,
    pub is_tls: bool,
}

/// Method and absolute URL of a parked request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicInfo {
    pub method: String,
    pub url: String,
}

/// Body of a full native response.
///
/// Serializes either as a bare JSON string or as `{"type":"base64","data":...}`
/// so the listener can tell text payloads from binary transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireBody {
    Text(String),
    Encoded(Envelope),
}

/// Binary-safe transfer envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Base64 { data: String },
}

impl WireBody {
    /// Wrap raw bytes in a base64 envelope.
    pub fn base64(bytes: &[u8]) -> Self {
        use base64::Engine;
        WireBody::Encoded(Envelope::Base64 {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    /// Decode into the bytes that go on the wire.
    pub fn into_bytes(self) -> Result<Bytes, NativeError> {
        use base64::Engine;
        match self {
            WireBody::Text(text) => Ok(Bytes::from(text)),
            WireBody::Encoded(Envelope::Base64 { data }) => base64::engine::general_purpose::STANDARD
                .decode(data)
                .map(Bytes::from)
                .map_err(|e| NativeError::InvalidResponse(format!("bad base64 body: {}", e))),
        }
    }
}

/// Errors raised while starting a listener.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),

    /// Hostname/port did not resolve to a socket address.
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    /// Certificate or private key rejected.
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by per-request native calls.
#[derive(Debug, Error)]
pub enum NativeError {
    /// The id is unknown: never issued, already answered, or timed out.
    #[error("Request {0} not found")]
    RequestNotFound(RequestId),

    #[error("Body of request {0} already consumed")]
    BodyConsumed(RequestId),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    /// The listener side stopped waiting for this response.
    #[error("Response receiver for request {0} is gone")]
    ResponseDropped(RequestId),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The listener reported a URL that does not parse as an absolute URL.
    #[error("Invalid request URL {0}")]
    InvalidUrl(String),
}

/// Contract of the event-driven listener the bridge is plugged into.
pub trait NativeListener: Send + Sync + 'static {
    /// Bind and start accepting; resolves once the socket is bound.
    fn start_listener(&self, options: ListenOptions) -> BoxFuture<'static, Result<ListenerInfo, ListenError>>;

    /// Stop accepting on a server. Returns false if the id was not running.
    fn stop_listener(&self, id: ServerId) -> bool;

    fn fetch_request_basic_info(&self, id: RequestId) -> Result<BasicInfo, NativeError>;

    fn fetch_request_headers(&self, id: RequestId) -> Result<Vec<(String, String)>, NativeError>;

    /// Take and collect the request body. A second call fails with
    /// [`NativeError::BodyConsumed`].
    fn fetch_request_body(&self, id: RequestId) -> BoxFuture<'static, Result<Bytes, NativeError>>;

    fn send_text_response(&self, id: RequestId, status: u16, text: String) -> Result<(), NativeError>;

    fn send_response(
        &self,
        id: RequestId,
        status: u16,
        headers: Vec<(String, String)>,
        body: WireBody,
    ) -> Result<(), NativeError>;

    fn peer_addr(&self, _id: RequestId) -> Option<SocketAddr> {
        None
    }

    /// Requests parked for a server and not yet answered.
    fn pending_requests(&self, _id: ServerId) -> Option<u64> {
        None
    }
}

/// Resolve a hostname/port pair the way both listeners do.
pub(crate) async fn resolve_addr(hostname: &str, port: u16) -> Result<SocketAddr, ListenError> {
    let mut addrs = tokio::net::lookup_host((hostname, port))
        .await
        .map_err(|e| ListenError::InvalidAddress(format!("{}:{}: {}", hostname, port, e)))?;
    addrs
        .next()
        .ok_or_else(|| ListenError::InvalidAddress(format!("{}:{} resolved to nothing", hostname, port)))
}
