//! Arena of parked requests.
//!
//! # Responsibilities
//! - Mint unique request IDs
//! - Hold method/url/headers/body of a request until it is answered
//! - Hand the response back to whoever parked the request
//! - Count pending requests per server
//!
//! # Design Decisions
//! - DashMap gives per-entry locking; lookups for different requests never contend
//! - Answering removes the entry, so a request id is dead after its response
//! - The body is taken out on first read; the entry stays for the response

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::net::{BasicInfo, NativeError, RequestId, ServerId};

/// Response handed back to the party that parked a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl OutgoingResponse {
    /// Plain text response with the default text content type.
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain;charset=utf-8".to_string())],
            body: Bytes::from(text.into()),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Where a request body comes from.
pub enum BodySource {
    Buffered(Bytes),
    Stream(Body),
}

impl BodySource {
    async fn collect(self) -> Result<Bytes, NativeError> {
        match self {
            BodySource::Buffered(bytes) => Ok(bytes),
            // Size limits are enforced by the body-limit layer in front of the service.
            BodySource::Stream(body) => axum::body::to_bytes(body, usize::MAX)
                .await
                .map_err(|e| NativeError::BodyRead(e.to_string())),
        }
    }
}

/// A request as it enters the store.
pub struct IncomingRequest {
    pub server_id: ServerId,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: BodySource,
    pub peer_addr: Option<SocketAddr>,
}

struct ParkedRequest {
    server_id: ServerId,
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    // Mutex keeps the entry Sync; the streaming body is only Send.
    body: Mutex<Option<BodySource>>,
    peer_addr: Option<SocketAddr>,
    responder: oneshot::Sender<OutgoingResponse>,
    _pending: PendingGuard,
}

/// Counts requests parked for one server.
#[derive(Debug, Clone, Default)]
pub struct PendingTracker {
    count: Arc<AtomicU64>,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a parked request. Returns a guard that decrements on drop.
    pub fn track(&self) -> PendingGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        PendingGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Guard tracking one parked request's lifetime.
#[derive(Debug)]
pub struct PendingGuard {
    count: Arc<AtomicU64>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Thread-safe storage for requests awaiting a response.
#[derive(Default)]
pub struct RequestStore {
    requests: DashMap<RequestId, ParkedRequest>,
    next_id: AtomicU64,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request and get its id plus the receiver its response arrives on.
    pub fn park(
        &self,
        request: IncomingRequest,
        pending: &PendingTracker,
    ) -> (RequestId, oneshot::Receiver<OutgoingResponse>) {
        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (responder, receiver) = oneshot::channel();
        self.requests.insert(
            id,
            ParkedRequest {
                server_id: request.server_id,
                method: request.method,
                url: request.url,
                headers: request.headers,
                body: Mutex::new(Some(request.body)),
                peer_addr: request.peer_addr,
                responder,
                _pending: pending.track(),
            },
        );
        tracing::trace!(request_id = %id, server_id = %request.server_id, "Request parked");
        (id, receiver)
    }

    pub fn basic_info(&self, id: RequestId) -> Result<BasicInfo, NativeError> {
        self.requests
            .get(&id)
            .map(|req| BasicInfo {
                method: req.method.clone(),
                url: req.url.clone(),
            })
            .ok_or(NativeError::RequestNotFound(id))
    }

    pub fn headers(&self, id: RequestId) -> Result<Vec<(String, String)>, NativeError> {
        self.requests
            .get(&id)
            .map(|req| req.headers.clone())
            .ok_or(NativeError::RequestNotFound(id))
    }

    pub fn peer_addr(&self, id: RequestId) -> Option<SocketAddr> {
        self.requests.get(&id).and_then(|req| req.peer_addr)
    }

    pub fn server_of(&self, id: RequestId) -> Option<ServerId> {
        self.requests.get(&id).map(|req| req.server_id)
    }

    /// Take the body out of a parked request. The entry itself stays.
    pub fn take_body(&self, id: RequestId) -> Result<BodySource, NativeError> {
        let req = self.requests.get(&id).ok_or(NativeError::RequestNotFound(id))?;
        let taken = req
            .body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        taken.ok_or(NativeError::BodyConsumed(id))
    }

    /// Take the body and collect it; the returned future does not borrow the store.
    pub fn read_body(
        &self,
        id: RequestId,
    ) -> impl std::future::Future<Output = Result<Bytes, NativeError>> + Send + 'static {
        let taken = self.take_body(id);
        async move { taken?.collect().await }
    }

    /// Answer a request and release its handle.
    pub fn respond(&self, id: RequestId, response: OutgoingResponse) -> Result<(), NativeError> {
        let (_, req) = self
            .requests
            .remove(&id)
            .ok_or(NativeError::RequestNotFound(id))?;
        req.responder
            .send(response)
            .map_err(|_| NativeError::ResponseDropped(id))
    }

    /// Drop a request without answering it.
    pub fn discard(&self, id: RequestId) -> bool {
        self.requests.remove(&id).is_some()
    }

    /// Number of requests currently parked.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
