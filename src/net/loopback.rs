//! In-memory listener.
//!
//! Implements the full [`NativeListener`] contract without sockets: servers
//! get fake ports, requests are injected by the caller and responses come back
//! on a oneshot receiver. Useful for embedding the bridge behind another
//! transport and for tests that need to count native round trips.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::net::store::{BodySource, IncomingRequest, OutgoingResponse, PendingTracker, RequestStore};
use crate::net::{
    BasicInfo, HttpEvent, ListenError, ListenOptions, ListenerInfo, NativeError, NativeListener,
    RequestId, ServerId, WireBody,
};

const FIRST_EPHEMERAL_PORT: u16 = 40_000;

/// A request built by hand for [`LoopbackListener::inject`].
#[derive(Debug, Clone)]
pub struct SyntheticRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
}

impl SyntheticRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            peer_addr: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new("POST", path).body(body)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn peer(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }
}

struct LoopbackServer {
    port: u16,
    hostname: String,
    is_tls: bool,
    pending: PendingTracker,
}

#[derive(Default)]
struct Shared {
    store: RequestStore,
    servers: DashMap<ServerId, LoopbackServer>,
    ports_in_use: Mutex<HashSet<u16>>,
    next_server: AtomicU64,
    next_port: AtomicU64,
    header_fetches: AtomicU64,
    basic_fetches: AtomicU64,
    events: Option<mpsc::UnboundedSender<HttpEvent>>,
}

/// Socket-free [`NativeListener`].
#[derive(Clone, Default)]
pub struct LoopbackListener {
    shared: Arc<Shared>,
}

impl LoopbackListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit an [`HttpEvent`] for every injected request.
    pub fn with_events(events: mpsc::UnboundedSender<HttpEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Some(events),
                ..Shared::default()
            }),
        }
    }

    /// Park a synthetic request for `server_id`.
    ///
    /// The request is parked even when the server is unknown or stopped, which
    /// mirrors a connection accepted just before `stop`.
    pub fn inject(
        &self,
        server_id: ServerId,
        request: SyntheticRequest,
    ) -> (RequestId, oneshot::Receiver<OutgoingResponse>) {
        let (authority, scheme, pending) = match self.shared.servers.get(&server_id) {
            Some(server) => (
                format!("{}:{}", server.hostname, server.port),
                if server.is_tls { "https" } else { "http" },
                server.pending.clone(),
            ),
            None => ("localhost".to_string(), "http", PendingTracker::new()),
        };
        let host = request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("host"))
            .map(|(_, v)| v.clone())
            .unwrap_or(authority);

        let (id, receiver) = self.shared.store.park(
            IncomingRequest {
                server_id,
                method: request.method,
                url: format!("{}://{}{}", scheme, host, request.path),
                headers: request.headers,
                body: BodySource::Buffered(request.body),
                peer_addr: request.peer_addr,
            },
            &pending,
        );

        if let Some(events) = &self.shared.events {
            if events.send(HttpEvent { server_id, request_id: id }).is_err() {
                tracing::warn!(request_id = %id, "Loopback event receiver is gone");
            }
        }
        (id, receiver)
    }

    /// How many times headers were fetched across all requests.
    pub fn header_fetches(&self) -> u64 {
        self.shared.header_fetches.load(Ordering::SeqCst)
    }

    /// How many times basic info was fetched across all requests.
    pub fn basic_fetches(&self) -> u64 {
        self.shared.basic_fetches.load(Ordering::SeqCst)
    }

    /// Requests parked and not yet answered, across all servers.
    pub fn parked(&self) -> usize {
        self.shared.store.len()
    }

    pub fn is_running(&self, id: ServerId) -> bool {
        self.shared.servers.contains_key(&id)
    }

    fn claim_port(&self, requested: u16) -> Result<u16, ListenError> {
        let mut ports = self
            .shared
            .ports_in_use
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let port = if requested == 0 {
            loop {
                let candidate = FIRST_EPHEMERAL_PORT
                    .wrapping_add(self.shared.next_port.fetch_add(1, Ordering::Relaxed) as u16);
                if candidate != 0 && !ports.contains(&candidate) {
                    break candidate;
                }
            }
        } else {
            requested
        };

        if !ports.insert(port) {
            return Err(ListenError::Bind(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                format!("port {} already in use", port),
            )));
        }
        Ok(port)
    }

    fn start(&self, options: ListenOptions) -> Result<ListenerInfo, ListenError> {
        if options.hostname.trim().is_empty() {
            return Err(ListenError::InvalidAddress("empty hostname".into()));
        }
        if let Some(tls) = &options.tls {
            tls.validate()?;
        }
        let port = self.claim_port(options.port)?;
        let id = ServerId::new(self.shared.next_server.fetch_add(1, Ordering::SeqCst) + 1);
        let is_tls = options.tls.is_some();
        self.shared.servers.insert(
            id,
            LoopbackServer {
                port,
                hostname: options.hostname.clone(),
                is_tls,
                pending: PendingTracker::new(),
            },
        );
        Ok(ListenerInfo {
            id,
            port,
            hostname: options.hostname,
            is_tls,
        })
    }
}

impl NativeListener for LoopbackListener {
    fn start_listener(&self, options: ListenOptions) -> BoxFuture<'static, Result<ListenerInfo, ListenError>> {
        futures_util::future::ready(self.start(options)).boxed()
    }

    fn stop_listener(&self, id: ServerId) -> bool {
        match self.shared.servers.remove(&id) {
            Some((_, server)) => {
                self.shared
                    .ports_in_use
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&server.port);
                true
            }
            None => false,
        }
    }

    fn fetch_request_basic_info(&self, id: RequestId) -> Result<BasicInfo, NativeError> {
        self.shared.basic_fetches.fetch_add(1, Ordering::SeqCst);
        self.shared.store.basic_info(id)
    }

    fn fetch_request_headers(&self, id: RequestId) -> Result<Vec<(String, String)>, NativeError> {
        self.shared.header_fetches.fetch_add(1, Ordering::SeqCst);
        self.shared.store.headers(id)
    }

    fn fetch_request_body(&self, id: RequestId) -> BoxFuture<'static, Result<Bytes, NativeError>> {
        self.shared.store.read_body(id).boxed()
    }

    fn send_text_response(&self, id: RequestId, status: u16, text: String) -> Result<(), NativeError> {
        self.shared.store.respond(id, OutgoingResponse::text(status, text))
    }

    fn send_response(
        &self,
        id: RequestId,
        status: u16,
        headers: Vec<(String, String)>,
        body: WireBody,
    ) -> Result<(), NativeError> {
        let body = body.into_bytes()?;
        self.shared
            .store
            .respond(id, OutgoingResponse { status, headers, body })
    }

    fn peer_addr(&self, id: RequestId) -> Option<SocketAddr> {
        self.shared.store.peer_addr(id)
    }

    fn pending_requests(&self, id: ServerId) -> Option<u64> {
        self.shared.servers.get(&id).map(|server| server.pending.count())
    }
}
