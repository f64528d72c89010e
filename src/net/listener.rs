//! TCP/TLS listener built on axum-server.
//!
//! # Responsibilities
//! - Bind to the requested hostname/port (port 0 picks an ephemeral port)
//! - Serve each server with its own axum router and shutdown handle
//! - Implement the per-request native calls over the shared request store
//! - Graceful stop: stop accepting, let in-flight exchanges finish

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::config::ListenerConfig;
use crate::net::service::{self, ServiceState};
use crate::net::store::{OutgoingResponse, PendingTracker, RequestStore};
use crate::net::{
    resolve_addr, BasicInfo, HttpEvent, ListenError, ListenOptions, ListenerInfo, NativeError,
    NativeListener, RequestId, ServerId, WireBody,
};

/// Tunables of the axum listener.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
    /// How long a parked request waits for the bridge before a 504.
    pub response_timeout: Duration,
    /// Grace period for in-flight connections on stop.
    pub shutdown_grace: Duration,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self::from(&ListenerConfig::default())
    }
}

impl From<&ListenerConfig> for ListenerSettings {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            max_body_bytes: config.max_body_bytes,
            response_timeout: Duration::from_secs(config.response_timeout_secs),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

struct RunningServer {
    handle: Handle,
    pending: PendingTracker,
}

struct Shared {
    store: Arc<RequestStore>,
    servers: DashMap<ServerId, RunningServer>,
    next_id: AtomicU64,
    events: mpsc::UnboundedSender<HttpEvent>,
    settings: ListenerSettings,
}

/// Native listener serving HTTP/1.1 and HTTP/2 (TLS optional) through axum.
#[derive(Clone)]
pub struct AxumListener {
    shared: Arc<Shared>,
}

impl AxumListener {
    /// Create a listener that reports parked requests on `events`.
    pub fn new(events: mpsc::UnboundedSender<HttpEvent>, settings: ListenerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Arc::new(RequestStore::new()),
                servers: DashMap::new(),
                next_id: AtomicU64::new(1),
                events,
                settings,
            }),
        }
    }

    /// Number of servers currently accepting.
    pub fn running(&self) -> usize {
        self.shared.servers.len()
    }

    async fn start(self, options: ListenOptions) -> Result<ListenerInfo, ListenError> {
        let addr = resolve_addr(&options.hostname, options.port).await?;
        let tcp = std::net::TcpListener::bind(addr).map_err(ListenError::Bind)?;
        tcp.set_nonblocking(true)?;
        let bound: SocketAddr = tcp.local_addr()?;

        let rustls = match options.tls.as_ref() {
            Some(tls) => Some(tls.rustls_config().await?),
            None => None,
        };

        let id = ServerId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let pending = PendingTracker::new();
        let handle = Handle::new();
        let state = ServiceState {
            server_id: id,
            store: Arc::clone(&self.shared.store),
            events: self.shared.events.clone(),
            pending: pending.clone(),
            is_tls: rustls.is_some(),
            response_timeout: self.shared.settings.response_timeout,
        };
        let app = service::router(state, self.shared.settings.max_body_bytes)
            .into_make_service_with_connect_info::<SocketAddr>();

        let is_tls = rustls.is_some();
        match rustls {
            Some(config) => {
                let server = axum_server::from_tcp_rustls(tcp, config).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app).await {
                        tracing::error!(server_id = %id, error = %e, "HTTPS server failed");
                    }
                });
            }
            None => {
                let server = axum_server::from_tcp(tcp).handle(handle.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.serve(app).await {
                        tracing::error!(server_id = %id, error = %e, "HTTP server failed");
                    }
                });
            }
        }

        self.shared.servers.insert(id, RunningServer { handle, pending });

        tracing::info!(
            server_id = %id,
            address = %bound,
            tls = is_tls,
            "Listener bound"
        );

        Ok(ListenerInfo {
            id,
            port: bound.port(),
            hostname: options.hostname,
            is_tls,
        })
    }
}

impl NativeListener for AxumListener {
    fn start_listener(&self, options: ListenOptions) -> BoxFuture<'static, Result<ListenerInfo, ListenError>> {
        self.clone().start(options).boxed()
    }

    fn stop_listener(&self, id: ServerId) -> bool {
        match self.shared.servers.remove(&id) {
            Some((_, server)) => {
                server
                    .handle
                    .graceful_shutdown(Some(self.shared.settings.shutdown_grace));
                tracing::info!(server_id = %id, pending = server.pending.count(), "Listener stopping");
                true
            }
            None => false,
        }
    }

    fn fetch_request_basic_info(&self, id: RequestId) -> Result<BasicInfo, NativeError> {
        self.shared.store.basic_info(id)
    }

    fn fetch_request_headers(&self, id: RequestId) -> Result<Vec<(String, String)>, NativeError> {
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
        let body = match body.into_bytes() {
            Ok(body) => body,
            Err(e) => {
                // The request must not stay parked on a bad body.
                self.shared.store.discard(id);
                return Err(e);
            }
        };
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
