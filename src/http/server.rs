//! Caller-facing bridge API.
//!
//! # Responsibilities
//! - Start servers on the native listener and register their handlers
//! - Hand out [`ServerHandle`]s for stop / reload / introspection
//! - Pump listener events into the dispatcher until shutdown
//!
//! # Design Decisions
//! - The handler is checked before any native call, so a missing handler
//!   never binds a socket
//! - `stop` unregisters first, then stops the listener: events already queued
//!   for the id get a 503 instead of reaching a half-stopped server

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use url::Url;

use crate::config::ListenerConfig;
use crate::http::dispatch::Dispatcher;
use crate::http::error::BridgeError;
use crate::http::handler::{ErrorHandler, Handler};
use crate::http::registry::{ServerEntry, ServerRegistry};
use crate::net::{
    AxumListener, HttpEvent, ListenError, ListenOptions, ListenerInfo, ListenerSettings, NativeListener,
    ServerId, TlsConfig,
};
use crate::observability::metrics;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOSTNAME: &str = "0.0.0.0";

/// Options for [`Bridge::serve`].
#[derive(Debug, Clone)]
pub struct ServeOptions {
    port: u16,
    hostname: String,
    handler: Option<Handler>,
    error_handler: Option<ErrorHandler>,
    tls: Option<TlsConfig>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            hostname: DEFAULT_HOSTNAME.to_string(),
            handler: None,
            error_handler: None,
            tls: None,
        }
    }
}

impl ServeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener address and TLS material from configuration. TLS files are read here.
    pub async fn from_config(config: &ListenerConfig) -> Result<Self, BridgeError> {
        let tls = match &config.tls {
            Some(files) => Some(
                TlsConfig::from_pem_files(&files.cert_path, &files.key_path)
                    .await
                    .map_err(ListenError::Io)?,
            ),
            None => None,
        };
        Ok(Self {
            port: config.port,
            hostname: config.hostname.clone(),
            tls,
            ..Self::default()
        })
    }

    /// Port to bind; 0 picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Partial update for [`ServerHandle::reload`]. Unset fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct ReloadOptions {
    handler: Option<Handler>,
    error_handler: Option<ErrorHandler>,
}

impl ReloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn error_handler(mut self, error_handler: ErrorHandler) -> Self {
        self.error_handler = Some(error_handler);
        self
    }
}

/// Entry point tying a native listener to the registry and dispatcher.
#[derive(Clone)]
pub struct Bridge {
    native: Arc<dyn NativeListener>,
    registry: Arc<ServerRegistry>,
    dispatcher: Dispatcher,
}

impl Bridge {
    pub fn new(native: Arc<dyn NativeListener>) -> Self {
        let registry = Arc::new(ServerRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&native), Arc::clone(&registry));
        Self {
            native,
            registry,
            dispatcher,
        }
    }

    /// Bridge over a fresh [`AxumListener`], plus the event stream to feed [`Bridge::run`].
    pub fn with_axum(settings: ListenerSettings) -> (Self, mpsc::UnboundedReceiver<HttpEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(Arc::new(AxumListener::new(tx, settings))), rx)
    }

    /// Start a server and register its handlers.
    pub async fn serve(&self, options: ServeOptions) -> Result<ServerHandle, BridgeError> {
        let handler = options.handler.ok_or(BridgeError::InvalidHandler)?;

        let info = self
            .native
            .start_listener(ListenOptions {
                port: options.port,
                hostname: options.hostname,
                tls: options.tls,
            })
            .await?;

        let url = match server_url(&info) {
            Ok(url) => url,
            Err(e) => {
                self.native.stop_listener(info.id);
                return Err(e.into());
            }
        };

        self.registry.insert(
            info.clone(),
            ServerEntry {
                handler,
                error_handler: options.error_handler,
            },
        );
        metrics::record_active_servers(self.registry.len());

        tracing::info!(
            server_id = %info.id,
            url = %url,
            tls = info.is_tls,
            "Server started"
        );

        Ok(ServerHandle {
            info,
            url,
            native: Arc::clone(&self.native),
            registry: Arc::clone(&self.registry),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Ids of every registered server.
    pub fn servers(&self) -> Vec<ServerId> {
        self.registry.ids()
    }

    /// Dispatch events until the channel closes or shutdown fires, then stop all servers.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<HttpEvent>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(HttpEvent { server_id, request_id }) => {
                        self.dispatcher.dispatch(server_id, request_id);
                    }
                    None => {
                        tracing::debug!("Listener event channel closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping servers");
                    break;
                }
            }
        }
        self.stop_all();
    }

    /// Stop every registered server. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let stopped = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| stop_server(self.native.as_ref(), &self.registry, *id))
            .count();
        metrics::record_active_servers(self.registry.len());
        stopped
    }
}

/// Handle to one running server.
#[derive(Clone)]
pub struct ServerHandle {
    info: ListenerInfo,
    url: Url,
    native: Arc<dyn NativeListener>,
    registry: Arc<ServerRegistry>,
}

impl ServerHandle {
    pub fn id(&self) -> ServerId {
        self.info.id
    }

    /// Bound port (the real one when 0 was requested).
    pub fn port(&self) -> u16 {
        self.info.port
    }

    pub fn hostname(&self) -> &str {
        &self.info.hostname
    }

    /// Base URL, e.g. `http://localhost:3000/`.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_tls(&self) -> bool {
        self.info.is_tls
    }

    /// Requests accepted by the listener and not yet answered.
    pub fn pending_requests(&self) -> u64 {
        self.native.pending_requests(self.info.id).unwrap_or(0)
    }

    /// Stop the server. Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        let stopped = stop_server(self.native.as_ref(), &self.registry, self.info.id);
        if stopped {
            metrics::record_active_servers(self.registry.len());
        }
        stopped
    }

    /// Swap handlers in place. In-flight requests keep the handlers they started with.
    pub fn reload(&self, options: ReloadOptions) -> Result<(), BridgeError> {
        self.registry
            .reload(self.info.id, options.handler, options.error_handler)?;
        tracing::info!(server_id = %self.info.id, "Server reloaded");
        Ok(())
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("id", &self.info.id)
            .field("url", &self.url.as_str())
            .finish()
    }
}

fn stop_server(native: &dyn NativeListener, registry: &ServerRegistry, id: ServerId) -> bool {
    if registry.remove(id).is_none() {
        return false;
    }
    if !native.stop_listener(id) {
        tracing::warn!(server_id = %id, "Listener was not running");
    }
    tracing::info!(server_id = %id, "Server stopped");
    true
}

/// Base URL of a server; wildcard hosts are reported as `localhost`.
fn server_url(info: &ListenerInfo) -> Result<Url, ListenError> {
    let scheme = if info.is_tls { "https" } else { "http" };
    let host = match info.hostname.as_str() {
        "0.0.0.0" | "::" | "[::]" => "localhost".to_string(),
        host if host.contains(':') && !host.starts_with('[') => format!("[{}]", host),
        host => host.to_string(),
    };
    Url::parse(&format!("{}://{}:{}/", scheme, host, info.port))
        .map_err(|e| ListenError::InvalidAddress(format!("{}: {}", info.hostname, e)))
}
