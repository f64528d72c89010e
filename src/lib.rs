//! HTTP dispatch bridge.
//!
//! Connects an event-driven native HTTP listener to user request handlers.
//!
//! ```text
//!     Client ──▶ net::AxumListener ──(HttpEvent)──▶ http::Bridge::run
//!                 │ parks request                      │
//!                 │ in RequestStore                    ▼
//!                 │                              http::Dispatcher
//!                 │                                    │ RequestView
//!                 │                                    ▼
//!                 │                              user Handler
//!                 │                                    │ Reply
//!                 ▼                                    ▼
//!     Client ◀── response ◀──(RequestId)────── tiered serializer
//! ```
//!
//! # Example
//!
//! ```ignore
//! let (bridge, events) = Bridge::with_axum(ListenerSettings::default());
//! let server = bridge
//!     .serve(ServeOptions::new().port(3000).handler(handler_fn(|_req| Ok("pong"))))
//!     .await?;
//! tokio::spawn(bridge.clone().run(events, shutdown.subscribe()));
//! ```

pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::BridgeConfig;
pub use http::{
    async_handler, error_handler_fn, handler_fn, Bridge, BridgeError, HandlerError, Reply, RequestView,
    Response, ServeOptions, ServerHandle,
};
pub use lifecycle::Shutdown;
pub use net::{ListenerSettings, TlsConfig};
