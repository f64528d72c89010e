//! HTTP dispatch bridge.
//!
//! # Data Flow
//! ```text
//! HttpEvent from a NativeListener
//!     → dispatch.rs (registry lookup, handler invocation, panic capture)
//!     → request.rs (RequestView: eager method/URL, lazy headers and body)
//!     → handler.rs (user handler: Immediate or Pending outcome)
//!     → response.rs (tiered serialization)
//!     → single native send by RequestId
//! ```
//!
//! `server.rs` is the caller-facing side: [`Bridge::serve`] starts a listener
//! and registers its handlers in `registry.rs`.

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod registry;
pub mod request;
pub mod response;
pub mod server;

pub use dispatch::{Completion, Dispatch, Dispatcher};
pub use error::{BoxError, BridgeError, HandlerError};
pub use handler::{async_handler, error_handler_fn, handler_fn, ErrorHandler, Handler, Outcome};
pub use registry::{ServerEntry, ServerRegistry};
pub use request::{Headers, RequestView};
pub use response::{serialize, NativeResponse, Reply, Response, ResponseBody, Serialized, Tier};
pub use server::{Bridge, ReloadOptions, ServeOptions, ServerHandle};
