//! Dispatch entry point.
//!
//! # Data Flow
//! ```text
//! HttpEvent { server_id, request_id }
//!     → registry lookup (absent → 503, no handler call)
//!     → RequestView::open (method + URL)
//!     → handler (panics captured)
//!         Immediate(reply) → serialize → native send
//!         Pending(future)  → spawned task → serialize → native send
//!         Err / panic      → error path
//! ```
//!
//! # Design Decisions
//! - The entry snapshot is taken once per dispatch and moved into any spawned
//!   task, so a reload mid-flight does not change which error handler runs
//! - The error path never re-raises: anything it cannot use becomes the
//!   default 500 response
//! - Exactly one native send per request

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::http::error::HandlerError;
use crate::http::handler::Outcome;
use crate::http::registry::{ServerEntry, ServerRegistry};
use crate::http::request::RequestView;
use crate::http::response::{serialize, NativeResponse, Reply, Serialized, Tier};
use crate::net::{NativeError, NativeListener, RequestId, ServerId};
use crate::observability::metrics;

/// How far a dispatch got before `dispatch` returned.
#[derive(Debug)]
pub enum Dispatch {
    /// No server registered under the id; a 503 was sent.
    Unavailable,
    /// The request vanished before it could be read or answered.
    Abandoned,
    /// The request URL did not parse; a 400 was sent without calling the handler.
    Rejected,
    /// The handler answered synchronously.
    Responded(Tier),
    /// The handler failed synchronously; the error path answered.
    Errored,
    /// The handler returned a future; the task answers when it resolves.
    Pending(JoinHandle<Completion>),
}

/// Final state of a deferred dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Responded(Tier),
    Errored,
    Abandoned,
}

impl From<Completion> for Dispatch {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Responded(tier) => Dispatch::Responded(tier),
            Completion::Errored => Dispatch::Errored,
            Completion::Abandoned => Dispatch::Abandoned,
        }
    }
}

/// Routes native request events to the registered handlers.
#[derive(Clone)]
pub struct Dispatcher {
    native: Arc<dyn NativeListener>,
    registry: Arc<ServerRegistry>,
}

impl Dispatcher {
    pub fn new(native: Arc<dyn NativeListener>, registry: Arc<ServerRegistry>) -> Self {
        Self { native, registry }
    }

    /// Handle one request event. Must be called inside a tokio runtime when
    /// handlers may return [`Outcome::Pending`].
    pub fn dispatch(&self, server_id: ServerId, request_id: RequestId) -> Dispatch {
        let started = Instant::now();

        let Some(entry) = self.registry.lookup(server_id) else {
            metrics::record_unavailable();
            tracing::debug!(server_id = %server_id, request_id = %request_id, "No server registered, answering 503");
            if let Err(e) = self
                .native
                .send_text_response(request_id, 503, "Service Unavailable".to_string())
            {
                tracing::warn!(request_id = %request_id, error = %e, "Failed to send 503");
            }
            return Dispatch::Unavailable;
        };

        let request = match RequestView::open(Arc::clone(&self.native), request_id) {
            Ok(request) => request,
            Err(NativeError::InvalidUrl(url)) => {
                tracing::warn!(server_id = %server_id, request_id = %request_id, url = %url, "Unparsable request URL, answering 400");
                if let Err(e) = self
                    .native
                    .send_text_response(request_id, 400, "Bad Request".to_string())
                {
                    tracing::warn!(request_id = %request_id, error = %e, "Failed to send 400");
                }
                return Dispatch::Rejected;
            }
            Err(e) => {
                tracing::warn!(
                    server_id = %server_id,
                    request_id = %request_id,
                    error = %e,
                    "Request vanished before dispatch"
                );
                return Dispatch::Abandoned;
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| entry.handler.call(request)))
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

        let exchange = Exchange {
            native: Arc::clone(&self.native),
            entry,
            server_id,
            request_id,
            started,
        };

        match outcome {
            Ok(Outcome::Immediate(reply)) => exchange.respond(reply).into(),
            Ok(Outcome::Pending(future)) => Dispatch::Pending(tokio::spawn(async move {
                let result = AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));
                match result {
                    Ok(reply) => exchange.respond(reply),
                    Err(error) => exchange.fail(error),
                }
            })),
            Err(error) => exchange.fail(error).into(),
        }
    }
}

/// Everything needed to finish one request, owned so it can move into a task.
struct Exchange {
    native: Arc<dyn NativeListener>,
    entry: Arc<ServerEntry>,
    server_id: ServerId,
    request_id: RequestId,
    started: Instant,
}

impl Exchange {
    fn respond(self, reply: Reply) -> Completion {
        let serialized = serialize(reply);
        let tier = serialized.tier;
        if self.send(serialized) {
            Completion::Responded(tier)
        } else {
            Completion::Abandoned
        }
    }

    fn fail(self, error: HandlerError) -> Completion {
        metrics::record_handler_failure(error.kind());
        tracing::warn!(
            server_id = %self.server_id,
            request_id = %self.request_id,
            kind = error.kind(),
            error = %error,
            "Handler failed"
        );

        let serialized = match self.recover(&error) {
            Some(reply) => serialize(reply),
            None => Serialized {
                tier: Tier::Text,
                response: NativeResponse::Text {
                    status: 500,
                    text: "Internal Server Error".to_string(),
                },
            },
        };

        if self.send(serialized) {
            Completion::Errored
        } else {
            Completion::Abandoned
        }
    }

    /// Ask the error handler for a response. `None` means use the default.
    fn recover(&self, error: &HandlerError) -> Option<Reply> {
        let error_handler = self.entry.error_handler.as_ref()?;
        let result = catch_unwind(AssertUnwindSafe(|| error_handler.call(error)))
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

        match result {
            Ok(reply @ Reply::Response(_)) => Some(reply),
            Ok(other) => {
                tracing::warn!(
                    server_id = %self.server_id,
                    request_id = %self.request_id,
                    reply = ?other,
                    "Error handler returned a non-response value, using default"
                );
                None
            }
            Err(failure) => {
                metrics::record_error_handler_failure();
                tracing::warn!(
                    server_id = %self.server_id,
                    request_id = %self.request_id,
                    kind = failure.kind(),
                    error = %failure,
                    "ErrorHandlerFailure: error handler failed, using default"
                );
                None
            }
        }
    }

    fn send(&self, serialized: Serialized) -> bool {
        let Serialized { tier, response } = serialized;
        let status = response.status();
        match response.send(self.native.as_ref(), self.request_id) {
            Ok(()) => {
                metrics::record_dispatch(tier, status, self.started);
                tracing::debug!(
                    server_id = %self.server_id,
                    request_id = %self.request_id,
                    tier = %tier,
                    status,
                    "Response sent"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    server_id = %self.server_id,
                    request_id = %self.request_id,
                    error = %e,
                    "Failed to send response"
                );
                false
            }
        }
    }
}
