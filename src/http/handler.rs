//! Request and error handler types.
//!
//! A handler answers either right away ([`Outcome::Immediate`]) or with a
//! future the dispatcher drives on the runtime ([`Outcome::Pending`]). The
//! constructors below cover the common shapes so callers rarely build an
//! [`Outcome`] by hand.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::error::HandlerError;
use crate::http::request::RequestView;
use crate::http::response::Reply;

/// Deferred handler result.
pub type BoxReplyFuture = BoxFuture<'static, Result<Reply, HandlerError>>;

/// What a handler produced for one request.
pub enum Outcome {
    /// Result is available now and is sent before `dispatch` returns.
    Immediate(Reply),
    /// Result arrives later; the dispatcher spawns and awaits it.
    Pending(BoxReplyFuture),
}

impl Outcome {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Reply, HandlerError>> + Send + 'static,
    {
        Outcome::Pending(future.boxed())
    }
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Outcome::Immediate(reply)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Immediate(reply) => f.debug_tuple("Immediate").field(reply).finish(),
            Outcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

type HandlerFn = dyn Fn(RequestView) -> Result<Outcome, HandlerError> + Send + Sync;
type ErrorHandlerFn = dyn Fn(&HandlerError) -> Result<Reply, HandlerError> + Send + Sync;

/// User request-handling logic, shared by every dispatch of a server.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap a closure that returns an [`Outcome`] directly.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(RequestView) -> Result<Outcome, HandlerError> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub(crate) fn call(&self, request: RequestView) -> Result<Outcome, HandlerError> {
        (self.inner)(request)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// Fallback invoked when the request handler fails or panics.
///
/// Only a [`Reply::Response`] result is used; anything else falls back to the
/// default `500` response.
#[derive(Clone)]
pub struct ErrorHandler {
    inner: Arc<ErrorHandlerFn>,
}

impl ErrorHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&HandlerError) -> Result<Reply, HandlerError> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub(crate) fn call(&self, error: &HandlerError) -> Result<Reply, HandlerError> {
        (self.inner)(error)
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorHandler(..)")
    }
}

/// Handler answering synchronously.
///
/// ```ignore
/// let handler = handler_fn(|req| Ok(format!("{} {}", req.method(), req.url())));
/// ```
pub fn handler_fn<F, R>(f: F) -> Handler
where
    F: Fn(RequestView) -> Result<R, HandlerError> + Send + Sync + 'static,
    R: Into<Reply>,
{
    Handler::new(move |request| f(request).map(|reply| Outcome::Immediate(reply.into())))
}

/// Handler answering through a future.
pub fn async_handler<F, Fut, R>(f: F) -> Handler
where
    F: Fn(RequestView) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: Into<Reply>,
{
    Handler::new(move |request| {
        let future = f(request);
        Ok(Outcome::pending(async move { future.await.map(Into::into) }))
    })
}

pub fn error_handler_fn<F, R>(f: F) -> ErrorHandler
where
    F: Fn(&HandlerError) -> Result<R, HandlerError> + Send + Sync + 'static,
    R: Into<Reply>,
{
    ErrorHandler::new(move |error| f(error).map(Into::into))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::Response;
    use crate::net::{ListenOptions, LoopbackListener, NativeListener, SyntheticRequest};

    async fn view(path: &str) -> RequestView {
        let listener = LoopbackListener::new();
        let info = listener
            .start_listener(ListenOptions {
                port: 0,
                hostname: "localhost".into(),
                tls: None,
            })
            .await
            .unwrap();
        let (id, _rx) = listener.inject(info.id, SyntheticRequest::get(path));
        RequestView::open(Arc::new(listener), id).unwrap()
    }

    #[tokio::test]
    async fn sync_handlers_are_immediate() {
        let handler = handler_fn(|req| Ok(req.path()));
        match handler.call(view("/ping").await).unwrap() {
            Outcome::Immediate(Reply::Text(text)) => assert_eq!(text, "/ping"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn async_handlers_are_pending() {
        let handler = async_handler(|_req| async { Ok::<_, HandlerError>("later") });
        match handler.call(view("/").await).unwrap() {
            Outcome::Pending(future) => {
                assert!(matches!(future.await.unwrap(), Reply::Text(t) if t == "later"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn error_handlers_see_the_failure() {
        let handler = error_handler_fn(|err| Ok(Response::text(418, err.to_string())));
        let reply = handler.call(&HandlerError::msg("teapot")).unwrap();
        match reply {
            Reply::Response(response) => {
                assert_eq!(response.status(), 418);
                assert_eq!(response.body().as_bytes(), b"teapot");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
