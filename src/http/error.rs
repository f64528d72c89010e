//! Bridge error definitions.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::net::{ListenError, NativeError, ServerId};

/// Boxed error accepted from handler code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the bridge API.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `serve` was called without a request handler.
    #[error("Invalid handler: a request handler is required")]
    InvalidHandler,

    /// The native listener could not start.
    #[error(transparent)]
    Listen(#[from] ListenError),

    /// Operation on a server that is no longer registered.
    #[error("Server {0} is stopped")]
    ServerStopped(ServerId),

    /// Body could not be decoded or parsed.
    #[error("Malformed body: {0}")]
    MalformedBody(String),

    /// Body was already read through this request or one of its clones.
    #[error("Body already consumed")]
    BodyConsumed,

    #[error(transparent)]
    Native(#[from] NativeError),
}

enum Failure {
    Error(BoxError),
    Panic(String),
}

/// Failure raised by user handler code, synchronously, asynchronously or by panicking.
///
/// Any error type converts into it, so `?` works inside handlers.
pub struct HandlerError {
    failure: Failure,
}

impl HandlerError {
    /// Build from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self {
            failure: Failure::Error(message.to_string().into()),
        }
    }

    /// Build from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            failure: Failure::Panic(message),
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.failure, Failure::Panic(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self.failure {
            Failure::Error(_) => "error",
            Failure::Panic(_) => "panic",
        }
    }

    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match &self.failure {
            Failure::Error(err) => err.downcast_ref::<E>(),
            Failure::Panic(_) => None,
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: Into<BoxError>,
{
    fn from(err: E) -> Self {
        Self {
            failure: Failure::Error(err.into()),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Failure::Error(err) => write!(f, "{}", err),
            Failure::Panic(message) => write!(f, "handler panicked: {}", message),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Failure::Error(err) => f.debug_tuple("HandlerError").field(err).finish(),
            Failure::Panic(message) => f.debug_tuple("HandlerPanic").field(message).finish(),
        }
    }
}
