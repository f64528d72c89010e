//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, body limit > 0)
//! - Check that referenced files exist
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::schema::BridgeConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.hostname must not be empty")]
    EmptyHostname,

    #[error("listener.max_body_bytes must be greater than zero")]
    ZeroBodyLimit,

    #[error("listener.response_timeout_secs must be greater than zero")]
    ZeroResponseTimeout,

    #[error("observability.metrics_address is not a socket address: {0}")]
    InvalidMetricsAddress(String),

    /// A TLS certificate or key path that does not exist.
    #[error("{field} not found: {path:?}")]
    MissingFile { field: &'static str, path: PathBuf },
}

pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;

    if listener.hostname.trim().is_empty() {
        errors.push(ValidationError::EmptyHostname);
    }
    if listener.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }
    if listener.response_timeout_secs == 0 {
        errors.push(ValidationError::ZeroResponseTimeout);
    }
    if let Some(tls) = &listener.tls {
        if !tls.cert_path.exists() {
            errors.push(ValidationError::MissingFile {
                field: "listener.tls.cert_path",
                path: tls.cert_path.clone(),
            });
        }
        if !tls.key_path.exists() {
            errors.push(ValidationError::MissingFile {
                field: "listener.tls.key_path",
                path: tls.key_path.clone(),
            });
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
