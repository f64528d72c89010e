//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default, so an empty file is a valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listener configuration (address, limits, TLS).
    pub listener: ListenerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Hostname or IP to bind.
    pub hostname: String,

    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Seconds a request may wait for its response before a 504.
    pub response_timeout_secs: u64,

    /// Seconds in-flight connections get to finish after stop.
    pub shutdown_grace_secs: u64,

    /// Optional TLS configuration.
    pub tls: Option<TlsFiles>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 3000,
            max_body_bytes: 2 * 1024 * 1024,
            response_timeout_secs: 30,
            shutdown_grace_secs: 10,
            tls: None,
        }
    }
}

/// PEM files for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsFiles {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing filter directive (e.g. "info" or "serve_bridge=debug").
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "serve_bridge=info,tower_http=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
