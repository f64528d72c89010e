//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and metrics from configuration
//! - Create the bridge over an axum listener
//! - Start the event loop that feeds the dispatcher
//!
//! # Design Decisions
//! - Observability first, so every later step is logged
//! - The event loop runs before any server is started; servers are added by
//!   the caller through the returned bridge

use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::http::Bridge;
use crate::lifecycle::Shutdown;
use crate::net::ListenerSettings;
use crate::observability::{logging, metrics};

/// Install the tracing subscriber and, when enabled, the metrics exporter.
pub fn init_observability(config: &BridgeConfig) {
    logging::init(&config.observability.log_level);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<std::net::SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }
}

/// Create the bridge and spawn its event loop.
///
/// The loop stops every server and exits when `shutdown` fires.
pub fn start_bridge(config: &BridgeConfig, shutdown: &Shutdown) -> (Bridge, JoinHandle<()>) {
    let settings = ListenerSettings::from(&config.listener);
    tracing::info!(
        max_body_bytes = settings.max_body_bytes,
        response_timeout = ?settings.response_timeout,
        "Starting bridge"
    );

    let (bridge, events) = Bridge::with_axum(settings);
    let event_loop = tokio::spawn(bridge.clone().run(events, shutdown.subscribe()));
    (bridge, event_loop)
}
