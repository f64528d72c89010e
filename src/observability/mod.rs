//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener + dispatcher produce:
//!     → logging.rs (structured tracing events: server_id, request_id, tier, status)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
