//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Lifecycle events on the bus:
//!     → metrics.rs (counters, gauges, histograms derived from events)
//!     → logging.rs (optional trace-level event log)
//!
//! Direct calls:
//!     registry / supervisor / pipeline → metrics.rs record_* helpers
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID is a field on every per-request log line
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, trace_events, LogHandle, LoggingError};
