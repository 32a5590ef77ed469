//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, `audit` target for the audit trail)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (per-request spans on every transport listener)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG / config)
//!     → Prometheus scrape (global exporter, or a transport's /metrics route)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments behind the `metrics` facade)
//! - A workload's debug flag only raises span verbosity

pub mod logging;
pub mod metrics;
pub mod tracing;
