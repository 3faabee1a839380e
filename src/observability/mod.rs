//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Tunnel handlers and relay pumps produce:
//!     → logging.rs (structured events inside a per-session span)
//!     → metrics.rs (request/error/byte counters)
//!
//! collector.rs (interval):
//!     Repository aggregate counts → instance gauges
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//!     → admin API snapshots
//! ```
//!
//! # Design Decisions
//! - Metrics are an injected `Arc<ProxyMetrics>`, one per process role
//! - Metrics are cheap (atomic increments)

pub mod collector;
pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSnapshot, ProxyMetrics};
