//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count requests, errors and relayed bytes per process role
//! - Mirror every update into the `metrics` facade for Prometheus scraping
//! - Keep in-process totals for the admin API
//!
//! # Metrics
//! - `<prefix>_requests_count` (counter): requests accepted
//! - `<prefix>_errors_count` (counter): failed requests and relay errors
//! - `<prefix>_bytes_sent` (counter): bytes relayed client → destination
//! - `<prefix>_bytes_received` (counter): bytes relayed destination → client
//! - `<prefix>_proxy_status{status}` (gauge): instances per status
//! - `<prefix>_proxy_count{removing}` (gauge): instances per removing flag

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

use crate::repository::InstanceCounts;

/// Metric name prefix for the dispatcher.
pub const DISPATCHER_PREFIX: &str = "scrapoxy_proxy_dispatcher";

/// Metric name prefix for the edge tunnel server.
pub const EDGE_PREFIX: &str = "scrapoxy_proxy";

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics server listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder"),
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Counters handed to each component that produces traffic.
#[derive(Debug)]
pub struct ProxyMetrics {
    requests_name: String,
    errors_name: String,
    bytes_sent_name: String,
    bytes_received_name: String,
    status_name: String,
    removing_name: String,
    requests: AtomicU64,
    errors: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl ProxyMetrics {
    pub fn new(prefix: &str) -> Self {
        Self {
            requests_name: format!("{}_requests_count", prefix),
            errors_name: format!("{}_errors_count", prefix),
            bytes_sent_name: format!("{}_bytes_sent", prefix),
            bytes_received_name: format!("{}_bytes_received", prefix),
            status_name: format!("{}_proxy_status", prefix),
            removing_name: format!("{}_proxy_count", prefix),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!(self.requests_name.clone()).increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(self.errors_name.clone()).increment(1);
    }

    pub fn record_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        counter!(self.bytes_sent_name.clone()).increment(bytes);
    }

    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        counter!(self.bytes_received_name.clone()).increment(bytes);
    }

    /// Publish instance gauges.
    pub fn record_instance_counts(&self, counts: &InstanceCounts) {
        for (status, count) in &counts.by_status {
            gauge!(self.status_name.clone(), "status" => status.clone()).set(*count as f64);
        }
        for (removing, count) in &counts.by_removing {
            gauge!(self.removing_name.clone(), "removing" => removing.clone()).set(*count as f64);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new(DISPATCHER_PREFIX)
    }
}
