//! Periodic instance gauges.
//!
//! Reads aggregate counts from the repository on an interval and publishes
//! them through `ProxyMetrics`. Read-only: nothing here mutates the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::observability::metrics::ProxyMetrics;
use crate::repository::Repository;

/// Refresh the gauges once.
pub async fn collect_once(repository: &dyn Repository, metrics: &ProxyMetrics) -> bool {
    match repository.instance_counts().await {
        Ok(counts) => {
            metrics.record_instance_counts(&counts);
            tracing::trace!(instances = counts.total(), "Instance gauges refreshed");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not collect instance counts");
            false
        }
    }
}

/// Spawn the collection loop; it ends when `shutdown` fires.
pub fn spawn_collector(
    repository: Arc<dyn Repository>,
    metrics: Arc<ProxyMetrics>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    collect_once(repository.as_ref(), &metrics).await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Collector stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::repository::InMemoryRepository;

    #[tokio::test]
    async fn collects_without_mutation() {
        let repository = InMemoryRepository::from_seed_str(
            r#"
            [[instances]]
            id = "i1"
            project_id = "p1"
            status = "STARTED"
            removing = false
            fingerprint_present = true
            request_count = 3
            last_connection_ts = 100
            address = { hostname = "10.0.0.1", port = 3128 }
            certificate = { cert = "c", key = "k" }
            "#,
        )
        .unwrap();
        let before = repository.instances();

        assert!(collect_once(&repository, &ProxyMetrics::new("collector_test")).await);
        assert_eq!(repository.instances(), before);
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let shutdown = Shutdown::new();
        let handle = spawn_collector(
            Arc::new(InMemoryRepository::new()),
            Arc::new(ProxyMetrics::new("collector_loop")),
            Duration::from_millis(10),
            shutdown.subscribe(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
