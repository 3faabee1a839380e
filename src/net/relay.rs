//! Full-duplex byte relay.
//!
//! # Responsibilities
//! - Pump A → B and B → A as two concurrent tasks
//! - Propagate end-of-stream as a write half-close on the opposite side
//! - Count bytes per direction as they flow
//! - Close both streams only once both directions have finished
//!
//! # Design Decisions
//! - A direction that errors stops on its own; the other keeps running
//! - No timeout applies once relaying starts

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::observability::metrics::ProxyMetrics;

const BUFFER_SIZE: usize = 32 * 1024;

/// Which way bytes flow relative to the downstream side `a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Downstream to upstream (`a` → `b`).
    Upstream,
    /// Upstream to downstream (`b` → `a`).
    Downstream,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

/// Outcome of one direction.
#[derive(Debug, Default)]
pub struct DirectionStats {
    pub bytes: u64,
    pub error: Option<io::Error>,
}

/// Outcome of a finished relay.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub upstream: DirectionStats,
    pub downstream: DirectionStats,
}

/// Relay bytes between `a` (downstream, the side that connected to us) and
/// `b` (upstream). Returns after both directions are done; both streams are
/// dropped, and so closed, only at that point.
///
/// Bytes moving `a` → `b` are recorded as sent, `b` → `a` as received.
pub async fn relay<A, B>(a: A, b: B, metrics: Arc<ProxyMetrics>) -> RelayStats
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let upstream = tokio::spawn(pump(a_read, b_write, Direction::Upstream, metrics.clone()));
    let downstream = tokio::spawn(pump(b_read, a_write, Direction::Downstream, metrics.clone()));

    // Barrier: neither stream is released until both pumps have returned.
    let (upstream, downstream) = tokio::join!(upstream, downstream);

    let (upstream, upstream_halves) = finished(upstream);
    let (downstream, downstream_halves) = finished(downstream);

    // Dropping the last half of each stream closes it.
    drop(upstream_halves);
    drop(downstream_halves);

    let stats = RelayStats { upstream, downstream };
    tracing::debug!(
        bytes_sent = stats.upstream.bytes,
        bytes_received = stats.downstream.bytes,
        "Relay finished"
    );
    stats
}

fn finished<R, W>(
    joined: Result<(DirectionStats, R, W), tokio::task::JoinError>,
) -> (DirectionStats, Option<(R, W)>) {
    match joined {
        Ok((stats, reader, writer)) => (stats, Some((reader, writer))),
        Err(e) => (
            DirectionStats {
                bytes: 0,
                error: Some(io::Error::other(e)),
            },
            None,
        ),
    }
}

/// Copy until EOF or error, then half-close the writer.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    metrics: Arc<ProxyMetrics>,
) -> (DirectionStats, R, W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = DirectionStats::default();
    let mut buf = vec![0u8; BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                stats.error = Some(e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            stats.error = Some(e);
            break;
        }
        if let Err(e) = writer.flush().await {
            stats.error = Some(e);
            break;
        }

        stats.bytes += n as u64;
        match direction {
            Direction::Upstream => metrics.record_bytes_sent(n as u64),
            Direction::Downstream => metrics.record_bytes_received(n as u64),
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::trace!(direction = direction.as_str(), error = %e, "Half-close failed");
    }

    if let Some(e) = &stats.error {
        metrics.record_error();
        tracing::debug!(
            direction = direction.as_str(),
            bytes = stats.bytes,
            error = %e,
            "Relay direction ended with error"
        );
    }

    (stats, reader, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Relay between two in-memory pipes; returns the outer ends.
    fn start_relay() -> (
        tokio::io::DuplexStream,
        tokio::io::DuplexStream,
        tokio::task::JoinHandle<RelayStats>,
        Arc<ProxyMetrics>,
    ) {
        let (client, a) = duplex(8 * 1024);
        let (b, server) = duplex(8 * 1024);
        let metrics = Arc::new(ProxyMetrics::new("relay_test"));
        let handle = tokio::spawn(relay(a, b, metrics.clone()));
        (client, server, handle, metrics)
    }

    async fn round_trip(len: usize) {
        let (mut client, mut server, handle, metrics) = start_relay();
        let request = payload(len);
        let response: Vec<u8> = payload(len).into_iter().rev().collect();

        let sent = request.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&sent).await.unwrap();
            client.shutdown().await.unwrap();
            let mut received = Vec::new();
            client.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut at_server = Vec::new();
        server.read_to_end(&mut at_server).await.unwrap();
        assert_eq!(at_server, request);
        server.write_all(&response).await.unwrap();
        server.shutdown().await.unwrap();

        assert_eq!(writer.await.unwrap(), response);

        let stats = handle.await.unwrap();
        assert_eq!(stats.upstream.bytes, len as u64);
        assert_eq!(stats.downstream.bytes, len as u64);
        assert!(stats.upstream.error.is_none());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_sent, len as u64);
        assert_eq!(snapshot.bytes_received, len as u64);
    }

    #[tokio::test]
    async fn empty_payload_round_trip() {
        round_trip(0).await;
    }

    #[tokio::test]
    async fn single_byte_round_trip() {
        round_trip(1).await;
    }

    #[tokio::test]
    async fn large_payload_round_trip() {
        round_trip(200 * 1024).await;
    }

    #[tokio::test]
    async fn finishes_second_direction_after_first_eof() {
        let (mut client, mut server, handle, _) = start_relay();

        client.write_all(b"GET").await.unwrap();
        client.shutdown().await.unwrap();

        let mut request = Vec::new();
        server.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"GET");

        // Upstream is finished; downstream keeps streaming in chunks.
        let body = payload(96 * 1024);
        let chunks = body.clone();
        let producer = tokio::spawn(async move {
            for chunk in chunks.chunks(4096) {
                server.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            server.shutdown().await.unwrap();
        });

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        producer.await.unwrap();

        assert_eq!(received.len(), body.len());
        assert_eq!(received, body);
        let stats = handle.await.unwrap();
        assert_eq!(stats.downstream.bytes, body.len() as u64);
    }

    #[tokio::test]
    async fn relay_waits_for_both_directions() {
        let (mut client, mut server, handle, _) = start_relay();

        client.shutdown().await.unwrap();
        let mut sink = Vec::new();
        server.read_to_end(&mut sink).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        server.shutdown().await.unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.upstream.bytes, 0);
        assert_eq!(stats.downstream.bytes, 0);
    }

    #[tokio::test]
    async fn direction_error_is_counted_not_propagated() {
        let (client, mut server, handle, metrics) = start_relay();

        // Dropping the client makes downstream writes fail.
        drop(client);
        let _ = server.write_all(b"late data").await;
        let _ = server.shutdown().await;

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(stats.downstream.error.is_some());
        assert!(metrics.snapshot().errors >= 1);
    }
}
