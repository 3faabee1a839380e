//! Edge tunnel handler.
//!
//! Runs on an already established mTLS stream: reads the request head,
//! re-verifies the peer certificate on CONNECT, dials the destination and
//! relays.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::EdgeError;
use crate::http::request::{read_head, HeadError, RequestHead};
use crate::http::response::{edge_dial_error, EDGE_INVALID_CERTIFICATE, EDGE_NOT_FOUND, EDGE_OK};
use crate::net::relay::relay;
use crate::net::tls::CaPool;
use crate::observability::metrics::ProxyMetrics;

/// Per-process edge state shared by all connections.
#[derive(Debug)]
pub struct EdgeHandler {
    ca_pool: CaPool,
    metrics: Arc<ProxyMetrics>,
    connect_timeout: Duration,
    head_timeout: Duration,
    max_head_bytes: usize,
}

impl EdgeHandler {
    pub fn new(
        ca_pool: CaPool,
        metrics: Arc<ProxyMetrics>,
        connect_timeout: Duration,
        head_timeout: Duration,
        max_head_bytes: usize,
    ) -> Self {
        Self {
            ca_pool,
            metrics,
            connect_timeout,
            head_timeout,
            max_head_bytes,
        }
    }

    pub fn metrics(&self) -> &Arc<ProxyMetrics> {
        &self.metrics
    }

    /// Serve one connection. `peer_chain` is what the client presented during
    /// the handshake, leaf first.
    pub async fn serve<S>(&self, stream: S, peer_chain: Vec<CertificateDer<'static>>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(stream);

        let head = match tokio::time::timeout(self.head_timeout, read_head(&mut reader, self.max_head_bytes)).await {
            Ok(Ok(raw)) => RequestHead::parse(&raw),
            Ok(Err(HeadError::Closed)) => return,
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::debug!("Timed out waiting for request head");
                return;
            }
        };
        self.metrics.record_request();

        let head = match head {
            Ok(head) => head,
            Err(e) => {
                self.fail(&mut reader, EdgeError::MalformedRequest(e.to_string())).await;
                return;
            }
        };

        if !head.is_connect() {
            self.fail(&mut reader, EdgeError::UnsupportedMethod(head.method.clone())).await;
            return;
        }

        if let Err(e) = self.ca_pool.verify_peer(&peer_chain) {
            self.fail(&mut reader, EdgeError::CertificateVerification(e.to_string())).await;
            return;
        }

        let target = match head.tunnel_target() {
            Ok(target) => target.host_port(),
            Err(e) => {
                self.fail(&mut reader, EdgeError::MalformedRequest(e.to_string())).await;
                return;
            }
        };

        let destination = match self.dial(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(&mut reader, e).await;
                return;
            }
        };

        if let Err(e) = write_flush(&mut reader, EDGE_OK).await {
            self.fail(&mut reader, EdgeError::Io(e)).await;
            return;
        }
        tracing::debug!(target = %target, "Tunnel established");

        let stats = relay(reader, destination, self.metrics.clone()).await;
        tracing::info!(
            target = %target,
            bytes_sent = stats.upstream.bytes,
            bytes_received = stats.downstream.bytes,
            "Tunnel closed"
        );
    }

    async fn dial(&self, target: &str) -> Result<TcpStream, EdgeError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(e)) => Err(EdgeError::Dial(e.to_string())),
            Err(_) => Err(EdgeError::Dial(format!("dial tcp {}: i/o timeout", target))),
        }
    }

    async fn fail<W>(&self, stream: &mut W, err: EdgeError)
    where
        W: AsyncWrite + Unpin,
    {
        self.metrics.record_error();

        let response = match &err {
            EdgeError::CertificateVerification(reason) => {
                tracing::warn!(reason = %reason, "Peer certificate rejected");
                EDGE_INVALID_CERTIFICATE.to_vec()
            }
            EdgeError::Dial(message) => {
                tracing::warn!(error = %message, "Destination dial failed");
                edge_dial_error(message)
            }
            EdgeError::UnsupportedMethod(_) | EdgeError::MalformedRequest(_) => {
                tracing::debug!(error = %err, "Request refused");
                EDGE_NOT_FOUND.to_vec()
            }
            EdgeError::Io(e) => {
                tracing::debug!(error = %e, "Connection failed");
                return;
            }
        };

        if let Err(e) = write_flush(stream, &response).await {
            tracing::debug!(error = %e, "Failed to write response");
        }
        let _ = stream.shutdown().await;
    }
}

async fn write_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
