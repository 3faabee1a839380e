//! Edge mTLS listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::edge::handler::EdgeHandler;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};

/// Accepts dispatcher connections and serves them with an `EdgeHandler`.
pub struct EdgeServer {
    listener: Listener,
    acceptor: TlsAcceptor,
    handler: Arc<EdgeHandler>,
    handshake_timeout: Duration,
    tracker: ConnectionTracker,
}

impl EdgeServer {
    pub fn new(
        listener: Listener,
        acceptor: TlsAcceptor,
        handler: Arc<EdgeHandler>,
        handshake_timeout: Duration,
        tracker: ConnectionTracker,
    ) -> Self {
        Self {
            listener,
            acceptor,
            handler,
            handshake_timeout,
            tracker,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then drain open tunnels.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>, drain_timeout: Duration) {
        tracing::info!(
            address = ?self.listener.local_addr().ok(),
            "Edge server accepting connections"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer, permit)) => {
                            let guard = self.tracker.track();
                            let span = tracing::info_span!(
                                "edge",
                                connection_id = %guard.id(),
                                peer = %peer
                            );
                            let acceptor = self.acceptor.clone();
                            let handler = self.handler.clone();
                            let timeout = self.handshake_timeout;
                            tokio::spawn(
                                async move {
                                    serve_tls(acceptor, handler, stream, timeout).await;
                                    drop(guard);
                                    drop(permit);
                                }
                                .instrument(span),
                            );
                        }
                        Err(ListenerError::Closed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Edge server stopped accepting");
                    break;
                }
            }
        }

        let remaining = self.tracker.drain(drain_timeout).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Drain timeout reached with tunnels still open");
        }
    }
}

async fn serve_tls(acceptor: TlsAcceptor, handler: Arc<EdgeHandler>, stream: TcpStream, timeout: Duration) {
    let tls = match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "TLS handshake failed");
            handler.metrics().record_error();
            return;
        }
        Err(_) => {
            tracing::debug!("TLS handshake timed out");
            handler.metrics().record_error();
            return;
        }
    };

    let peer_chain = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
        .unwrap_or_default();

    tracing::debug!("Accepted TLS connection");
    handler.serve(tls, peer_chain).await;
    tracing::debug!("Closing connection");
}
