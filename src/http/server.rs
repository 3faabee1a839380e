//! Dispatcher server.
//!
//! # Responsibilities
//! - Accept client connections through the bounded listener
//! - Spawn one task per connection running the protocol handler
//! - Stop accepting on shutdown, then drain in-flight tunnels

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::http::handler::Dispatcher;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};

/// Client-facing proxy server.
pub struct DispatcherServer {
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    tracker: ConnectionTracker,
}

impl DispatcherServer {
    pub fn new(listener: Listener, dispatcher: Arc<Dispatcher>, tracker: ConnectionTracker) -> Self {
        Self {
            listener,
            dispatcher,
            tracker,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then wait up to `drain_timeout` for
    /// open tunnels.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>, drain_timeout: Duration) {
        tracing::info!(
            address = ?self.listener.local_addr().ok(),
            "Dispatcher accepting connections"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer, permit)) => {
                            let dispatcher = self.dispatcher.clone();
                            let guard = self.tracker.track();
                            tokio::spawn(async move {
                                dispatcher.handle(stream, peer, guard.id()).await;
                                drop(guard);
                                drop(permit);
                            });
                        }
                        Err(ListenerError::Closed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Dispatcher stopped accepting");
                    break;
                }
            }
        }

        let remaining = self.tracker.drain(drain_timeout).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Drain timeout reached with tunnels still open");
        } else {
            tracing::info!("All tunnels drained");
        }
    }
}
