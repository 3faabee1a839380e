//! Dispatcher protocol handler.
//!
//! # Responsibilities
//! - Drive one client connection through the tunnel state machine
//! - Answer failures with a status line and JSON payload, then close
//! - Hand established tunnels to the relay
//!
//! # Data Flow
//! ```text
//! client head
//!     → Authenticating     (Proxy-Authorization → Project)
//!     → SelectingBackend   (atomic LRU claim)
//!     → DialingBackend     (pinned mTLS to the instance)
//!     → SendingConnect     (CONNECT host:port)
//!     → AwaitingBackendAck (must be exactly "HTTP/1.1 200 OK")
//!     → Established        (hijack client, 200 or forwarded request)
//!     → relay → Closed
//!
//! any step → Failed(reason) → error response → close
//! ```
//!
//! # Design Decisions
//! - The backend stream is owned by the dialing step, so every failure after
//!   the dial drops (closes) it before the error is answered
//! - Bytes already buffered from either peer are relayed, never discarded

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::error::DispatchError;
use crate::http::request::{read_head, HeadError, RequestHead, TunnelTarget};
use crate::http::response::{connect_request, error_response, BACKEND_ACK, CONNECTION_ESTABLISHED};
use crate::load_balancer::BackendSelector;
use crate::net::connection::ConnectionId;
use crate::net::pinned::{self, PinnedConnectors};
use crate::net::relay::relay;
use crate::observability::metrics::ProxyMetrics;
use crate::repository::BackendInstance;
use crate::security::access::{Authenticator, PROXY_AUTHORIZATION};

/// Where a tunnel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Authenticating,
    SelectingBackend,
    DialingBackend,
    SendingConnect,
    AwaitingBackendAck,
    Established,
    Closed,
    Failed(&'static str),
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Authenticating => f.write_str("AUTHENTICATING"),
            TunnelState::SelectingBackend => f.write_str("SELECTING_BACKEND"),
            TunnelState::DialingBackend => f.write_str("DIALING_BACKEND"),
            TunnelState::SendingConnect => f.write_str("SENDING_CONNECT"),
            TunnelState::AwaitingBackendAck => f.write_str("AWAITING_BACKEND_ACK"),
            TunnelState::Established => f.write_str("ESTABLISHED"),
            TunnelState::Closed => f.write_str("CLOSED"),
            TunnelState::Failed(reason) => write!(f, "FAILED({})", reason),
        }
    }
}

/// Everything a tunnel needs, shared by all connections.
#[derive(Debug)]
pub struct Dispatcher {
    pub authenticator: Authenticator,
    pub selector: BackendSelector,
    pub connectors: PinnedConnectors,
    pub metrics: Arc<ProxyMetrics>,
    pub settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        authenticator: Authenticator,
        selector: BackendSelector,
        metrics: Arc<ProxyMetrics>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            authenticator,
            selector,
            connectors: PinnedConnectors::new(),
            metrics,
            settings,
        }
    }

    /// Serve one accepted client connection to completion.
    pub async fn handle<S>(self: Arc<Self>, stream: S, peer: SocketAddr, connection_id: ConnectionId)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "tunnel",
            session_id = %session_id,
            connection_id = %connection_id,
            peer = %peer
        );
        self.serve(stream).instrument(span).await
    }

    async fn serve<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(stream);
        let head_read = tokio::time::timeout(
            self.settings.request_head_timeout(),
            read_head(&mut reader, self.settings.max_head_bytes),
        )
        .await;
        let mut client = ClientConnection::new(reader);

        let raw = match head_read {
            Ok(Ok(raw)) => raw,
            Ok(Err(HeadError::Closed)) => {
                tracing::trace!("Client closed before sending a request");
                return;
            }
            Ok(Err(HeadError::Io(e))) => {
                tracing::debug!(error = %e, "Failed to read request head");
                return;
            }
            Ok(Err(e)) => {
                self.metrics.record_request();
                let err = DispatchError::MalformedRequest(e.to_string());
                self.reject(&mut client, &err, None).await;
                return;
            }
            Err(_) => {
                tracing::debug!("Timed out waiting for request head");
                return;
            }
        };

        self.metrics.record_request();

        let request = match RequestHead::parse(&raw).and_then(|head| {
            let target = head.tunnel_target()?;
            Ok((head, target))
        }) {
            Ok(request) => request,
            Err(e) => {
                let err = DispatchError::MalformedRequest(e.to_string());
                self.reject(&mut client, &err, None).await;
                return;
            }
        };
        let (head, target) = request;

        tracing::debug!(method = %head.method, target = %head.target, "Request received");

        let mut state = TunnelState::Authenticating;
        match self.establish(&mut client, &head, &target, &mut state).await {
            Ok((downstream, upstream)) => {
                let stats = relay(downstream, upstream, self.metrics.clone()).await;
                transition(&mut state, TunnelState::Closed);
                tracing::info!(
                    target = %target.host_port(),
                    bytes_sent = stats.upstream.bytes,
                    bytes_received = stats.downstream.bytes,
                    "Tunnel closed"
                );
            }
            Err(err) => {
                transition(&mut state, TunnelState::Failed(err.error_id()));
                self.reject(&mut client, &err, Some(&head)).await;
            }
        }
    }

    /// Run the state machine up to `Established`.
    ///
    /// Returns the raw client stream and the acknowledged backend stream.
    async fn establish<S>(
        &self,
        client: &mut ClientConnection<S>,
        head: &RequestHead,
        target: &TunnelTarget,
        state: &mut TunnelState,
    ) -> Result<(BufReader<S>, BufReader<TlsStream<TcpStream>>), DispatchError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let project = self
            .authenticator
            .authenticate(head.header(PROXY_AUTHORIZATION))
            .await?;

        transition(state, TunnelState::SelectingBackend);
        let instance = self.selector.select(&project).await?;
        tracing::debug!(
            project_id = %project.id,
            instance_id = %instance.id,
            request_count = instance.request_count,
            "Backend claimed"
        );

        transition(state, TunnelState::DialingBackend);
        let backend = self.dial(&instance).await?;
        let mut backend = BufReader::new(backend);

        let deadline = Instant::now() + self.settings.handshake_timeout();
        let timed_out = |_| DispatchError::ProtocolViolation("timed out waiting for backend".into());

        transition(state, TunnelState::SendingConnect);
        tokio::time::timeout_at(deadline, send_connect(&mut backend, &target.host_port()))
            .await
            .map_err(timed_out)??;

        transition(state, TunnelState::AwaitingBackendAck);
        tokio::time::timeout_at(deadline, await_ack(&mut backend))
            .await
            .map_err(timed_out)??;

        let mut downstream = client.hijack()?;
        transition(state, TunnelState::Established);

        let preamble = if head.is_connect() || target.is_https() {
            write_flush(&mut downstream, CONNECTION_ESTABLISHED).await
        } else {
            write_flush(&mut backend, &head.to_forwarded(target)).await
        };
        if let Err(e) = preamble {
            // The client no longer has an HTTP response pending.
            tracing::debug!(error = %e, "Failed to start tunnel");
        }

        Ok((downstream, backend))
    }

    async fn dial(&self, instance: &BackendInstance) -> Result<TlsStream<TcpStream>, DispatchError> {
        let connector = self
            .connectors
            .connector(&instance.id, &instance.certificate)
            .map_err(|e| DispatchError::BackendDial(e.to_string()))?;

        let host = self
            .settings
            .dial_host_override
            .as_deref()
            .unwrap_or(&instance.address.hostname);

        pinned::dial(&connector, host, instance.address.port, self.settings.connect_timeout())
            .await
            .map_err(|e| {
                tracing::warn!(
                    instance_id = %instance.id,
                    host = %host,
                    port = instance.address.port,
                    error = %e,
                    "Backend dial failed"
                );
                DispatchError::BackendDial(e.to_string())
            })
    }

    /// Count the failure and answer it unless the response already started.
    async fn reject<S>(&self, client: &mut ClientConnection<S>, err: &DispatchError, head: Option<&RequestHead>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.metrics.record_error();
        match err.status() {
            500 => tracing::error!(error = %err, id = err.error_id(), "Tunnel failed"),
            _ => tracing::warn!(error = %err, id = err.error_id(), "Request rejected"),
        }

        let response = error_response(err, head, self.authenticator.scheme());
        client.respond(&response).await;
    }
}

fn transition(state: &mut TunnelState, next: TunnelState) {
    tracing::debug!(from = %state, to = %next, "Tunnel state");
    *state = next;
}

async fn write_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn send_connect<B>(backend: &mut B, host_port: &str) -> Result<(), DispatchError>
where
    B: AsyncWrite + Unpin,
{
    write_flush(backend, &connect_request(host_port))
        .await
        .map_err(|e| DispatchError::ProtocolViolation(e.to_string()))
}

/// Require the literal acknowledgement line.
///
/// The rest of the backend's response head is consumed; anything after it
/// stays buffered for the relay.
async fn await_ack<B>(backend: &mut B) -> Result<(), DispatchError>
where
    B: AsyncBufRead + Unpin,
{
    let violation = |e: std::io::Error| DispatchError::ProtocolViolation(e.to_string());

    let mut line = String::new();
    backend.read_line(&mut line).await.map_err(violation)?;
    let status = line.trim_end_matches(['\r', '\n']);
    if status != BACKEND_ACK {
        tracing::warn!(line = %status, "Backend returned a non 200 response");
        return Err(DispatchError::ProtocolViolation(status.to_string()));
    }

    loop {
        line.clear();
        let n = backend.read_line(&mut line).await.map_err(violation)?;
        if n == 0 || line == "\r\n" || line == "\n" {
            return Ok(());
        }
    }
}

/// The client socket, framed until it is hijacked.
struct ClientConnection<S> {
    stream: Option<BufReader<S>>,
    response_started: bool,
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: BufReader<S>) -> Self {
        Self {
            stream: Some(stream),
            response_started: false,
        }
    }

    /// Take raw control of the socket, including bytes already buffered.
    fn hijack(&mut self) -> Result<BufReader<S>, DispatchError> {
        if self.response_started {
            return Err(DispatchError::HijackUnsupported);
        }
        self.stream.take().ok_or(DispatchError::HijackUnsupported)
    }

    /// Write a complete response and close, once.
    async fn respond(&mut self, response: &[u8]) {
        if self.response_started {
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        self.response_started = true;

        if let Err(e) = stream.write_all(response).await {
            tracing::debug!(error = %e, "Failed to write error response");
            return;
        }
        let _ = stream.shutdown().await;
    }
}
