//! Edge tunnel server.
//!
//! Terminates the dispatcher's mTLS connection, accepts CONNECT and dials
//! the destination.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_rustls::TlsAcceptor;

use proxy_dispatcher::config::{load_edge_config, validate_edge, ConfigError, EdgeConfig};
use proxy_dispatcher::edge::{EdgeHandler, EdgeServer};
use proxy_dispatcher::lifecycle::{spawn_signal_handler, Shutdown};
use proxy_dispatcher::net::tls::{edge_server_config, read_pem, CaPool};
use proxy_dispatcher::net::{ConnectionTracker, Listener};
use proxy_dispatcher::observability::logging::init_logging;
use proxy_dispatcher::observability::metrics::{init_metrics, ProxyMetrics, EDGE_PREFIX};

#[derive(Parser)]
#[command(name = "edge-proxy")]
#[command(about = "mTLS CONNECT tunnel server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTPS network address
    #[arg(long)]
    addr: Option<String>,

    /// Certificate PEM file
    #[arg(long)]
    certfile: Option<String>,

    /// Key PEM file
    #[arg(long)]
    keyfile: Option<String>,

    /// Client CA PEM file (defaults to the certificate file)
    #[arg(long)]
    cafile: Option<String>,
}

fn load_config(args: &Args) -> Result<EdgeConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_edge_config(path)?,
        None => EdgeConfig::default(),
    };

    if let Some(addr) = &args.addr {
        // ":3128" binds every interface.
        config.listener.bind_address = match addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => addr.clone(),
        };
    }
    if let Some(cert) = &args.certfile {
        config.tls.cert_path = cert.clone();
    }
    if let Some(key) = &args.keyfile {
        config.tls.key_path = key.clone();
    }
    if let Some(ca) = &args.cafile {
        config.tls.ca_path = Some(ca.clone());
    }

    validate_edge(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-proxy starting");

    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_address.parse()?);
    }

    let ca_pool = CaPool::load(Path::new(config.tls.ca_path()))?;
    tracing::info!(path = %config.tls.ca_path(), anchors = ca_pool.len(), "CA pool loaded");

    let tls_config = edge_server_config(
        &read_pem(Path::new(&config.tls.cert_path))?,
        &read_pem(Path::new(&config.tls.key_path))?,
        &ca_pool,
        config.verify_client_at_handshake,
    )?;

    let handler = Arc::new(EdgeHandler::new(
        ca_pool,
        Arc::new(ProxyMetrics::new(EDGE_PREFIX)),
        config.connect_timeout(),
        config.handshake_timeout(),
        config.max_head_bytes,
    ));

    let listener = Listener::bind(&config.listener).await?;
    let server = EdgeServer::new(
        listener,
        TlsAcceptor::from(tls_config),
        handler,
        config.handshake_timeout(),
        ConnectionTracker::new(),
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    server
        .run(shutdown.subscribe(), config.shutdown.drain_timeout())
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
