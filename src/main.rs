//! Proxy dispatcher.
//!
//! # Startup
//!
//! ```text
//! CLI args → config file (optional) → validate
//!     → logging, metrics exporter
//!     → repository (seed) → ping
//!     → authenticator + selector → dispatcher
//!     → collector, admin API, signal handler
//!     → accept loop until SIGINT/SIGTERM → drain
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use proxy_dispatcher::admin::{serve_admin, AdminState};
use proxy_dispatcher::config::{load_dispatcher_config, validate_dispatcher, ConfigError, DispatcherConfig};
use proxy_dispatcher::http::{Dispatcher, DispatcherServer};
use proxy_dispatcher::lifecycle::{spawn_signal_handler, Shutdown};
use proxy_dispatcher::load_balancer::BackendSelector;
use proxy_dispatcher::net::{ConnectionTracker, Listener};
use proxy_dispatcher::observability::collector::spawn_collector;
use proxy_dispatcher::observability::logging::init_logging;
use proxy_dispatcher::observability::metrics::{init_metrics, ProxyMetrics, DISPATCHER_PREFIX};
use proxy_dispatcher::repository::{InMemoryRepository, Repository};
use proxy_dispatcher::security::Authenticator;

#[derive(Parser)]
#[command(name = "proxy-dispatcher")]
#[command(about = "Authenticating dispatcher in front of edge tunnel servers", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides listener.bind_address
    #[arg(long)]
    addr: Option<String>,

    /// Repository seed file, overrides repository.seed_path
    #[arg(long)]
    seed: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<DispatcherConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_dispatcher_config(path)?,
        None => DispatcherConfig::default(),
    };

    if let Some(addr) = &args.addr {
        config.listener.bind_address = addr.clone();
    }
    if let Some(seed) = &args.seed {
        config.repository.seed_path = Some(seed.display().to_string());
    }

    validate_dispatcher(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "proxy-dispatcher starting");

    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_address.parse()?);
    }

    let repository: Arc<dyn Repository> = match &config.repository.seed_path {
        Some(path) => Arc::new(InMemoryRepository::from_seed_file(Path::new(path))?),
        None => {
            tracing::warn!("No repository seed configured; starting empty");
            Arc::new(InMemoryRepository::new())
        }
    };
    repository.ping().await?;

    let metrics = Arc::new(ProxyMetrics::new(DISPATCHER_PREFIX));
    let dispatcher = Arc::new(Dispatcher::new(
        Authenticator::new(repository.clone(), config.dispatcher.auth_scheme.clone()),
        BackendSelector::new(repository.clone()),
        metrics.clone(),
        config.dispatcher.clone(),
    ));

    let shutdown = Shutdown::new();
    let tracker = ConnectionTracker::new();

    spawn_collector(
        repository.clone(),
        metrics.clone(),
        Duration::from_secs(config.observability.collect_interval_secs),
        shutdown.subscribe(),
    );

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            repository: repository.clone(),
            metrics: metrics.clone(),
            tracker: tracker.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = DispatcherServer::new(listener, dispatcher, tracker);

    spawn_signal_handler(shutdown.clone());
    server
        .run(shutdown.subscribe(), config.shutdown.drain_timeout())
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
