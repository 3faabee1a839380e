//! Configuration schema definitions.
//!
//! Two roots, one per binary: `DispatcherConfig` and `EdgeConfig`. Every
//! field has a default so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Client-facing listener.
    pub listener: ListenerConfig,

    /// Authentication and backend dialing.
    pub dispatcher: DispatchSettings,

    /// Repository backing store.
    pub repository: RepositoryConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Admin API.
    pub admin: AdminConfig,

    /// Graceful shutdown.
    pub shutdown: ShutdownConfig,
}

/// Root configuration for the edge tunnel server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// mTLS listener.
    pub listener: ListenerConfig,

    /// Server identity and client CA pool.
    pub tls: EdgeTlsConfig,

    /// Also verify client certificates during the TLS handshake.
    pub verify_client_at_handshake: bool,

    /// Destination dial timeout.
    pub connect_timeout_secs: u64,

    /// TLS handshake and request head deadline.
    pub handshake_timeout_secs: u64,

    /// Largest accepted request head.
    pub max_head_bytes: usize,

    pub observability: ObservabilityConfig,

    pub shutdown: ShutdownConfig,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig {
                bind_address: "0.0.0.0:3128".to_string(),
                ..ListenerConfig::default()
            },
            tls: EdgeTlsConfig::default(),
            verify_client_at_handshake: false,
            connect_timeout_secs: 60,
            handshake_timeout_secs: 10,
            max_head_bytes: 8192,
            observability: ObservabilityConfig {
                metrics_address: "0.0.0.0:8091".to_string(),
                ..ObservabilityConfig::default()
            },
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl EdgeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Dispatcher protocol settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Expected scheme of the Proxy-Authorization header.
    pub auth_scheme: String,

    /// TCP connect plus TLS handshake to a backend instance.
    pub connect_timeout_secs: u64,

    /// CONNECT exchange with a backend instance.
    pub handshake_timeout_secs: u64,

    /// Deadline for a client to send its request head.
    pub request_head_timeout_secs: u64,

    /// Largest accepted client request head.
    pub max_head_bytes: usize,

    /// Dial this host instead of each instance's hostname (local testing).
    pub dial_host_override: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            auth_scheme: "Basic".to_string(),
            connect_timeout_secs: 10,
            handshake_timeout_secs: 30,
            request_head_timeout_secs: 30,
            max_head_bytes: 64 * 1024,
            dial_host_override: None,
        }
    }
}

impl DispatchSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn request_head_timeout(&self) -> Duration {
        Duration::from_secs(self.request_head_timeout_secs)
    }
}

/// Repository configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RepositoryConfig {
    /// TOML file with `[[projects]]` and `[[instances]]` to load at startup.
    pub seed_path: Option<String>,
}

/// Edge server TLS material.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeTlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Client CA bundle; the server certificate itself when absent.
    pub ca_path: Option<String>,
}

impl Default for EdgeTlsConfig {
    fn default() -> Self {
        Self {
            cert_path: "certificate.pem".to_string(),
            key_path: "certificate.key".to_string(),
            ca_path: None,
        }
    }
}

impl EdgeTlsConfig {
    pub fn ca_path(&self) -> &str {
        self.ca_path.as_deref().unwrap_or(&self.cert_path)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Seconds between instance gauge refreshes.
    pub collect_interval_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:8090".to_string(),
            collect_interval_secs: 15,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight tunnels may keep running after a stop signal.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout_secs: 30 }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}
