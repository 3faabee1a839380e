//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of the config
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{
    AdminConfig, DispatcherConfig, EdgeConfig, ListenerConfig, ObservabilityConfig, ShutdownConfig,
};

const MIN_HEAD_BYTES: usize = 1024;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Default)]
struct Errors(Vec<ValidationError>);

impl Errors {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(ValidationError::new(field, message));
    }

    fn address(&mut self, field: &str, value: &str) {
        if value.parse::<SocketAddr>().is_err() {
            self.push(field, format!("'{}' is not a socket address", value));
        }
    }

    fn positive(&mut self, field: &str, value: u64) {
        if value == 0 {
            self.push(field, "must be greater than 0");
        }
    }

    fn head_limit(&mut self, field: &str, value: usize) {
        if value < MIN_HEAD_BYTES {
            self.push(field, format!("must be at least {}", MIN_HEAD_BYTES));
        }
    }

    fn listener(&mut self, listener: &ListenerConfig) {
        self.address("listener.bind_address", &listener.bind_address);
        if listener.max_connections == 0 {
            self.push("listener.max_connections", "must be greater than 0");
        }
    }

    fn observability(&mut self, observability: &ObservabilityConfig) {
        if observability.log_level.trim().is_empty() {
            self.push("observability.log_level", "must not be empty");
        }
        if observability.metrics_enabled {
            self.address("observability.metrics_address", &observability.metrics_address);
        }
        self.positive(
            "observability.collect_interval_secs",
            observability.collect_interval_secs,
        );
    }

    fn admin(&mut self, admin: &AdminConfig) {
        if !admin.enabled {
            return;
        }
        self.address("admin.bind_address", &admin.bind_address);
        if admin.api_key.trim().is_empty() {
            self.push("admin.api_key", "must be set when the admin API is enabled");
        }
    }

    fn shutdown(&mut self, shutdown: &ShutdownConfig) {
        self.positive("shutdown.drain_timeout_secs", shutdown.drain_timeout_secs);
    }

    fn finish(self) -> Result<(), Vec<ValidationError>> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self.0)
        }
    }
}

/// Validate a dispatcher configuration.
pub fn validate_dispatcher(config: &DispatcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Errors::default();
    errors.listener(&config.listener);

    let settings = &config.dispatcher;
    if settings.auth_scheme.is_empty() || settings.auth_scheme.contains(char::is_whitespace) {
        errors.push(
            "dispatcher.auth_scheme",
            "must be a single non-empty word",
        );
    }
    errors.positive("dispatcher.connect_timeout_secs", settings.connect_timeout_secs);
    errors.positive("dispatcher.handshake_timeout_secs", settings.handshake_timeout_secs);
    errors.positive(
        "dispatcher.request_head_timeout_secs",
        settings.request_head_timeout_secs,
    );
    errors.head_limit("dispatcher.max_head_bytes", settings.max_head_bytes);
    if let Some(host) = &settings.dial_host_override {
        if host.trim().is_empty() {
            errors.push("dispatcher.dial_host_override", "must not be empty");
        }
    }

    errors.observability(&config.observability);
    errors.admin(&config.admin);
    errors.shutdown(&config.shutdown);
    errors.finish()
}

/// Validate an edge server configuration.
pub fn validate_edge(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Errors::default();
    errors.listener(&config.listener);

    if config.tls.cert_path.trim().is_empty() {
        errors.push("tls.cert_path", "must not be empty");
    }
    if config.tls.key_path.trim().is_empty() {
        errors.push("tls.key_path", "must not be empty");
    }
    errors.positive("connect_timeout_secs", config.connect_timeout_secs);
    errors.positive("handshake_timeout_secs", config.handshake_timeout_secs);
    errors.head_limit("max_head_bytes", config.max_head_bytes);

    errors.observability(&config.observability);
    errors.shutdown(&config.shutdown);
    errors.finish()
}
