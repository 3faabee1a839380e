//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI overrides applied by the binary
//!     → DispatcherConfig / EdgeConfig (immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_dispatcher_config, load_edge_config, ConfigError};
pub use schema::{
    AdminConfig, DispatchSettings, DispatcherConfig, EdgeConfig, EdgeTlsConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, RepositoryConfig, ShutdownConfig,
};
pub use validation::{validate_dispatcher, validate_edge, ValidationError};
