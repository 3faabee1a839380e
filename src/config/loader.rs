//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::config::schema::{DispatcherConfig, EdgeConfig};
use crate::config::validation::{validate_dispatcher, validate_edge, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Load and validate a dispatcher configuration from a TOML file.
pub fn load_dispatcher_config(path: &Path) -> Result<DispatcherConfig, ConfigError> {
    let config: DispatcherConfig = parse(path)?;
    validate_dispatcher(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate an edge server configuration from a TOML file.
pub fn load_edge_config(path: &Path) -> Result<EdgeConfig, ConfigError> {
    let config: EdgeConfig = parse(path)?;
    validate_edge(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
