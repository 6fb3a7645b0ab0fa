/*!
 * Error types for Relay
 */

use std::io;
use thiserror::Error;

use crate::registry::RegistryError;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_INVALID_CONFIG: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Crate-level error for configuration, setup and operator actions.
///
/// Per-request failures never use this type: `execute` returns an
/// [`AggregatedFailure`](crate::orchestrator::AggregatedFailure).
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TOML could not be parsed
    #[error("Failed to parse configuration: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML could not be produced
    #[error("Failed to serialize configuration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Provider registry rejected the descriptors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RelayError::Config(_) | RelayError::TomlParse(_) | RelayError::Registry(_) => {
                EXIT_INVALID_CONFIG
            }
            _ => EXIT_FATAL,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RelayError::Config(_) | RelayError::TomlParse(_) | RelayError::TomlSerialize(_) => {
                "config"
            }
            RelayError::Io(_) => "io",
            RelayError::Registry(_) => "registry",
            RelayError::Metrics(_) => "metrics",
            RelayError::Serialization(_) => "serialization",
        }
    }
}
