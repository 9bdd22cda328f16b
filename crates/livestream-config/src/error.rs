//! Error types for the configuration module.

use thiserror::Error;

/// Errors that can occur while building a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A parameter is outside the supported set.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
