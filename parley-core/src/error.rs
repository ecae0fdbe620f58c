//! Error types for the Parley core library.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration or dialogue definitions.
#[derive(Error, Debug)]
pub enum ConverseError {
    /// Configuration could not be parsed or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dialogue definition file exists but is not usable.
    #[error("Invalid dialogue definition {path}: {reason}")]
    Definition {
        /// File that failed to load.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Underlying filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for core results.
pub type Result<T> = std::result::Result<T, ConverseError>;
