//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from building [`Settings`](super::Settings).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a settings file.
    #[error("Failed to read settings file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML settings file.
    #[error("Failed to parse settings file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A required option was not given.
    #[error("Missing required option: {0}")]
    Missing(&'static str),

    /// A file the tunnel client needs cannot be opened.
    #[error("{what} {path} is not readable: {source}")]
    Unreadable {
        /// Which file ("Tunnel client config", "Credentials file").
        what: &'static str,
        /// Path of the file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// The option name.
        field: String,
        /// Why it is invalid.
        message: String,
    },
}
