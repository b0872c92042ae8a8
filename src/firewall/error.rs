//! Error types for killswitch operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::netstate::{NetError, RouteError};

/// Errors from packet-filter and killswitch operations.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// Failed to execute the packet-filter tool.
    #[error("Failed to execute '{cmd}': {source}")]
    CommandFailed {
        /// The command that failed.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The packet-filter tool rejected a command.
    #[error("Command '{cmd}' failed with code {code}: {stderr}")]
    CommandError {
        /// The command that failed.
        cmd: String,
        /// Exit code, -1 if killed by a signal.
        code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// Insert position is past the end of the chain.
    #[error("Cannot insert at position {index} in a chain of {len} rules")]
    InsertOutOfRange {
        /// Requested 1-based position.
        index: usize,
        /// Current chain length.
        len: usize,
    },

    /// A rule kept matching after repeated deletes.
    #[error("Rule '{rule}' still present after {attempts} deletions")]
    RemovalDidNotConverge {
        /// The rule being removed.
        rule: String,
        /// Deletions attempted.
        attempts: usize,
    },

    /// Failed to read the tunnel client configuration.
    #[error("Failed to read tunnel client config {path}: {source}")]
    ClientConfigRead {
        /// Path of the configuration.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required route could not be installed.
    #[error("Required route could not be installed: {0}")]
    Route(#[from] RouteError),

    /// Network state could not be read.
    #[error("Network state unavailable: {0}")]
    Net(#[from] NetError),
}
