//! Error types for tunnel client supervision.

use thiserror::Error;

/// Errors from starting, signalling or reaping the tunnel client.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The client binary could not be located.
    #[error("Tunnel client '{binary}' not found: {reason}")]
    BinaryNotFound {
        /// Binary as configured.
        binary: String,
        /// Why it could not be resolved.
        reason: String,
    },

    /// The client could not be spawned.
    #[error("Failed to spawn '{cmd}': {source}")]
    SpawnFailed {
        /// The command line.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The process was used before `start` succeeded.
    #[error("Tunnel client is not running")]
    NotStarted,

    /// Waiting for the client failed.
    #[error("Failed to wait for tunnel client: {0}")]
    WaitFailed(#[source] std::io::Error),

    /// Sending a signal failed.
    #[error("Failed to signal tunnel client: {0}")]
    SignalFailed(#[source] nix::errno::Errno),

    /// Signal handlers could not be installed.
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(#[source] std::io::Error),
}
