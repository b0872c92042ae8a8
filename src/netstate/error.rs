//! Error types for network state observation and route changes.

use thiserror::Error;

/// Errors from reading kernel network state.
#[derive(Debug, Error)]
pub enum NetError {
    /// Failed to execute a command.
    #[error("Failed to execute '{cmd}': {source}")]
    CommandFailed {
        /// The command that failed.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Command returned a non-zero exit status.
    #[error("Command '{cmd}' failed: {stderr}")]
    CommandError {
        /// The command that failed.
        cmd: String,
        /// Standard error output.
        stderr: String,
    },

    /// Command output could not be decoded.
    #[error("Failed to parse output of '{cmd}': {source}")]
    Parse {
        /// The command whose output was malformed.
        cmd: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from adding routes.
///
/// [`RouteError::AlreadyExists`] is a distinct kind so callers can treat it as
/// success without inspecting exit codes or message text.
#[derive(Debug, Error)]
pub enum RouteError {
    /// An identical route is already installed.
    #[error("Route to {destination} already exists")]
    AlreadyExists {
        /// Destination of the route.
        destination: String,
    },

    /// No default gateway is available to route through.
    #[error("No default gateway available")]
    NoDefaultGateway,

    /// The route could not be installed.
    #[error("Failed to add route to {destination}: {detail}")]
    Rejected {
        /// Destination of the route.
        destination: String,
        /// Reason reported by the kernel.
        detail: String,
    },

    /// Reading or changing network state failed.
    #[error(transparent)]
    Net(#[from] NetError),
}
