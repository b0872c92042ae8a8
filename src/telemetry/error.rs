//! Telemetry error types.

use thiserror::Error;

/// Errors from setting up the audit trail.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to connect to syslog.
    #[error("Failed to connect to syslog: {0}")]
    SyslogConnection(String),

    /// Logger already initialized.
    #[error("Audit logger already initialized")]
    AlreadyInitialized,
}
