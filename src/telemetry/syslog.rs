//! Syslog sink for audit events.
//!
//! Containers frequently have no syslog daemon. In that case the global
//! logger is a null logger and events only show up in the debug log.

use std::sync::{Mutex, OnceLock};

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "TUNNEL_GUARD";

static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Writes audit events to syslog as JSON.
pub struct AuditLogger {
    /// `None` for the null logger.
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
}

impl AuditLogger {
    /// Connect to the local syslog daemon over its Unix socket.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter).map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
        })
    }

    /// A logger that discards everything.
    pub fn new_null() -> Self {
        Self { writer: None }
    }

    /// Log `event` with a timestamp.
    pub fn log(&self, event: AuditEvent) {
        let json = match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        debug!("Audit: {}", json);

        let Some(ref writer) = self.writer else {
            return;
        };

        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.info(&json) {
                    error!("Failed to write to syslog: {}", e);
                }
            }
            Err(e) => error!("Failed to acquire syslog writer lock: {}", e),
        }
    }

    /// Whether this logger discards events.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}

/// Connect the global audit logger to syslog.
///
/// Fails if syslog is unreachable or a logger is already installed.
pub fn init_logger() -> Result<(), TelemetryError> {
    let logger = AuditLogger::new()?;
    AUDIT_LOGGER
        .set(logger)
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

/// The global audit logger, or a null logger if none was initialised.
pub fn audit() -> &'static AuditLogger {
    AUDIT_LOGGER.get_or_init(AuditLogger::new_null)
}
