//! Audit trail for tunnel-guard.
//!
//! Killswitch and supervisor transitions are written to syslog under the
//! `TUNNEL_GUARD` tag as one JSON object per line:
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"killswitch_applied","interface":"tun0","container_subnet":"172.18.0.0/16","rules":4}
//! ```
//!
//! This is separate from the `tracing` output on stderr, which is meant for
//! whoever is watching the container log.
//!
//! ```ignore
//! use tunnel_guard::telemetry::{self, AuditEvent};
//!
//! if let Err(e) = telemetry::init_logger() {
//!     tracing::debug!("Audit trail disabled: {}", e);
//! }
//! telemetry::audit().log(AuditEvent::TunnelReady { interface: "tun0".into() });
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::AuditEvent;
pub use syslog::{audit, init_logger, AuditLogger, SYSLOG_TAG};
