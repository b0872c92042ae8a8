//! Audit event types.
//!
//! Events mark the killswitch and supervisor transitions an operator would
//! want in a central log: when protection went up, when it did not, and how
//! the tunnel client ended.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Security-relevant events written to syslog.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Supervisor started the tunnel client.
    SupervisorStart {
        /// Tunnel client binary.
        binary: String,
        /// Client configuration path.
        config: String,
        /// Process ID of the tunnel client.
        pid: u32,
        /// Whether the killswitch is enabled.
        kill_switch: bool,
    },

    /// Tunnel client exited and the supervisor is done.
    SupervisorStop {
        /// Exit code propagated by the supervisor.
        exit_code: i32,
        /// Run time in seconds.
        duration_sec: u64,
    },

    /// Tunnel routed and client alive.
    TunnelReady {
        /// Tunnel interface.
        interface: String,
    },

    /// Readiness budget spent or client died early.
    ReadinessFailed {
        /// Tunnel interface.
        interface: String,
        /// Why readiness failed.
        reason: String,
    },

    /// Deny-by-default rules installed.
    KillswitchApplied {
        /// Tunnel interface.
        interface: String,
        /// Network exempted from the catch-all.
        container_subnet: String,
        /// Number of rules installed by this run.
        rules: usize,
    },

    /// Killswitch not installed.
    KillswitchSkipped {
        /// Tunnel interface.
        interface: String,
        /// Why nothing was installed.
        reason: String,
    },

    /// Tunnel route was not seen twice in a row; rules installed anyway.
    RouteUnstable {
        /// Tunnel interface.
        interface: String,
    },

    /// Allowed-subnet entry failed validation.
    SubnetRejected {
        /// The entry as given.
        entry: String,
    },

    /// A tunnel endpoint could not be exempted.
    EndpointUncovered {
        /// Host from the `remote` directive.
        host: String,
        /// Port from the `remote` directive.
        port: u16,
    },

    /// Tunnel client ignored the graceful signal and was killed.
    ShutdownEscalated {
        /// Process ID of the tunnel client.
        pid: u32,
        /// Grace period that elapsed, in seconds.
        grace_sec: u64,
    },
}

/// An event with its emission time.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The event, flattened.
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Stamp this event with the current time.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_start_serialization() {
        let event = AuditEvent::SupervisorStart {
            binary: "/usr/sbin/openvpn".to_string(),
            config: "/config/client.ovpn".to_string(),
            pid: 4242,
            kill_switch: true,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"supervisor_start\""));
        assert!(json.contains("\"binary\":\"/usr/sbin/openvpn\""));
        assert!(json.contains("\"pid\":4242"));
        assert!(json.contains("\"kill_switch\":true"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_killswitch_applied_serialization() {
        let event = AuditEvent::KillswitchApplied {
            interface: "tun0".to_string(),
            container_subnet: "172.18.0.0/16".to_string(),
            rules: 4,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"killswitch_applied\""));
        assert!(json.contains("\"container_subnet\":\"172.18.0.0/16\""));
        assert!(json.contains("\"rules\":4"));
    }

    #[test]
    fn test_subnet_rejected_serialization() {
        let event = AuditEvent::SubnetRejected {
            entry: "not-a-cidr".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();
        assert!(json.contains("\"event\":\"subnet_rejected\""));
        assert!(json.contains("\"entry\":\"not-a-cidr\""));
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let event = AuditEvent::TunnelReady {
            interface: "tun0".to_string(),
        };

        let value = serde_json::to_value(event.with_timestamp()).unwrap();
        let ts = value["ts"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
