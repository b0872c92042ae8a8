//! Settings file schema.
//!
//! ```toml
//! [tunnel]
//! binary = "openvpn"
//! config = "/config/client.ovpn"
//! credentials = "/config/auth.txt"
//! interface = "tun0"
//! extra_args = ["--verb", "3"]
//!
//! [killswitch]
//! enabled = true
//! allowed_subnets = ["10.10.0.0/24"]
//!
//! [supervisor]
//! shutdown_grace_secs = 10
//! readiness_attempts = 30
//! readiness_interval_secs = 2
//!
//! [health]
//! target = "1.1.1.1:443"
//! timeout_secs = 5
//! ```
//!
//! Every key is optional. Empty strings and zeros mean "not set".

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SettingsFile {
    /// Tunnel client settings.
    #[serde(default)]
    pub tunnel: TunnelSection,

    /// Killswitch settings.
    #[serde(default)]
    pub killswitch: KillswitchSection,

    /// Supervisor timings.
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Health check settings.
    #[serde(default)]
    pub health: HealthSection,
}

impl SettingsFile {
    /// Layer `other` on top of this file: scalars override when set, lists
    /// append.
    pub fn merge(&mut self, other: SettingsFile) {
        self.tunnel.merge(other.tunnel);
        self.killswitch.merge(other.killswitch);
        self.supervisor.merge(other.supervisor);
        self.health.merge(other.health);
    }
}

/// `[tunnel]`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TunnelSection {
    /// Client binary.
    #[serde(default)]
    pub binary: String,

    /// Client configuration file.
    #[serde(default)]
    pub config: Option<PathBuf>,

    /// Credentials file.
    #[serde(default)]
    pub credentials: Option<PathBuf>,

    /// Tunnel interface name.
    #[serde(default)]
    pub interface: String,

    /// Extra client arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl TunnelSection {
    fn merge(&mut self, other: TunnelSection) {
        if !other.binary.is_empty() {
            self.binary = other.binary;
        }
        if other.config.is_some() {
            self.config = other.config;
        }
        if other.credentials.is_some() {
            self.credentials = other.credentials;
        }
        if !other.interface.is_empty() {
            self.interface = other.interface;
        }
        self.extra_args.extend(other.extra_args);
    }
}

/// `[killswitch]`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KillswitchSection {
    /// Enable the killswitch.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// CIDRs reachable outside the tunnel.
    #[serde(default)]
    pub allowed_subnets: Vec<String>,
}

impl KillswitchSection {
    fn merge(&mut self, other: KillswitchSection) {
        if other.enabled.is_some() {
            self.enabled = other.enabled;
        }
        self.allowed_subnets.extend(other.allowed_subnets);
    }
}

/// `[supervisor]`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SupervisorSection {
    /// Seconds between SIGTERM and SIGKILL.
    #[serde(default)]
    pub shutdown_grace_secs: u64,

    /// Readiness attempts.
    #[serde(default)]
    pub readiness_attempts: u32,

    /// Seconds between readiness attempts.
    #[serde(default)]
    pub readiness_interval_secs: u64,
}

impl SupervisorSection {
    fn merge(&mut self, other: SupervisorSection) {
        if other.shutdown_grace_secs != 0 {
            self.shutdown_grace_secs = other.shutdown_grace_secs;
        }
        if other.readiness_attempts != 0 {
            self.readiness_attempts = other.readiness_attempts;
        }
        if other.readiness_interval_secs != 0 {
            self.readiness_interval_secs = other.readiness_interval_secs;
        }
    }
}

/// `[health]`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthSection {
    /// `host:port` for the reachability check.
    #[serde(default)]
    pub target: String,

    /// Reachability timeout in seconds.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl HealthSection {
    fn merge(&mut self, other: HealthSection) {
        if !other.target.is_empty() {
            self.target = other.target;
        }
        if other.timeout_secs != 0 {
            self.timeout_secs = other.timeout_secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let file: SettingsFile = toml::from_str(
            r#"
            [tunnel]
            binary = "/usr/sbin/openvpn"
            config = "/config/client.ovpn"
            extra_args = ["--verb", "3"]

            [killswitch]
            enabled = true
            allowed_subnets = ["10.10.0.0/24"]

            [supervisor]
            shutdown_grace_secs = 15

            [health]
            target = "9.9.9.9:443"
            "#,
        )
        .unwrap();

        assert_eq!(file.tunnel.binary, "/usr/sbin/openvpn");
        assert_eq!(file.tunnel.config, Some(PathBuf::from("/config/client.ovpn")));
        assert_eq!(file.killswitch.enabled, Some(true));
        assert_eq!(file.supervisor.shutdown_grace_secs, 15);
        assert_eq!(file.supervisor.readiness_attempts, 0);
        assert_eq!(file.health.target, "9.9.9.9:443");
    }

    #[test]
    fn test_empty_file() {
        let file: SettingsFile = toml::from_str("").unwrap();
        assert!(file.tunnel.binary.is_empty());
        assert!(file.killswitch.enabled.is_none());
    }

    #[test]
    fn test_merge_scalars_override_lists_append() {
        let mut base: SettingsFile = toml::from_str(
            r#"
            [tunnel]
            binary = "openvpn"
            extra_args = ["--verb", "3"]
            [killswitch]
            enabled = true
            allowed_subnets = ["10.0.0.0/8"]
            [supervisor]
            shutdown_grace_secs = 10
            "#,
        )
        .unwrap();
        let overlay: SettingsFile = toml::from_str(
            r#"
            [tunnel]
            extra_args = ["--mute-replay-warnings"]
            [killswitch]
            enabled = false
            allowed_subnets = ["192.168.0.0/16"]
            [supervisor]
            shutdown_grace_secs = 20
            "#,
        )
        .unwrap();

        base.merge(overlay);

        assert_eq!(base.tunnel.binary, "openvpn");
        assert_eq!(base.tunnel.extra_args, vec!["--verb", "3", "--mute-replay-warnings"]);
        assert_eq!(base.killswitch.enabled, Some(false));
        assert_eq!(base.killswitch.allowed_subnets, vec!["10.0.0.0/8", "192.168.0.0/16"]);
        assert_eq!(base.supervisor.shutdown_grace_secs, 20);
    }
}
