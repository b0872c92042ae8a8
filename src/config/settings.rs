//! Resolved runtime settings.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ConfigError;
use crate::health::{DEFAULT_HEALTH_TARGET, DEFAULT_HEALTH_TIMEOUT};
use crate::netstate::{DEFAULT_READINESS_ATTEMPTS, DEFAULT_READINESS_INTERVAL, DEFAULT_TUNNEL_INTERFACE};
use crate::retry::PollBudget;
use crate::supervisor::DEFAULT_GRACE_PERIOD;

/// Default tunnel client binary.
pub const DEFAULT_TUNNEL_BINARY: &str = "openvpn";

/// Immutable settings, built once at startup and passed to components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Tunnel client binary.
    pub binary: String,
    /// Tunnel client configuration file.
    pub client_config: Option<PathBuf>,
    /// Credentials file for `--auth-user-pass`.
    pub credentials: Option<PathBuf>,
    /// Explicit tunnel interface name.
    pub interface: Option<String>,
    /// Extra arguments appended to the client command line.
    pub client_args: Vec<String>,
    /// Whether the killswitch is installed.
    pub kill_switch: bool,
    /// Allowed-subnet entries, unvalidated.
    pub allowed_subnets: Vec<String>,
    /// Time between SIGTERM and SIGKILL.
    pub shutdown_grace: Duration,
    /// Readiness polling budget.
    pub readiness: PollBudget,
    /// Reachability target for the health check.
    pub health_target: String,
    /// Reachability timeout for the health check.
    pub health_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            binary: DEFAULT_TUNNEL_BINARY.to_string(),
            client_config: None,
            credentials: None,
            interface: None,
            client_args: Vec::new(),
            kill_switch: false,
            allowed_subnets: Vec::new(),
            shutdown_grace: DEFAULT_GRACE_PERIOD,
            readiness: PollBudget::new(DEFAULT_READINESS_ATTEMPTS, DEFAULT_READINESS_INTERVAL),
            health_target: DEFAULT_HEALTH_TARGET.to_string(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }
}

impl Settings {
    /// Allowed subnets as the comma list the killswitch takes.
    pub fn allowed_subnets_csv(&self) -> String {
        self.allowed_subnets.join(",")
    }

    /// The client configuration path, which every mode except `health`
    /// needs.
    pub fn require_client_config(&self) -> Result<&Path, ConfigError> {
        self.client_config
            .as_deref()
            .ok_or(ConfigError::Missing("--config / TUNNEL_CONFIG"))
    }

    /// Check that the client config, and the credentials file if given, can
    /// be opened. Existence and content are the client's business.
    pub fn verify_readable(&self) -> Result<(), ConfigError> {
        check_readable("Tunnel client config", self.require_client_config()?)?;
        if let Some(credentials) = &self.credentials {
            check_readable("Credentials file", credentials)?;
        }
        Ok(())
    }

    /// Tunnel interface to manage.
    ///
    /// Precedence: the explicit setting, the device the client exported to
    /// its hook scripts, the client config's `dev`, then `tun0`.
    pub fn tunnel_interface(&self, hook_device: Option<&str>, config_device: Option<&str>) -> String {
        self.interface
            .as_deref()
            .or(hook_device.filter(|d| !d.is_empty()))
            .or(config_device)
            .unwrap_or(DEFAULT_TUNNEL_INTERFACE)
            .to_string()
    }

    /// Parsed reachability target.
    pub fn health_target_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.health_target.parse().map_err(|e| ConfigError::InvalidValue {
            field: "health-target".to_string(),
            message: format!("'{}': {}", self.health_target, e),
        })
    }

    /// Arguments for the tunnel client.
    ///
    /// `self_exe` is this binary, used for the route-up hook when the
    /// killswitch is enabled.
    pub fn client_command_args(&self, self_exe: &Path) -> Result<Vec<String>, ConfigError> {
        let config = std::path::absolute(self.require_client_config()?).map_err(|e| ConfigError::Unreadable {
            what: "Tunnel client config",
            path: self.client_config.clone().unwrap_or_default(),
            source: e,
        })?;
        let workdir = config.parent().unwrap_or(Path::new("/")).to_path_buf();

        let mut args = vec![
            "--config".to_string(),
            config.display().to_string(),
            "--cd".to_string(),
            workdir.display().to_string(),
            "--script-security".to_string(),
            "2".to_string(),
        ];

        if self.kill_switch {
            args.push("--route-up".to_string());
            args.push(self.route_up_command(self_exe, &config));
        }

        if let Some(credentials) = &self.credentials {
            args.push("--auth-user-pass".to_string());
            args.push(credentials.display().to_string());
        }

        args.extend(self.client_args.iter().cloned());
        Ok(args)
    }

    /// Command the client runs once its routes are up.
    fn route_up_command(&self, self_exe: &Path, config: &Path) -> String {
        let mut words = vec![
            quote(&self_exe.display().to_string()),
            "killswitch".to_string(),
            "--config".to_string(),
            quote(&config.display().to_string()),
        ];
        let csv = self.allowed_subnets_csv();
        if !csv.is_empty() {
            words.push("--allowed-subnets".to_string());
            words.push(quote(&csv));
        }
        if let Some(interface) = &self.interface {
            words.push("--interface".to_string());
            words.push(quote(interface));
        }
        words.join(" ")
    }
}

fn check_readable(what: &'static str, path: &Path) -> Result<(), ConfigError> {
    File::open(path).map(drop).map_err(|e| ConfigError::Unreadable {
        what,
        path: path.to_path_buf(),
        source: e,
    })
}

/// Single-quote `word` for the client's command parser when it contains
/// whitespace or quotes.
fn quote(word: &str) -> String {
    if word.is_empty() || word.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", word.replace('\'', "'\\''"))
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.binary, "openvpn");
        assert_eq!(settings.shutdown_grace, Duration::from_secs(10));
        assert_eq!(settings.readiness, PollBudget::new(30, Duration::from_secs(2)));
        assert_eq!(settings.health_target_addr().unwrap(), "1.1.1.1:443".parse().unwrap());
        assert!(!settings.kill_switch);
    }

    #[test]
    fn test_client_args_with_killswitch_and_credentials() {
        let settings = Settings {
            client_config: Some(PathBuf::from("/config/client.ovpn")),
            credentials: Some(PathBuf::from("/config/auth.txt")),
            kill_switch: true,
            allowed_subnets: vec!["10.10.0.0/24".to_string(), "192.168.1.0/24".to_string()],
            client_args: vec!["--verb".to_string(), "3".to_string()],
            ..Settings::default()
        };

        let args = settings.client_command_args(Path::new("/usr/local/bin/tunnel-guard")).unwrap();

        assert_eq!(
            args,
            vec![
                "--config",
                "/config/client.ovpn",
                "--cd",
                "/config",
                "--script-security",
                "2",
                "--route-up",
                "/usr/local/bin/tunnel-guard killswitch --config /config/client.ovpn --allowed-subnets 10.10.0.0/24,192.168.1.0/24",
                "--auth-user-pass",
                "/config/auth.txt",
                "--verb",
                "3",
            ]
        );
    }

    #[test]
    fn test_client_args_without_killswitch() {
        let settings = Settings {
            client_config: Some(PathBuf::from("/config/client.ovpn")),
            ..Settings::default()
        };
        let args = settings.client_command_args(Path::new("/bin/tunnel-guard")).unwrap();
        assert!(!args.contains(&"--route-up".to_string()));
        assert!(!args.contains(&"--auth-user-pass".to_string()));
    }

    #[test]
    fn test_tunnel_interface_precedence() {
        let settings = Settings::default();
        assert_eq!(settings.tunnel_interface(None, None), "tun0");
        assert_eq!(settings.tunnel_interface(None, Some("tun3")), "tun3");
        assert_eq!(settings.tunnel_interface(Some("tun1"), Some("tun3")), "tun1");
        assert_eq!(settings.tunnel_interface(Some(""), Some("tun3")), "tun3");

        let explicit = Settings {
            interface: Some("wg0".to_string()),
            ..Settings::default()
        };
        assert_eq!(explicit.tunnel_interface(Some("tun1"), Some("tun3")), "wg0");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("/config/client.ovpn"), "/config/client.ovpn");
        assert_eq!(quote("/my configs/a.ovpn"), "'/my configs/a.ovpn'");
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_verify_readable() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "client").unwrap();

        let ok = Settings {
            client_config: Some(config.path().to_path_buf()),
            ..Settings::default()
        };
        ok.verify_readable().unwrap();

        let dir = tempdir().unwrap();
        let missing_credentials = Settings {
            credentials: Some(dir.path().join("auth.txt")),
            ..ok.clone()
        };
        assert!(matches!(
            missing_credentials.verify_readable(),
            Err(ConfigError::Unreadable { what: "Credentials file", .. })
        ));

        assert!(matches!(
            Settings::default().verify_readable(),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_invalid_health_target() {
        let settings = Settings {
            health_target: "not-an-address".to_string(),
            ..Settings::default()
        };
        assert!(matches!(settings.health_target_addr(), Err(ConfigError::InvalidValue { .. })));
    }
}
