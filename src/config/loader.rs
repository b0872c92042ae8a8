//! Settings loading.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. System settings: `/etc/tunnel-guard/config.toml`
//! 3. Settings file given with `--settings`
//! 4. Environment variables and CLI flags (clap resolves these two)
//!
//! Lists (allowed subnets, extra client args) are appended; scalars are
//! overridden.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::error::ConfigError;
use super::schema::SettingsFile;
use super::settings::Settings;
use crate::cli::Cli;
use crate::retry::PollBudget;

/// System-wide settings path.
pub const SYSTEM_SETTINGS_PATH: &str = "/etc/tunnel-guard/config.toml";

/// Builds [`Settings`] from every source.
pub struct SettingsLoader {
    system_path: PathBuf,
}

impl SettingsLoader {
    /// Loader reading the system settings path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system_path: PathBuf::from(SYSTEM_SETTINGS_PATH),
        }
    }

    /// Loader with a custom system path (for testing).
    #[must_use]
    pub fn with_system_path(system_path: PathBuf) -> Self {
        Self { system_path }
    }

    /// Load and merge all sources.
    ///
    /// A missing system file is skipped; a missing `--settings` file is an
    /// error. Invalid TOML is always an error.
    pub fn load(&self, cli: &Cli) -> Result<Settings, ConfigError> {
        let mut file = SettingsFile::default();

        if let Some(system) = self.load_file(&self.system_path)? {
            file.merge(system);
            debug!("Loaded system settings from {:?}", self.system_path);
        } else {
            debug!("No system settings at {:?}", self.system_path);
        }

        if let Some(ref path) = cli.settings {
            let extra = self.load_file(path)?.ok_or_else(|| ConfigError::ReadError {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "Specified settings file not found"),
            })?;
            file.merge(extra);
            debug!("Loaded settings from {:?}", path);
        }

        resolve(file, cli)
    }

    fn load_file(&self, path: &Path) -> Result<Option<SettingsFile>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map(Some)
                .map_err(|e| ConfigError::ParseError {
                    path: path.to_path_buf(),
                    source: e,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the merged file and then the CLI/environment over the defaults.
fn resolve(file: SettingsFile, cli: &Cli) -> Result<Settings, ConfigError> {
    let mut settings = Settings::default();

    // Settings file
    if !file.tunnel.binary.is_empty() {
        settings.binary = file.tunnel.binary;
    }
    settings.client_config = file.tunnel.config;
    settings.credentials = file.tunnel.credentials;
    if !file.tunnel.interface.is_empty() {
        settings.interface = Some(file.tunnel.interface);
    }
    settings.client_args = file.tunnel.extra_args;
    if let Some(enabled) = file.killswitch.enabled {
        settings.kill_switch = enabled;
    }
    settings.allowed_subnets = file.killswitch.allowed_subnets;
    if file.supervisor.shutdown_grace_secs != 0 {
        settings.shutdown_grace = Duration::from_secs(file.supervisor.shutdown_grace_secs);
    }
    if file.supervisor.readiness_attempts != 0 {
        settings.readiness.attempts = file.supervisor.readiness_attempts;
    }
    if file.supervisor.readiness_interval_secs != 0 {
        settings.readiness.interval = Duration::from_secs(file.supervisor.readiness_interval_secs);
    }
    if !file.health.target.is_empty() {
        settings.health_target = file.health.target;
    }
    if file.health.timeout_secs != 0 {
        settings.health_timeout = Duration::from_secs(file.health.timeout_secs);
    }

    // Environment and CLI
    if let Some(ref binary) = cli.binary {
        settings.binary = binary.clone();
    }
    if cli.config.is_some() {
        settings.client_config = cli.config.clone();
    }
    if cli.credentials.is_some() {
        settings.credentials = cli.credentials.clone();
    }
    if let Some(ref interface) = cli.interface
        && !interface.is_empty()
    {
        settings.interface = Some(interface.clone());
    }
    settings.client_args.extend(cli.client_args.iter().cloned());
    if let Some(enabled) = cli.kill_switch {
        settings.kill_switch = enabled;
    }
    if let Some(ref csv) = cli.allowed_subnets {
        settings.allowed_subnets.extend(
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
    }
    if let Some(secs) = cli.shutdown_grace_secs {
        settings.shutdown_grace = Duration::from_secs(secs);
    }
    if let Some(attempts) = cli.readiness_attempts {
        if attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "readiness-attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        settings.readiness = PollBudget::new(attempts, settings.readiness.interval);
    }
    if let Some(secs) = cli.readiness_interval_secs {
        settings.readiness.interval = Duration::from_secs(secs);
    }
    if let Some(ref target) = cli.health_target {
        settings.health_target = target.clone();
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["tunnel-guard"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = tempdir().unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("missing.toml"));

        let settings = loader.load(&cli(&["--kill-switch", "off"])).unwrap();

        assert_eq!(settings.binary, "openvpn");
        assert!(!settings.kill_switch);
        assert_eq!(settings.readiness.attempts, 30);
    }

    #[test]
    fn test_cli_overrides_file_and_lists_append() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("config.toml");
        fs::write(
            &system,
            r#"
            [tunnel]
            binary = "/usr/sbin/openvpn"
            config = "/etc/openvpn/client.ovpn"
            [killswitch]
            enabled = false
            allowed_subnets = ["10.0.0.0/8"]
            [supervisor]
            shutdown_grace_secs = 30
            readiness_attempts = 5
            "#,
        )
        .unwrap();
        let loader = SettingsLoader::with_system_path(system);

        let settings = loader
            .load(&cli(&[
                "--kill-switch",
                "yes",
                "--allowed-subnets",
                "192.168.1.0/24, not-a-cidr",
                "--config",
                "/config/client.ovpn",
                "--shutdown-grace-secs",
                "3",
            ]))
            .unwrap();

        assert_eq!(settings.binary, "/usr/sbin/openvpn");
        assert_eq!(settings.client_config, Some(PathBuf::from("/config/client.ovpn")));
        assert!(settings.kill_switch);
        assert_eq!(settings.allowed_subnets, vec!["10.0.0.0/8", "192.168.1.0/24", "not-a-cidr"]);
        assert_eq!(settings.shutdown_grace, Duration::from_secs(3));
        assert_eq!(settings.readiness.attempts, 5);
    }

    #[test]
    fn test_missing_settings_flag_file_is_error() {
        let dir = tempdir().unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("missing.toml"));
        let path = dir.path().join("nope.toml");

        let result = loader.load(&cli(&["--settings", path.to_str().unwrap()]));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let system = dir.path().join("config.toml");
        fs::write(&system, "[tunnel\nbinary = ").unwrap();

        let result = SettingsLoader::with_system_path(system).load(&cli(&[]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_zero_readiness_attempts_rejected() {
        let dir = tempdir().unwrap();
        let loader = SettingsLoader::with_system_path(dir.path().join("missing.toml"));

        let result = loader.load(&cli(&["--readiness-attempts", "0"]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
