//! Command-line interface definitions for tunnel-guard.
//!
//! Every option can also come from the environment; the variable names are
//! the ones container images conventionally expose (`KILL_SWITCH`,
//! `ALLOWED_SUBNETS`, ...). Options are global so they may follow a
//! subcommand, which is how the route-up hook invokes `killswitch`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tunnel client supervisor with a fail-closed egress killswitch.
///
/// Without a subcommand, tunnel-guard starts the tunnel client, waits for the
/// tunnel to come up and stops the client on SIGINT, SIGTERM or SIGQUIT.
#[derive(Parser, Debug)]
#[command(name = "tunnel-guard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (omit to supervise the tunnel client).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Tunnel client configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true, env = "TUNNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Credentials file passed to the client as `--auth-user-pass`.
    #[arg(long = "credentials", value_name = "PATH", global = true, env = "TUNNEL_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Tunnel client binary (name in PATH or path).
    #[arg(long = "binary", value_name = "BIN", global = true, env = "TUNNEL_BINARY")]
    pub binary: Option<String>,

    /// Tunnel interface name (defaults to the client config's `dev`, else tun0).
    #[arg(long = "interface", value_name = "NAME", global = true, env = "TUNNEL_INTERFACE")]
    pub interface: Option<String>,

    /// Enable the egress killswitch (true/on/1/yes).
    #[arg(
        long = "kill-switch",
        value_name = "BOOL",
        global = true,
        env = "KILL_SWITCH",
        value_parser = parse_switch,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub kill_switch: Option<bool>,

    /// Comma-separated CIDRs reachable outside the tunnel.
    #[arg(long = "allowed-subnets", value_name = "CIDRS", global = true, env = "ALLOWED_SUBNETS")]
    pub allowed_subnets: Option<String>,

    /// Seconds the client gets to exit after SIGTERM.
    #[arg(long = "shutdown-grace-secs", value_name = "SECS", global = true, env = "SHUTDOWN_GRACE_SECS")]
    pub shutdown_grace_secs: Option<u64>,

    /// Readiness checks before giving up on the tunnel.
    #[arg(long = "readiness-attempts", value_name = "N", global = true, env = "READINESS_ATTEMPTS")]
    pub readiness_attempts: Option<u32>,

    /// Seconds between readiness checks.
    #[arg(long = "readiness-interval-secs", value_name = "SECS", global = true, env = "READINESS_INTERVAL_SECS")]
    pub readiness_interval_secs: Option<u64>,

    /// `host:port` the health check connects to.
    #[arg(long = "health-target", value_name = "ADDR", global = true, env = "HEALTH_TARGET")]
    pub health_target: Option<String>,

    /// Extra argument for the tunnel client (repeatable).
    #[arg(long = "client-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub client_args: Vec<String>,

    /// Settings file merged under the options above.
    #[arg(long = "settings", value_name = "PATH", global = true, env = "TUNNEL_GUARD_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Force debug logging (true/on/1/yes).
    #[arg(
        long = "debug",
        value_name = "BOOL",
        global = true,
        env = "DEBUG",
        value_parser = parse_switch,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub debug: Option<bool>,

    /// Increase log verbosity.
    ///
    /// -v = info, -vv = debug, -vvv = trace.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for tunnel-guard.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Install the killswitch once and exit (used as the route-up hook).
    Killswitch {
        /// Compute the rule set against an in-memory filter and print it.
        #[arg(long = "dry-run")]
        dry_run: bool,
    },

    /// Check tunnel health; prints PASS/FAIL and exits 0 on pass.
    Health,
}

/// Parse an on/off switch. Accepts `true/on/1/yes` and `false/off/0/no`,
/// case-insensitively.
pub fn parse_switch(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Ok(true),
        "false" | "off" | "0" | "no" | "" => Ok(false),
        other => Err(format!("expected true/on/1/yes or false/off/0/no, got '{}'", other)),
    }
}
