//! tunnel-guard: tunnel client supervisor with an egress killswitch.
//!
//! # I/O Architecture
//!
//! - **Client output**: the tunnel client inherits stdout/stderr untouched
//! - **Diagnostics**: `tracing` lines with timestamps on stderr
//! - **Audit trail**: JSON events to syslog, silently dropped when no
//!   syslog daemon is reachable
//! - **Verdicts**: `health` prints its PASS/FAIL line on stdout

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use tunnel_guard::{
    cli::Cli,
    cli_handler,
    config::SettingsLoader,
    orchestrator,
    telemetry,
};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.debug.unwrap_or(false)) {
        eprintln!("{:#}", e);
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    debug!("Parsed CLI arguments: {:?}", cli);

    // Never touches stdout/stderr; falls back to a null logger.
    if let Err(e) = telemetry::init_logger() {
        debug!("Audit trail disabled: {}", e);
    }

    let settings = SettingsLoader::new()
        .load(&cli)
        .context("Failed to load settings")?;
    debug!("Resolved settings: {:?}", settings);

    match cli.command {
        Some(command) => cli_handler::handle_command(command, &settings),
        None => orchestrator::run_supervisor(&settings),
    }
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG` if set, else info
/// - 1 (-v): Debug level
/// - 2+ (-vv): Trace level
///
/// `DEBUG`/`--debug` raises the default to debug.
fn init_tracing(verbose: u8, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match (verbose, debug) {
        (0, false) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        (0, true) | (1, _) => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
