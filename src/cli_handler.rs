//! One-shot subcommands: `killswitch` and `health`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::config::Settings;
use crate::firewall::{
    ConfigureOutcome, FirewallController, IptablesFilter, MemoryFilter, PacketFilter, RecordingRoutes,
    TunnelClientConfig, EGRESS_CHAIN, RULE_TAG,
};
use crate::health::HealthChecker;
use crate::netstate::{IpCommand, NetworkView, RouteManager};
use crate::supervisor::spawn_signal_listener;

/// Environment variable the tunnel client sets to the tunnel device when it
/// runs hook scripts.
pub const HOOK_DEVICE_ENV: &str = "dev";

/// Run a subcommand and return the process exit code.
pub fn handle_command(command: Commands, settings: &Settings) -> Result<i32> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match command {
        Commands::Killswitch { dry_run } => rt.block_on(run_killswitch(settings, dry_run)),
        Commands::Health => rt.block_on(run_health(settings)),
    }
}

/// Install the killswitch once.
///
/// Skipped and partially applied outcomes are warnings, not failures: the
/// client must keep running. Route failures are errors.
async fn run_killswitch(settings: &Settings, dry_run: bool) -> Result<i32> {
    let config_path = settings.require_client_config()?;
    let client = TunnelClientConfig::load(config_path).context("Failed to read tunnel client config")?;

    let hook_device = std::env::var(HOOK_DEVICE_ENV).ok();
    let interface = settings.tunnel_interface(hook_device.as_deref(), client.device.as_deref());
    debug!(
        "Killswitch for {} with {} remote(s) from {:?}",
        interface,
        client.remotes.len(),
        config_path
    );

    let view: Arc<dyn NetworkView> = Arc::new(IpCommand::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let _signals = spawn_signal_listener(shutdown_tx).context("Failed to install signal handlers")?;

    let csv = settings.allowed_subnets_csv();

    if dry_run {
        let filter = Arc::new(MemoryFilter::new());
        let routes = match view.snapshot() {
            Ok(snapshot) => Arc::new(RecordingRoutes::from_snapshot(&snapshot)),
            Err(e) => {
                warn!("Could not read routes, dry run starts from an empty table: {}", e);
                Arc::new(RecordingRoutes::new())
            }
        };

        let mut controller = FirewallController::new(
            view,
            Arc::clone(&routes) as Arc<dyn RouteManager>,
            Arc::clone(&filter) as Arc<dyn PacketFilter>,
            interface,
        );
        let outcome = controller.configure(&csv, &client, &mut shutdown_rx).await?;

        for (destination, gateway) in routes.added() {
            println!("ip route add {} via {}", destination, gateway);
        }
        for rule in filter.rules() {
            println!(
                "-A {} {} -m comment --comment {} -j {}",
                EGRESS_CHAIN,
                rule.match_args().join(" "),
                RULE_TAG,
                rule.target()
            );
        }
        return Ok(report_outcome(&outcome));
    }

    let mut controller = FirewallController::new(
        Arc::clone(&view),
        Arc::new(IpCommand::new()),
        Arc::new(IptablesFilter::new()),
        interface,
    );
    let outcome = controller.configure(&csv, &client, &mut shutdown_rx).await?;
    Ok(report_outcome(&outcome))
}

fn report_outcome(outcome: &ConfigureOutcome) -> i32 {
    match outcome {
        ConfigureOutcome::Applied(report) => {
            info!(
                "Killswitch on {}: {} rule(s), container subnet {} ({})",
                report.interface,
                report.installed.len(),
                report.container_subnet,
                report.subnet_source
            );
            for entry in &report.skipped_subnets {
                warn!("Skipped invalid allowed subnet '{}'", entry);
            }
        }
        ConfigureOutcome::PartialFailure { detail, .. } => {
            warn!("Killswitch installed with gaps: {}", detail);
        }
        ConfigureOutcome::Skipped { reason } => {
            warn!("Killswitch skipped: {}", reason);
        }
    }
    0
}

/// Run the health checks, print the verdict and return its exit code.
async fn run_health(settings: &Settings) -> Result<i32> {
    let target = settings.health_target_addr()?;

    let config_device = settings
        .client_config
        .as_deref()
        .and_then(|path| match TunnelClientConfig::load(path) {
            Ok(client) => client.device,
            Err(e) => {
                debug!("Ignoring client config for health check: {}", e);
                None
            }
        });
    let interface = settings.tunnel_interface(None, config_device.as_deref());

    let mut checker = HealthChecker::new(
        Arc::new(IpCommand::new()),
        interface,
        process_name(&settings.binary),
        target,
    )
    .with_timeout(settings.health_timeout);
    if settings.kill_switch {
        checker = checker.with_killswitch(Arc::new(IptablesFilter::new()));
    }

    let verdict = checker.run().await;
    println!("{}", verdict);
    Ok(verdict.exit_code())
}

/// The name the client binary runs under.
fn process_name(binary: &str) -> String {
    Path::new(binary)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.to_string())
}
