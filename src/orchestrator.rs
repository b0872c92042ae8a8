//! Supervise mode: run the tunnel client until it exits, readiness fails, or
//! a termination signal arrives.
//!
//! ```text
//!   main ──► run_supervisor
//!              ├── TunnelProcess::start
//!              ├── spawn_signal_listener ──► shutdown watch
//!              ├── ReadinessMonitor task ──► Ready | Failed | Aborted
//!              └── select! { client exit, readiness verdict, shutdown }
//! ```
//!
//! The killswitch itself is installed by the client's route-up hook, which
//! re-enters this binary as `tunnel-guard killswitch`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::firewall::TunnelClientConfig;
use crate::netstate::{IpCommand, Readiness, ReadinessMonitor};
use crate::supervisor::{pid_alive, resolve_binary, spawn_signal_listener, TunnelProcess};
use crate::telemetry::{audit, AuditEvent};

/// Exit code when readiness failed but the client reported success on the
/// way down.
const READINESS_FAILURE_EXIT: i32 = 1;

/// Start the tunnel client and supervise it. Returns the exit code to
/// propagate.
pub fn run_supervisor(settings: &Settings) -> Result<i32> {
    settings.verify_readable().context("Startup check failed")?;

    let binary = resolve_binary(&settings.binary).context("Tunnel client not found")?;
    let self_exe = std::env::current_exe().context("Failed to locate own executable")?;
    let args = settings
        .client_command_args(&self_exe)
        .context("Failed to build tunnel client command line")?;

    let config_path = settings.require_client_config()?;
    let client = TunnelClientConfig::load(config_path).context("Failed to read tunnel client config")?;
    let interface = settings.tunnel_interface(None, client.device.as_deref());
    debug!("Tunnel interface: {}", interface);

    if settings.kill_switch {
        info!("Killswitch enabled; it is installed by the route-up hook");
    } else {
        warn!("Killswitch disabled; traffic may leave outside the tunnel");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(supervise(settings, binary, args, interface))
}

async fn supervise(settings: &Settings, binary: PathBuf, args: Vec<String>, interface: String) -> Result<i32> {
    let started = Instant::now();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let signals = spawn_signal_listener(shutdown_tx).context("Failed to install signal handlers")?;

    let mut process = TunnelProcess::new(binary.clone(), args);
    let pid = process.start().context("Failed to start tunnel client")?;

    audit().log(AuditEvent::SupervisorStart {
        binary: binary.display().to_string(),
        config: settings
            .client_config
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        pid,
        kill_switch: settings.kill_switch,
    });

    let monitor = ReadinessMonitor::new(Arc::new(IpCommand::new()), interface.clone());
    let budget = settings.readiness;
    let mut readiness_shutdown = shutdown_rx.clone();
    let mut readiness = tokio::spawn(async move {
        monitor
            .verify(budget, move || pid_alive(pid), &mut readiness_shutdown)
            .await
    });
    let mut readiness_pending = true;

    let grace = settings.shutdown_grace;
    let exit_code = loop {
        tokio::select! {
            exit = process.await_exit() => {
                let code = exit.context("Failed to wait for tunnel client")?;
                if code != 0 {
                    error!("Tunnel client exited with {}", code);
                }
                break code;
            }
            verdict = &mut readiness, if readiness_pending => {
                readiness_pending = false;
                match verdict {
                    Ok(Readiness::Ready) => {
                        audit().log(AuditEvent::TunnelReady {
                            interface: interface.clone(),
                        });
                    }
                    Ok(Readiness::Failed(reason)) => {
                        error!("Tunnel not ready, stopping client: {}", reason);
                        audit().log(AuditEvent::ReadinessFailed {
                            interface: interface.clone(),
                            reason,
                        });
                        let code = process.terminate(grace).await.context("Failed to stop tunnel client")?;
                        break if code == 0 { READINESS_FAILURE_EXIT } else { code };
                    }
                    Ok(Readiness::Aborted) => debug!("Readiness check aborted"),
                    Err(e) => warn!("Readiness task ended abnormally: {}", e),
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break process.terminate(grace).await.context("Failed to stop tunnel client")?;
                }
            }
        }
    };

    readiness.abort();
    signals.abort();

    audit().log(AuditEvent::SupervisorStop {
        exit_code,
        duration_sec: started.elapsed().as_secs(),
    });
    info!("Supervisor exiting with {}", exit_code);
    Ok(exit_code)
}
