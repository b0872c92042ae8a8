//! Termination signals as a shutdown request.
//!
//! SIGINT, SIGTERM and SIGQUIT all flip the same `watch` flag. Repeated
//! signals while already shutting down are logged and otherwise ignored.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::error::SupervisorError;

/// Forward termination signals to `shutdown` until the receiver side is gone.
pub fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> Result<JoinHandle<()>, SupervisorError> {
    let mut interrupt = signal(SignalKind::interrupt()).map_err(SupervisorError::SignalHandler)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(SupervisorError::SignalHandler)?;
    let mut quit = signal(SignalKind::quit()).map_err(SupervisorError::SignalHandler)?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
                _ = quit.recv() => "SIGQUIT",
                _ = shutdown.closed() => return,
            };

            if *shutdown.borrow() {
                debug!("Received {} while already shutting down", name);
                continue;
            }
            info!("Received {}, shutting down", name);
            if shutdown.send(true).is_err() {
                return;
            }
        }
    }))
}
