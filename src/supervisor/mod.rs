//! Tunnel client lifecycle.
//!
//! [`TunnelProcess`] spawns the client and stops it (SIGTERM, grace period,
//! SIGKILL). [`spawn_signal_listener`] turns termination signals into a
//! shutdown request the orchestration loop selects on.

pub mod error;
pub mod process;
pub mod signals;

pub use error::SupervisorError;
pub use process::{
    exit_code_of, pid_alive, resolve_binary, ProcessHandle, ProcessState, TunnelProcess,
    DEFAULT_GRACE_PERIOD, DEFAULT_TERMINATE_TICK,
};
pub use signals::spawn_signal_listener;
