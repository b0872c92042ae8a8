//! The supervised tunnel client process.
//!
//! ```text
//! Starting ──start()──► Running ──terminate()──► Terminating ──► Stopped
//!     │                    │                                        ▲
//!     └── spawn error ──► Failed          └────── exits on its own ─┘
//! ```

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::SupervisorError;
use crate::telemetry::{audit, AuditEvent};

/// Default time the client gets to exit after SIGTERM.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default spacing of exit checks while waiting out the grace period.
pub const DEFAULT_TERMINATE_TICK: Duration = Duration::from_secs(1);

/// Lifecycle state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not spawned yet.
    Starting,
    /// Spawned and not asked to stop.
    Running,
    /// SIGTERM sent, waiting for exit.
    Terminating,
    /// Exited and reaped.
    Stopped,
    /// Could not be spawned.
    Failed,
}

/// Observable state of the client. Only [`TunnelProcess`] mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// Process ID once spawned.
    pub pid: Option<u32>,
    /// Lifecycle state.
    pub state: ProcessState,
    /// Exit code once stopped; `128 + signo` if killed by a signal.
    pub exit_code: Option<i32>,
}

/// Owns the tunnel client child process.
pub struct TunnelProcess {
    program: PathBuf,
    args: Vec<String>,
    child: Option<Child>,
    handle: ProcessHandle,
    tick: Duration,
}

impl TunnelProcess {
    /// Prepare to run `program` with `args`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: None,
            handle: ProcessHandle {
                pid: None,
                state: ProcessState::Starting,
                exit_code: None,
            },
            tick: DEFAULT_TERMINATE_TICK,
        }
    }

    /// Change how often exit is checked during termination.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Current state.
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// The command line, for logs.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Spawn the client with inherited stdio.
    pub fn start(&mut self) -> Result<u32, SupervisorError> {
        let cmd = self.command_line();
        info!("Starting tunnel client: {}", cmd);

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.handle.state = ProcessState::Failed;
                return Err(SupervisorError::SpawnFailed { cmd, source: e });
            }
        };

        let Some(pid) = child.id() else {
            self.handle.state = ProcessState::Failed;
            return Err(SupervisorError::NotStarted);
        };

        debug!("Tunnel client running with PID {}", pid);
        self.child = Some(child);
        self.handle.pid = Some(pid);
        self.handle.state = ProcessState::Running;
        Ok(pid)
    }

    /// Wait for the client to exit on its own.
    pub async fn await_exit(&mut self) -> Result<i32, SupervisorError> {
        if let Some(code) = self.handle.exit_code {
            return Ok(code);
        }
        let child = self.child.as_mut().ok_or(SupervisorError::NotStarted)?;
        let status = child.wait().await.map_err(SupervisorError::WaitFailed)?;
        Ok(self.finish(status))
    }

    /// Whether the client is still running. Reaps it if it has exited.
    pub fn is_alive(&mut self) -> bool {
        if self.handle.exit_code.is_some() {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.finish(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Stop the client: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Calling this on a stopped client returns its exit code again.
    pub async fn terminate(&mut self, grace: Duration) -> Result<i32, SupervisorError> {
        if let Some(code) = self.handle.exit_code {
            return Ok(code);
        }
        let pid = self.handle.pid.ok_or(SupervisorError::NotStarted)?;

        if self.handle.state != ProcessState::Terminating {
            self.handle.state = ProcessState::Terminating;
            info!("Stopping tunnel client (PID {})", pid);
            self.signal(Signal::SIGTERM)?;
        }

        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.try_reap()? {
                return Ok(self.finish(status));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.tick.min(deadline - now)).await;
        }

        warn!(
            "Tunnel client (PID {}) still running after {:?}, sending SIGKILL",
            pid, grace
        );
        audit().log(AuditEvent::ShutdownEscalated {
            pid,
            grace_sec: grace.as_secs(),
        });
        self.signal(Signal::SIGKILL)?;

        let child = self.child.as_mut().ok_or(SupervisorError::NotStarted)?;
        let status = child.wait().await.map_err(SupervisorError::WaitFailed)?;
        Ok(self.finish(status))
    }

    fn try_reap(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        let child = self.child.as_mut().ok_or(SupervisorError::NotStarted)?;
        child.try_wait().map_err(SupervisorError::WaitFailed)
    }

    /// Send `signal` to the client. A client that is already gone is not an
    /// error.
    fn signal(&self, signal: Signal) -> Result<(), SupervisorError> {
        let pid = self.handle.pid.ok_or(SupervisorError::NotStarted)?;
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(SupervisorError::SignalFailed(e)),
        }
    }

    fn finish(&mut self, status: ExitStatus) -> i32 {
        let code = exit_code_of(status);
        info!("Tunnel client exited with {} ({})", code, status);
        self.handle.state = ProcessState::Stopped;
        self.handle.exit_code = Some(code);
        code
    }
}

/// Shell-style exit code: the process's own code, or `128 + signo`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Whether `pid` is a live (non-zombie) process.
pub fn pid_alive(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state field follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

/// Locate the tunnel client binary: absolute and relative paths are taken as
/// given, bare names are looked up in PATH.
pub fn resolve_binary(binary: &str) -> Result<PathBuf, SupervisorError> {
    let not_found = |reason: String| SupervisorError::BinaryNotFound {
        binary: binary.to_string(),
        reason,
    };

    let path = Path::new(binary);
    if binary.contains('/') {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(not_found("no such file".to_string()))
        };
    }
    which::which(binary).map_err(|e| not_found(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> TunnelProcess {
        TunnelProcess::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
            .with_tick(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_exit_code_propagates() {
        let mut process = sh("exit 3");
        assert_eq!(process.handle().state, ProcessState::Starting);

        process.start().unwrap();
        assert_eq!(process.handle().state, ProcessState::Running);

        assert_eq!(process.await_exit().await.unwrap(), 3);
        assert_eq!(process.handle().state, ProcessState::Stopped);
        assert_eq!(process.handle().exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let mut process = TunnelProcess::new("/nonexistent/openvpn", vec![]);
        let err = process.start().unwrap_err();

        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));
        assert_eq!(process.handle().state, ProcessState::Failed);
        assert!(matches!(process.terminate(Duration::from_secs(1)).await, Err(SupervisorError::NotStarted)));
    }

    #[tokio::test]
    async fn test_graceful_terminate() {
        let mut process = sh("exec sleep 30");
        process.start().unwrap();

        let code = process.terminate(Duration::from_secs(5)).await.unwrap();

        assert_eq!(code, 128 + Signal::SIGTERM as i32);
        assert_eq!(process.handle().state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_escalates_when_sigterm_ignored() {
        let mut process = sh("trap '' TERM; while :; do sleep 1; done");
        process.start().unwrap();
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = std::time::Instant::now();
        let code = process.terminate(Duration::from_millis(300)).await.unwrap();

        assert_eq!(code, 128 + Signal::SIGKILL as i32);
        assert_eq!(process.handle().state, ProcessState::Stopped);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut process = sh("exec sleep 30");
        process.start().unwrap();

        let first = process.terminate(Duration::from_secs(5)).await.unwrap();
        let second = process.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_is_alive_reaps() {
        let mut process = sh("exit 0");
        let pid = process.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while process.is_alive() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!process.is_alive());
        assert_eq!(process.handle().exit_code, Some(0));
        assert!(!pid_alive(pid));
    }

    #[test]
    fn test_pid_alive_self() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(u32::MAX));
    }

    #[test]
    fn test_resolve_binary() {
        assert_eq!(resolve_binary("/bin/sh").unwrap(), PathBuf::from("/bin/sh"));
        assert!(resolve_binary("sh").is_ok());
        assert!(matches!(
            resolve_binary("/nonexistent/openvpn"),
            Err(SupervisorError::BinaryNotFound { .. })
        ));
        assert!(resolve_binary("definitely-not-a-tunnel-client").is_err());
    }
}
