//! Container health probe.
//!
//! Stateless: every call re-reads the system. Checks run in a fixed order
//! and the first failure ends the run, so the reported check is the first
//! broken link in the chain.

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::firewall::{detect_container_subnet, PacketFilter, RuleIdentity};
use crate::netstate::{NetworkSnapshot, NetworkView};

/// Default reachability target.
pub const DEFAULT_HEALTH_TARGET: &str = "1.1.1.1:443";

/// Default reachability timeout.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest process name the kernel keeps in `/proc/<pid>/comm`.
const COMM_LEN: usize = 15;

/// Individual checks, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// Tunnel client process is running.
    ProcessAlive,
    /// Tunnel interface exists with an address.
    InterfaceAddressed,
    /// Internet-bound traffic is routed through the tunnel.
    DefaultRouteViaTunnel,
    /// An outbound TCP connection succeeds.
    Reachability,
    /// Tunnel accept and catch-all reject are present.
    KillswitchRules,
}

impl HealthCheck {
    /// Name used in the `FAIL:` line.
    pub fn name(self) -> &'static str {
        match self {
            HealthCheck::ProcessAlive => "process-alive",
            HealthCheck::InterfaceAddressed => "interface-addressed",
            HealthCheck::DefaultRouteViaTunnel => "default-route-via-tunnel",
            HealthCheck::Reachability => "reachability",
            HealthCheck::KillswitchRules => "killswitch-rules",
        }
    }
}

/// Outcome of a health run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Every check passed.
    Pass,
    /// A check failed.
    Fail {
        /// The first failing check.
        check: HealthCheck,
        /// What was wrong.
        reason: String,
    },
}

impl HealthVerdict {
    fn fail(check: HealthCheck, reason: impl Into<String>) -> Self {
        HealthVerdict::Fail {
            check,
            reason: reason.into(),
        }
    }

    /// Whether every check passed.
    pub fn passed(&self) -> bool {
        matches!(self, HealthVerdict::Pass)
    }

    /// Process exit code for the verdict.
    pub fn exit_code(&self) -> i32 {
        if self.passed() { 0 } else { 1 }
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthVerdict::Pass => write!(f, "PASS: tunnel up and routed"),
            HealthVerdict::Fail { check, reason } => write!(f, "FAIL: {}: {}", check.name(), reason),
        }
    }
}

type ProcessProbe = Box<dyn Fn() -> bool + Send + Sync>;

/// Runs the health checks.
pub struct HealthChecker {
    view: Arc<dyn NetworkView>,
    filter: Option<Arc<dyn PacketFilter>>,
    interface: String,
    process_name: String,
    process_probe: Option<ProcessProbe>,
    target: SocketAddr,
    timeout: Duration,
}

impl HealthChecker {
    /// Check `interface` and the process called `process_name`, connecting to
    /// `target` for reachability.
    pub fn new(
        view: Arc<dyn NetworkView>,
        interface: impl Into<String>,
        process_name: impl Into<String>,
        target: SocketAddr,
    ) -> Self {
        Self {
            view,
            filter: None,
            interface: interface.into(),
            process_name: process_name.into(),
            process_probe: None,
            target,
            timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Also require the killswitch rules in `filter`.
    pub fn with_killswitch(mut self, filter: Arc<dyn PacketFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Override the reachability timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the `/proc` scan with `probe`.
    pub fn with_process_probe(mut self, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.process_probe = Some(Box::new(probe));
        self
    }

    /// Run every check.
    pub async fn run(&self) -> HealthVerdict {
        let alive = match &self.process_probe {
            Some(probe) => probe(),
            None => process_running(&self.process_name),
        };
        if !alive {
            return HealthVerdict::fail(
                HealthCheck::ProcessAlive,
                format!("no process named {}", self.process_name),
            );
        }

        let snapshot = match self.view.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return HealthVerdict::fail(HealthCheck::InterfaceAddressed, e.to_string()),
        };

        if snapshot.address_of(&self.interface).is_none() {
            return HealthVerdict::fail(
                HealthCheck::InterfaceAddressed,
                format!("{} missing or has no address", self.interface),
            );
        }

        if !snapshot.default_route_via(&self.interface) {
            return HealthVerdict::fail(
                HealthCheck::DefaultRouteViaTunnel,
                format!("default route does not use {}", self.interface),
            );
        }

        if let Err(reason) = self.probe_reachability().await {
            return HealthVerdict::fail(HealthCheck::Reachability, reason);
        }

        if let Some(filter) = &self.filter
            && let Err(reason) = self.check_rules(filter.as_ref(), &snapshot)
        {
            return HealthVerdict::fail(HealthCheck::KillswitchRules, reason);
        }

        HealthVerdict::Pass
    }

    async fn probe_reachability(&self) -> Result<(), String> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.target)).await {
            Ok(Ok(_)) => {
                debug!("Connected to {}", self.target);
                Ok(())
            }
            Ok(Err(e)) => Err(format!("{}: {}", self.target, e)),
            Err(_) => Err(format!("{}: timed out after {:?}", self.target, self.timeout)),
        }
    }

    fn check_rules(&self, filter: &dyn PacketFilter, snapshot: &NetworkSnapshot) -> Result<(), String> {
        let (container_subnet, _) = detect_container_subnet(snapshot, &self.interface);
        let required = [
            RuleIdentity::tunnel_accept(&self.interface),
            RuleIdentity::catch_all_reject(&self.interface, container_subnet),
        ];
        for rule in &required {
            match filter.exists(rule) {
                Ok(true) => {}
                Ok(false) => return Err(format!("missing rule '{}'", rule)),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }
}

/// Whether any process's `comm` matches `name`.
pub fn process_running(name: &str) -> bool {
    let wanted: String = name.chars().take(COMM_LEN).collect();
    let Ok(entries) = fs::read_dir("/proc") else {
        return false;
    };

    entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|e| fs::read_to_string(e.path().join("comm")).ok())
        .any(|comm| comm.trim_end() == wanted)
}
