//! Tunnel readiness detection.
//!
//! The monitor is purely observational: it reads network state, never
//! changes it, and runs alongside the supervisor's wait on the child process.
//! Readiness means the tunnel client is still alive AND the tunnel interface
//! is the next hop for at least one route.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::NetworkView;
use crate::retry::{poll_until, PollBudget, PollOutcome, Probe};

/// Default number of readiness attempts.
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;

/// Default spacing between readiness attempts.
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(2);

/// Verdict of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Process alive and tunnel routed.
    Ready,
    /// The tunnel never became usable; the client must be stopped.
    Failed(String),
    /// Shutdown was requested before a verdict was reached.
    Aborted,
}

/// Polls network state until the tunnel is usable.
pub struct ReadinessMonitor {
    view: Arc<dyn NetworkView>,
    interface: String,
}

impl ReadinessMonitor {
    /// Create a monitor for `interface`.
    pub fn new(view: Arc<dyn NetworkView>, interface: impl Into<String>) -> Self {
        Self {
            view,
            interface: interface.into(),
        }
    }

    /// Check readiness up to `budget.attempts` times.
    ///
    /// `alive` reports whether the supervised process is still running. A dead
    /// process fails the check immediately. Snapshot errors count as a
    /// not-ready attempt.
    pub async fn verify<F>(
        &self,
        budget: PollBudget,
        alive: F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Readiness
    where
        F: Fn() -> bool,
    {
        info!(
            "Waiting for {} to become ready ({} attempts, {:?} apart)",
            self.interface, budget.attempts, budget.interval
        );

        let view = &self.view;
        let interface = self.interface.as_str();
        let alive = &alive;
        let outcome = poll_until(budget, shutdown, || async move {
            if !alive() {
                return Probe::Fatal("tunnel client exited before the tunnel came up".to_string());
            }
            match view.snapshot() {
                Ok(snapshot) if snapshot.has_route_via(interface) => Probe::Ready(()),
                Ok(_) => Probe::Pending,
                Err(e) => {
                    debug!("Readiness snapshot failed: {}", e);
                    Probe::Pending
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(()) => {
                info!("Tunnel {} is ready", self.interface);
                Readiness::Ready
            }
            PollOutcome::Failed(reason) => {
                warn!("Readiness check failed: {}", reason);
                Readiness::Failed(reason)
            }
            PollOutcome::Timeout { attempts } => {
                let reason = format!(
                    "no route via {} after {} attempts",
                    self.interface, attempts
                );
                warn!("Readiness check failed: {}", reason);
                Readiness::Failed(reason)
            }
            PollOutcome::Cancelled => Readiness::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netstate::error::NetError;
    use crate::netstate::model::{LinkInfo, NetworkSnapshot, RouteDestination, RouteEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports the tunnel route from the `ready_at`-th snapshot onwards.
    struct EventuallyRouted {
        calls: AtomicUsize,
        ready_at: usize,
    }

    impl NetworkView for EventuallyRouted {
        fn snapshot(&self) -> Result<NetworkSnapshot, NetError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let mut snap = NetworkSnapshot {
                links: vec![LinkInfo::new("eth0", vec!["172.18.0.5/16".parse().unwrap()])],
                routes: vec![],
            };
            if n >= self.ready_at {
                snap.routes.push(RouteEntry::new(
                    RouteDestination::parse("10.8.0.0/24").unwrap(),
                    None,
                    "tun0",
                ));
            }
            Ok(snap)
        }
    }

    fn budget(attempts: u32) -> PollBudget {
        PollBudget::new(attempts, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_ready_as_soon_as_route_appears() {
        let view = Arc::new(EventuallyRouted { calls: AtomicUsize::new(0), ready_at: 3 });
        let monitor = ReadinessMonitor::new(view.clone(), "tun0");
        let (_tx, mut rx) = watch::channel(false);

        let verdict = monitor.verify(budget(10), || true, &mut rx).await;

        assert_eq!(verdict, Readiness::Ready);
        assert_eq!(view.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fails_when_route_never_appears() {
        let view = Arc::new(EventuallyRouted { calls: AtomicUsize::new(0), ready_at: usize::MAX });
        let monitor = ReadinessMonitor::new(view.clone(), "tun0");
        let (_tx, mut rx) = watch::channel(false);

        let verdict = monitor.verify(budget(4), || true, &mut rx).await;

        assert!(matches!(verdict, Readiness::Failed(_)));
        assert_eq!(view.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_dead_process_fails_immediately() {
        let view = Arc::new(EventuallyRouted { calls: AtomicUsize::new(0), ready_at: 1 });
        let monitor = ReadinessMonitor::new(view.clone(), "tun0");
        let (_tx, mut rx) = watch::channel(false);

        let verdict = monitor.verify(budget(10), || false, &mut rx).await;

        assert!(matches!(verdict, Readiness::Failed(_)));
        assert_eq!(view.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_aborted_on_shutdown() {
        let view = Arc::new(EventuallyRouted { calls: AtomicUsize::new(0), ready_at: usize::MAX });
        let monitor = ReadinessMonitor::new(view, "tun0");
        let (_tx, mut rx) = watch::channel(true);

        let verdict = monitor.verify(budget(10), || true, &mut rx).await;
        assert_eq!(verdict, Readiness::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_budget_bound() {
        let view = Arc::new(EventuallyRouted { calls: AtomicUsize::new(0), ready_at: usize::MAX });
        let monitor = ReadinessMonitor::new(view, "tun0");
        let (_tx, mut rx) = watch::channel(false);
        let budget = PollBudget::new(DEFAULT_READINESS_ATTEMPTS, DEFAULT_READINESS_INTERVAL);

        let start = tokio::time::Instant::now();
        let verdict = monitor.verify(budget, || true, &mut rx).await;

        assert!(matches!(verdict, Readiness::Failed(_)));
        assert!(start.elapsed() <= Duration::from_secs(60));
    }
}
