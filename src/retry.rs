//! Bounded polling.
//!
//! Every "wait until the network looks right" loop in this crate goes through
//! [`poll_until`]: the readiness monitor and each of the firewall controller's
//! pre-condition waits. A probe is evaluated up to `attempts` times with
//! `interval` between evaluations. Probes are async so a probe may take two
//! observations a short delay apart. Between attempts the loop suspends only
//! at the interval boundary and wakes early when a shutdown is requested.
//!
//! # Example
//!
//! ```ignore
//! use tunnel_guard::retry::{poll_until, PollBudget, PollOutcome, Probe};
//!
//! let outcome = poll_until(PollBudget::new(30, Duration::from_secs(1)), &mut shutdown_rx, || async {
//!     if tunnel_is_up() { Probe::Ready(()) } else { Probe::Pending }
//! })
//! .await;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

/// Result of a single probe evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// Condition holds; stop polling.
    Ready(T),
    /// Condition does not hold yet.
    Pending,
    /// Condition can never hold; stop polling without waiting out the budget.
    Fatal(String),
}

/// Final outcome of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe reported ready on some attempt.
    Ready(T),
    /// The probe reported a fatal condition.
    Failed(String),
    /// Every attempt came back pending.
    Timeout {
        /// Number of attempts made.
        attempts: u32,
    },
    /// A shutdown was requested while polling.
    Cancelled,
}

impl<T> PollOutcome<T> {
    /// Whether the probe succeeded.
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }
}

/// Attempt count and spacing for a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Maximum number of probe evaluations.
    pub attempts: u32,
    /// Delay between evaluations.
    pub interval: Duration,
}

impl PollBudget {
    /// Create a budget.
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Worst-case time spent sleeping under this budget.
    pub fn worst_case(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

/// Evaluate `probe` until it is ready, fatal, the budget runs out, or a
/// shutdown is requested on `shutdown`.
///
/// The first evaluation happens immediately. No sleep follows the last
/// attempt, so the call returns within [`PollBudget::worst_case`] plus the
/// time spent inside the probe.
pub async fn poll_until<T, F, Fut>(
    budget: PollBudget,
    shutdown: &mut watch::Receiver<bool>,
    mut probe: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe<T>>,
{
    for attempt in 1..=budget.attempts {
        if *shutdown.borrow() {
            return PollOutcome::Cancelled;
        }

        match probe().await {
            Probe::Ready(value) => return PollOutcome::Ready(value),
            Probe::Fatal(reason) => return PollOutcome::Failed(reason),
            Probe::Pending => {
                trace!("Probe pending ({}/{})", attempt, budget.attempts);
            }
        }

        if attempt == budget.attempts {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(budget.interval) => {}
            changed = shutdown.changed() => {
                // A dropped sender cannot request shutdown any more; keep polling.
                if changed.is_ok() && *shutdown.borrow() {
                    return PollOutcome::Cancelled;
                }
                if changed.is_err() {
                    tokio::time::sleep(budget.interval).await;
                }
            }
        }
    }

    PollOutcome::Timeout {
        attempts: budget.attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(attempts: u32) -> PollBudget {
        PollBudget::new(attempts, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_ready_on_first_attempt() {
        let (_tx, mut rx) = watch::channel(false);
        let mut calls = 0;
        let outcome = poll_until(budget(5), &mut rx, || {
            calls += 1;
            async { Probe::Ready(42) }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Ready(42));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_ready_after_some_attempts() {
        let (_tx, mut rx) = watch::channel(false);
        let mut calls = 0;
        let outcome = poll_until(budget(5), &mut rx, || {
            calls += 1;
            let done = calls == 3;
            async move { if done { Probe::Ready(()) } else { Probe::Pending } }
        })
        .await;

        assert!(outcome.is_ready());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_timeout_makes_exactly_budget_attempts() {
        let (_tx, mut rx) = watch::channel(false);
        let mut calls = 0;
        let outcome: PollOutcome<()> = poll_until(budget(4), &mut rx, || {
            calls += 1;
            async { Probe::Pending }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Timeout { attempts: 4 });
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_fatal_short_circuits() {
        let (_tx, mut rx) = watch::channel(false);
        let mut calls = 0;
        let outcome: PollOutcome<()> = poll_until(budget(10), &mut rx, || {
            calls += 1;
            async { Probe::Fatal("process exited".to_string()) }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Failed("process exited".to_string()));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_shutdown_already_requested() {
        let (_tx, mut rx) = watch::channel(true);
        let outcome: PollOutcome<()> = poll_until(budget(10), &mut rx, || async { Probe::Pending }).await;
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_shutdown_during_wait() {
        let (tx, mut rx) = watch::channel(false);
        let slow = PollBudget::new(100, Duration::from_secs(60));

        let handle = tokio::spawn(async move {
            poll_until(slow, &mut rx, || async { Probe::<()>::Pending }).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poll should observe shutdown")
            .unwrap();
        assert_eq!(outcome, PollOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worst_case_bound() {
        let (_tx, mut rx) = watch::channel(false);
        let b = PollBudget::new(30, Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        let outcome: PollOutcome<()> = poll_until(b, &mut rx, || async { Probe::Pending }).await;

        assert_eq!(outcome, PollOutcome::Timeout { attempts: 30 });
        assert!(start.elapsed() <= Duration::from_secs(60));
        assert_eq!(b.worst_case(), Duration::from_secs(58));
    }
}
