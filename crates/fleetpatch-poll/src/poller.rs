//! The polling loop.
//!
//! The provider API is asynchronous and eventually consistent: an
//! operation is started, then its effect becomes observable some ticks
//! later. `await_condition` turns that into a single disciplined wait
//! with a fixed cadence and a mandatory budget. An unbounded wait is a
//! defect, so there is no way to construct one here.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancelToken;

/// What "done" means for one convergence wait.
#[derive(Debug, Clone)]
pub struct Criterion {
    /// Human-readable description of the awaited condition.
    pub what: String,
    /// Fixed pause between checks. No backoff: provider consistency
    /// windows are short and bounded, and a steady cadence keeps the
    /// timeout arithmetic honest.
    pub interval: Duration,
    /// Hard budget for the whole wait.
    pub timeout: Duration,
}

impl Criterion {
    pub fn new(what: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            what: what.into(),
            interval,
            timeout,
        }
    }
}

/// One observation of the awaited condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionState {
    /// Not there yet; check again next tick.
    NotYet,
    /// The condition holds.
    Satisfied,
    /// The provider answered in a way waiting cannot fix.
    Errored(String),
}

/// How a convergence wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition held. `ticks` counts the interval sleeps that
    /// elapsed first; zero means it held on the immediate first check.
    Converged { ticks: u32 },
    /// The budget ran out before the condition held.
    TimedOut { waited: Duration },
    /// A check reported an error, so polling stopped at once.
    Failed { detail: String },
    /// Cancellation was observed at a suspension point.
    Cancelled,
}

/// Repeatedly evaluate `check` until it is satisfied, errors, times out,
/// or the run is cancelled.
///
/// The first check runs immediately: a condition that already holds
/// converges without sleeping. Between checks the caller suspends on the
/// timer; cancellation is observed at every suspension point, and once
/// observed no further check is issued.
pub async fn await_condition<C, Fut>(
    criterion: &Criterion,
    mut cancel: CancelToken,
    mut check: C,
) -> PollOutcome
where
    C: FnMut() -> Fut,
    Fut: Future<Output = ConditionState>,
{
    let started = Instant::now();
    let mut ticks = 0u32;

    loop {
        if cancel.is_cancelled() {
            debug!(condition = %criterion.what, "wait cancelled");
            return PollOutcome::Cancelled;
        }

        match check().await {
            ConditionState::Satisfied => {
                debug!(condition = %criterion.what, ticks, "condition satisfied");
                return PollOutcome::Converged { ticks };
            }
            ConditionState::Errored(detail) => {
                warn!(condition = %criterion.what, %detail, "wait stopped on error");
                return PollOutcome::Failed { detail };
            }
            ConditionState::NotYet => {}
        }

        let waited = started.elapsed();
        if waited >= criterion.timeout {
            warn!(
                condition = %criterion.what,
                waited_secs = waited.as_secs(),
                budget_secs = criterion.timeout.as_secs(),
                "condition did not hold within budget"
            );
            return PollOutcome::TimedOut { waited };
        }

        tokio::select! {
            _ = tokio::time::sleep(criterion.interval) => ticks += 1,
            _ = cancel.cancelled() => {
                debug!(condition = %criterion.what, "wait cancelled");
                return PollOutcome::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cancel::cancel_pair;

    fn criterion(interval_secs: u64, timeout_secs: u64) -> Criterion {
        Criterion::new(
            "test condition",
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_on_first_check_converges_without_sleeping() {
        let (_canceller, token) = cancel_pair();
        let before = Instant::now();

        let outcome = await_condition(&criterion(10, 60), token, || async {
            ConditionState::Satisfied
        })
        .await;

        assert_eq!(outcome, PollOutcome::Converged { ticks: 0 });
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn converges_at_the_tick_the_condition_first_holds() {
        let (_canceller, token) = cancel_pair();
        let checks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&checks);

        let outcome = await_condition(&criterion(10, 600), token, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 3 {
                    ConditionState::Satisfied
                } else {
                    ConditionState::NotYet
                }
            }
        })
        .await;

        // Two sleeps before the third check saw the condition hold.
        assert_eq!(outcome, PollOutcome::Converged { ticks: 2 });
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_satisfied_times_out_within_one_interval_of_budget() {
        let (_canceller, token) = cancel_pair();
        let crit = criterion(10, 45);

        let outcome = await_condition(&crit, token, || async { ConditionState::NotYet }).await;

        match outcome {
            PollOutcome::TimedOut { waited } => {
                assert!(waited >= crit.timeout);
                assert!(waited <= crit.timeout + crit.interval);
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn errored_check_stops_polling_immediately() {
        let (_canceller, token) = cancel_pair();
        let checks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&checks);

        let outcome = await_condition(&criterion(10, 600), token, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 2 {
                    ConditionState::Errored("provider rejected request".to_string())
                } else {
                    ConditionState::NotYet
                }
            }
        })
        .await;

        assert_eq!(
            outcome,
            PollOutcome::Failed {
                detail: "provider rejected request".to_string()
            }
        );
        // No third check after the error.
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn already_cancelled_wait_issues_no_checks() {
        let (canceller, token) = cancel_pair();
        canceller.cancel();
        let checks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&checks);

        let outcome = await_condition(&criterion(10, 600), token, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { ConditionState::NotYet }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_between_ticks_stops_the_wait() {
        let (canceller, token) = cancel_pair();
        let checks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&checks);

        // Cancel partway through the third interval sleep.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            canceller.cancel();
        });

        let outcome = await_condition(&criterion(10, 600), token, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { ConditionState::NotYet }
        })
        .await;

        assert_eq!(outcome, PollOutcome::Cancelled);
        // Checks ran at t=0, 10, 20; the cancel at t=25 beat the t=30 tick.
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_allows_exactly_one_check() {
        let (_canceller, token) = cancel_pair();
        let checks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&checks);

        let outcome = await_condition(&criterion(10, 0), token, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { ConditionState::NotYet }
        })
        .await;

        assert!(matches!(outcome, PollOutcome::TimedOut { .. }));
        assert_eq!(checks.load(Ordering::SeqCst), 1);
    }
}
