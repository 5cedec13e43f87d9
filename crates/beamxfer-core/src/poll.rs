//! Poll-until primitive shared by every wait loop.
//!
//! # Design
//! - One loop for transfer tasks, delete tasks, batch jobs and flow runs.
//! - The check decides readiness; a predicate flags statuses that will never resolve.
//! - The sleep is the only suspension point besides the check itself.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::trace;

/// Interval and budget for a wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between checks.
    pub interval: Duration,
    /// Total wait budget measured from the first check.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Default delay between status checks.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
    /// Default wait budget.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

    /// Construct a policy.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval with a different budget.
    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            interval: self.interval,
            timeout,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL, Self::DEFAULT_TIMEOUT)
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T, S> {
    /// The awaited operation reached a terminal state.
    Ready(T),
    /// Still in progress; carries the status observed.
    Pending(S),
}

/// Ways a poll loop ends without a terminal value.
#[derive(Debug)]
pub enum PollError<S, E> {
    /// The check itself failed.
    Check(E),
    /// The predicate flagged the observed status as non-retryable.
    NonRetryable(S),
    /// The budget ran out while still pending.
    TimedOut {
        /// Last pending status observed.
        last: S,
        /// Time spent waiting.
        waited: Duration,
    },
}

/// Run `check` every `policy.interval` until it reports [`Probe::Ready`].
///
/// Each pending status is first offered to `non_retryable`; a `true` answer ends the loop
/// immediately. Otherwise the loop sleeps, unless the budget is spent.
///
/// # Errors
///
/// Returns [`PollError::Check`] when the check fails, [`PollError::NonRetryable`] when the
/// predicate fires, and [`PollError::TimedOut`] when the budget is exhausted.
pub async fn poll_until<T, S, E, F, Fut, P>(
    policy: PollPolicy,
    mut check: F,
    non_retryable: P,
) -> Result<T, PollError<S, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T, S>, E>>,
    P: Fn(&S) -> bool,
{
    let started = Instant::now();
    loop {
        let status = match check().await.map_err(PollError::Check)? {
            Probe::Ready(value) => return Ok(value),
            Probe::Pending(status) => status,
        };
        if non_retryable(&status) {
            return Err(PollError::NonRetryable(status));
        }
        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Err(PollError::TimedOut {
                last: status,
                waited,
            });
        }
        trace!(waited_secs = waited.as_secs(), "still pending");
        sleep(policy.interval.min(policy.timeout - waited)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(5), Duration::from_secs(20))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_ready_value_after_pending_checks() {
        let calls = AtomicUsize::new(0);
        let result: Result<&str, PollError<&str, ()>> = poll_until(
            policy(),
            || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok(if call < 2 {
                        Probe::Pending("ACTIVE")
                    } else {
                        Probe::Ready("done")
                    })
                }
            },
            |_| false,
        )
        .await;
        assert!(matches!(result, Ok("done")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_last_status() {
        let started = Instant::now();
        let result: Result<(), PollError<&str, ()>> = poll_until(
            policy(),
            || async { Ok(Probe::Pending("QUEUED")) },
            |_| false,
        )
        .await;
        match result {
            Err(PollError::TimedOut { last, waited }) => {
                assert_eq!(last, "QUEUED");
                assert!(waited >= Duration::from_secs(20));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_status_stops_without_sleeping() {
        let started = Instant::now();
        let result: Result<(), PollError<&str, ()>> = poll_until(
            policy(),
            || async { Ok(Probe::Pending("PERMISSION_DENIED")) },
            |status| *status == "PERMISSION_DENIED",
        )
        .await;
        assert!(matches!(
            result,
            Err(PollError::NonRetryable("PERMISSION_DENIED"))
        ));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_end_the_loop() {
        let result: Result<(), PollError<(), &str>> =
            poll_until(policy(), || async { Err("boom") }, |_| false).await;
        assert!(matches!(result, Err(PollError::Check("boom"))));
    }

    #[test]
    fn default_policy_matches_service_defaults() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.timeout, Duration::from_secs(600));
        assert_eq!(
            policy.with_timeout(Duration::from_secs(1)).timeout,
            Duration::from_secs(1)
        );
    }
}
