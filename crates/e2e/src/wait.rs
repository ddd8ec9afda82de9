//! Bounded waits
//!
//! Every suspension point in a scenario (element appearance, text appearance,
//! navigation, context switches) polls a condition until it holds or a
//! deadline passes. Nothing sleeps for a fixed amount of time.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};

use crate::error::E2eError;

/// Timeout and polling interval for one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_millis(timeout_ms: u64, interval_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms.max(1)),
        )
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from_millis(4000, 100)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("condition not met after {elapsed:?}")]
pub struct WaitTimeout {
    pub elapsed: Duration,
}

#[derive(Error, Debug)]
pub enum WaitError {
    #[error(transparent)]
    TimedOut(#[from] WaitTimeout),

    #[error(transparent)]
    Check(#[from] E2eError),
}

impl WaitError {
    /// Map a timeout to a domain error, keeping check errors as they are.
    pub fn on_timeout(self, f: impl FnOnce(Duration) -> E2eError) -> E2eError {
        match self {
            WaitError::TimedOut(t) => f(t.elapsed),
            WaitError::Check(e) => e,
        }
    }
}

/// Deadline tracker for hand-written polling loops.
///
/// The caller checks, and on a miss calls [`Poller::tick`], which sleeps until
/// the next check time. The last check happens exactly at the deadline; the
/// tick after it reports the timeout.
#[derive(Debug)]
pub struct Poller {
    start: Instant,
    deadline: Instant,
    interval: Duration,
}

impl Poller {
    pub fn start(policy: &WaitPolicy) -> Self {
        let start = Instant::now();
        Self {
            start,
            deadline: start + policy.timeout,
            interval: policy.interval,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub async fn tick(&mut self) -> Result<(), WaitTimeout> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(WaitTimeout {
                elapsed: now - self.start,
            });
        }
        sleep_until((now + self.interval).min(self.deadline)).await;
        Ok(())
    }
}

/// Poll `check` until it yields a value or `policy.timeout` elapses.
///
/// A check error aborts the wait immediately.
pub async fn await_condition<T, F, Fut>(policy: &WaitPolicy, mut check: F) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E2eError>>,
{
    let mut poller = Poller::start(policy);
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        poller.tick().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_immediately_when_condition_holds() {
        let policy = WaitPolicy::from_millis(1000, 100);
        let start = Instant::now();
        let value = await_condition(&policy, || async { Ok(Some(7)) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_once_condition_becomes_true() {
        let policy = WaitPolicy::from_millis(1000, 100);
        let start = Instant::now();
        let ready_at = start + Duration::from_millis(350);

        let value = await_condition(&policy, || async move {
            Ok((Instant::now() >= ready_at).then_some("ready"))
        })
        .await
        .unwrap();

        assert_eq!(value, "ready");
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_no_earlier_than_deadline() {
        let policy = WaitPolicy::from_millis(1000, 300);
        let checks = AtomicUsize::new(0);
        let start = Instant::now();

        let err = await_condition(&policy, || {
            checks.fetch_add(1, Ordering::SeqCst);
            async { Ok::<Option<()>, E2eError>(None) }
        })
        .await
        .unwrap_err();

        let WaitError::TimedOut(timeout) = err else {
            panic!("expected timeout, got {err:?}");
        };
        assert!(timeout.elapsed >= policy.timeout);
        assert_eq!(start.elapsed(), policy.timeout);
        // 0, 300, 600, 900 and a final check at the deadline
        assert_eq!(checks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_true_at_deadline_still_succeeds() {
        let policy = WaitPolicy::from_millis(1000, 300);
        let start = Instant::now();
        let ready_at = start + Duration::from_millis(1000);

        let result = await_condition(&policy, || async move {
            Ok((Instant::now() >= ready_at).then_some(()))
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_aborts_wait() {
        let policy = WaitPolicy::from_millis(1000, 100);
        let start = Instant::now();

        let err = await_condition(&policy, || async {
            Err::<Option<()>, _>(E2eError::Driver("session lost".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Check(E2eError::Driver(_))));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_on_timeout_maps_only_timeouts() {
        let mapped = WaitError::TimedOut(WaitTimeout {
            elapsed: Duration::from_millis(5),
        })
        .on_timeout(|waited| E2eError::AssertionFailed {
            text: "x".into(),
            context: "root".into(),
            waited,
        });
        assert_eq!(mapped.waited(), Some(Duration::from_millis(5)));

        let kept = WaitError::Check(E2eError::Config("bad".into()))
            .on_timeout(|_| unreachable!());
        assert!(matches!(kept, E2eError::Config(_)));
    }
}
