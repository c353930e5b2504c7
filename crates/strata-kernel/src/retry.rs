//! Bounded exponential backoff for provider calls

use crate::provider::ProviderError;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use strata_catalog::ResourceId;

/// Retry policy for transient provider errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total calls allowed per operation, first attempt included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
    /// Growth factor between delays
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// With max attempts
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// With initial backoff
    #[inline]
    #[must_use]
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Delay schedule: exponential, capped, no jitter, never gives up on its own
    ///
    /// The attempt limit is enforced by [`with_retry`], not by the schedule.
    #[must_use]
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_multiplier(f64::from(self.multiplier.max(1)))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A provider operation that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    /// Calls issued
    pub attempts: u32,
    /// Last error seen
    pub error: ProviderError,
}

impl CallFailure {
    /// Message for the fatal error surfaced to the caller
    #[must_use]
    pub fn message(&self) -> String {
        match &self.error {
            ProviderError::Transient(msg) => {
                format!("retry limit of {} attempt(s) exhausted: {msg}", self.attempts)
            }
            ProviderError::Fatal(msg) => msg.clone(),
        }
    }
}

/// Run `call` until it succeeds, fails fatally, or attempts run out
///
/// `call` receives the 1-based attempt number. Delays between attempts
/// follow [`RetryPolicy::schedule`].
///
/// # Errors
/// `CallFailure` with the attempt count and last error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    resource: &ResourceId,
    operation: &'static str,
    mut call: F,
) -> Result<(T, u32), CallFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let limit = policy.attempts();
    let issued = AtomicU32::new(0);

    let attempt_once = || {
        let attempt = issued.fetch_add(1, Ordering::SeqCst) + 1;
        let pending = call(attempt);
        async move {
            pending.await.map_err(|error| {
                if error.is_transient() && attempt < limit {
                    backoff::Error::transient(error)
                } else {
                    backoff::Error::permanent(error)
                }
            })
        }
    };
    let log_retry = |error: ProviderError, wait: Duration| {
        tracing::warn!(
            %resource,
            operation,
            attempt = issued.load(Ordering::SeqCst),
            delay_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            %error,
            "transient provider error, retrying"
        );
    };

    let outcome = backoff::future::retry_notify(policy.schedule(), attempt_once, log_retry).await;
    let attempts = issued.load(Ordering::SeqCst);
    match outcome {
        Ok(value) => Ok((value, attempts)),
        Err(error) => Err(CallFailure { attempts, error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_initial_backoff(Duration::from_millis(1))
    }

    fn db() -> ResourceId {
        ResourceId::new("db").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn waits_grow_exponentially_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            multiplier: 2,
        };
        let seen = &Mutex::new(Vec::new());
        let result: Result<((), u32), _> = with_retry(&policy, &db(), "create", move |_| async move {
            seen.lock().push(Instant::now());
            Err(ProviderError::Transient("throttled".into()))
        })
        .await;
        assert_eq!(result.unwrap_err().attempts, 6);

        let seen = seen.lock();
        let waits: Vec<u128> = seen
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect();
        let expected = [100, 200, 400, 500, 500];
        assert_eq!(waits.len(), expected.len());
        for (wait, want) in waits.iter().zip(expected) {
            assert!(
                (want..=want + 1).contains(wait),
                "waited {wait}ms, expected {want}ms"
            );
        }
    }

    #[tokio::test]
    async fn transient_twice_then_success() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(&fast(3), &db(), "create", move |_| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Transient("throttled".into()))
            } else {
                Ok("i-1")
            }
        })
        .await;
        assert_eq!(result, Ok(("i-1", 3)));
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let calls = &AtomicU32::new(0);
        let result: Result<((), u32), _> = with_retry(&fast(3), &db(), "create", move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transient("throttled".into()))
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(failure.message().contains("retry limit of 3"));
    }

    #[tokio::test]
    async fn fatal_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<((), u32), _> = with_retry(&fast(5), &db(), "create", move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Fatal("quota exceeded".into()))
        })
        .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let calls = &AtomicU32::new(0);
        let _ = with_retry(&fast(0), &db(), "create", move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
