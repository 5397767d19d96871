//! Bounded retry with exponential backoff for outbound calls.
//!
//! Both the translator and the notifier go through [`retry_with_backoff`].
//! An attempt is retried only when the caller's predicate says the failure is
//! transient and attempts remain; the delay after attempt `n` (1-based) is
//! `backoff_unit * backoff_base ^ n`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Upstream statuses that are safe to retry.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Default cap on upstream calls per operation.
pub const MAX_ATTEMPTS: u32 = 3;

/// Longest single backoff sleep, whatever the policy computes.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_base: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_base: 5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base: 5,
            backoff_unit: Duration::ZERO,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt, capped at [`MAX_BACKOFF`].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .checked_pow(attempt)
            .and_then(|factor| self.backoff_unit.checked_mul(factor))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single outbound call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Upstream answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Request never produced a response (DNS, connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// Response arrived but could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CallError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Default predicate: only the statuses in [`TRANSIENT_STATUSES`] are retried.
pub fn is_transient(err: &CallError) -> bool {
    err.status()
        .is_some_and(|status| TRANSIENT_STATUSES.contains(&status))
}

/// Why a retried operation gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The predicate rejected the failure; no further attempts were made.
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent { error, .. } => error,
            Self::Exhausted { last, .. } => last,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run `op` until it succeeds, fails permanently, or exhausts the policy.
///
/// `op` receives the 1-based attempt number. `label` only feeds the log.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !is_retryable(&error) => {
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error,
                });
            }
            Err(last) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    call = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(code: u16) -> CallError {
        CallError::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn transient_set_matches() {
        for code in TRANSIENT_STATUSES {
            assert!(is_transient(&status(code)), "{code} should be transient");
        }
        assert!(!is_transient(&status(400)));
        assert!(!is_transient(&status(401)));
        assert!(!is_transient(&status(501)));
        assert!(!is_transient(&CallError::Transport("reset".into())));
        assert!(!is_transient(&CallError::Malformed("eof".into())));
    }

    #[test]
    fn default_backoff_is_powers_of_five() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(25));
        assert_eq!(policy.delay_for(3), Duration::from_secs(125));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(4), MAX_BACKOFF);
        assert_eq!(policy.delay_for(40), MAX_BACKOFF);
        assert_eq!(policy.delay_for(u32::MAX), MAX_BACKOFF);

        let slow = RetryPolicy {
            backoff_unit: Duration::from_secs(u64::MAX),
            ..RetryPolicy::default()
        };
        assert_eq!(slow.delay_for(1), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let result: Result<u32, RetryError<CallError>> =
            retry_with_backoff(&RetryPolicy::immediate(3), "test", is_transient, |_| async {
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&RetryPolicy::immediate(3), "test", is_transient, |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(status(503))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_backoff(&RetryPolicy::immediate(MAX_ATTEMPTS), "test", is_transient, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(status(429)) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_backoff(&RetryPolicy::immediate(3), "test", is_transient, |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(status(401)) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.into_inner(), status(401));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: 5,
            backoff_unit: Duration::from_millis(10),
        };

        let _: Result<(), _> =
            retry_with_backoff(&policy, "test", is_transient, |_| async { Err(status(500)) }).await;

        // 10ms * 5^1 + 10ms * 5^2
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
