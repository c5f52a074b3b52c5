//! Retry logic with exponential backoff and jitter for transient errors.
//!
//! Each action runs through an explicit state machine:
//! `Pending -> Attempting -> {Succeeded | Backoff -> Attempting | Failed}`.

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Retry policy for directory operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Random extra delay as a fraction of the computed delay, in [0, 1]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom settings and default cap/jitter.
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-indexed), without jitter.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Add random jitter to a delay using the configured factor.
    pub fn add_jitter(&self, delay: Duration) -> Duration {
        let factor = self.jitter_factor.clamp(0.0, 1.0);
        if factor == 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter_range = delay.as_secs_f64() * factor;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_range);
        delay + Duration::from_secs_f64(jitter)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback: Sync {
    /// Called before sleeping ahead of another attempt.
    ///
    /// `attempt` is the attempt that just failed (1-indexed).
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay: Duration) {}
}

/// Callback that logs retries at warn level.
pub struct LogCallback<'a> {
    /// Label of the operation being retried
    pub operation: &'a str,
}

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        log::warn!(
            "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
            self.operation,
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );
    }
}

/// State of one action's retry loop
#[derive(Debug)]
pub enum AttemptState<T> {
    Pending,
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded { value: T, attempts: u32 },
    Failed { error: Error, attempts: u32 },
}

impl<T> AttemptState<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }

    fn advance<F>(self, policy: &RetryPolicy, callback: &dyn RetryCallback, operation: &mut F) -> Self
    where
        F: FnMut(u32) -> Result<T>,
    {
        match self {
            Self::Pending => Self::Attempting { attempt: 1 },
            Self::Attempting { attempt } => match operation(attempt) {
                Ok(value) => Self::Succeeded {
                    value,
                    attempts: attempt,
                },
                Err(error) if error.is_retryable() && attempt < policy.attempts() => {
                    let delay = policy.add_jitter(policy.delay_for_attempt(attempt - 1));
                    callback.on_retry(attempt, policy.attempts(), &error, delay);
                    Self::Backoff { attempt, delay }
                }
                Err(error) => Self::Failed {
                    error,
                    attempts: attempt,
                },
            },
            Self::Backoff { attempt, delay } => {
                thread::sleep(delay);
                Self::Attempting {
                    attempt: attempt + 1,
                }
            }
            terminal @ (Self::Succeeded { .. } | Self::Failed { .. }) => terminal,
        }
    }
}

/// Final result of a retried operation and the number of attempts made
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Execute an operation with retry logic.
///
/// Retries while the operation returns a retryable error and attempts
/// remain; non-retryable errors fail at once. The operation receives the
/// current attempt number (1-indexed).
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    callback: &dyn RetryCallback,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let mut state = AttemptState::Pending;
    loop {
        state = match state {
            AttemptState::Succeeded { value, attempts } => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            AttemptState::Failed { error, attempts } => {
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }
            live => live.advance(policy, callback, &mut operation),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
        }
    }

    fn throttled() -> Error {
        Error::Throttled {
            message: "Rate exceeded".to_string(),
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(300),
            ..RetryPolicy::new(5, Duration::from_secs(1), 2.0)
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(10), 10.0);
        assert_eq!(policy.delay_for_attempt(5), policy.max_delay);
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let policy = RetryPolicy::default();
        let base = Duration::from_secs(4);
        for _ in 0..50 {
            let jittered = policy.add_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_success_first_try() {
        let outcome = with_retry(&RetryPolicy::no_retry(), &NoCallback, |_| Ok::<_, Error>(42));
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_non_retryable_error_fails_at_once() {
        let attempts = Rc::new(Cell::new(0));
        let attempts_clone = attempts.clone();

        let outcome: RetryOutcome<()> = with_retry(&fast_policy(3), &NoCallback, |_| {
            attempts_clone.set(attempts_clone.get() + 1);
            Err(Error::Conflict {
                message: "exists".to_string(),
            })
        });

        assert!(matches!(outcome.result, Err(Error::Conflict { .. })));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_eventual_success() {
        let outcome = with_retry(&fast_policy(3), &NoCallback, |attempt| {
            if attempt < 3 { Err(throttled()) } else { Ok(attempt) }
        });

        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_all_attempts_fail() {
        let outcome: RetryOutcome<()> = with_retry(&fast_policy(3), &NoCallback, |_| {
            Err(Error::Timeout {
                operation: "CreateUser".to_string(),
            })
        });

        assert!(matches!(outcome.result, Err(Error::Timeout { .. })));
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_zero_max_attempts_still_tries_once() {
        let outcome: RetryOutcome<()> = with_retry(&fast_policy(0), &NoCallback, |_| Err(throttled()));
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &Error, _: Duration) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(count.clone());

        let _: RetryOutcome<()> = with_retry(&fast_policy(3), &callback, |_| Err(throttled()));

        // Called for each retry, not after the last attempt
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_state_machine_transitions() {
        let policy = fast_policy(2);
        let mut calls = 0;
        let mut op = |_: u32| {
            calls += 1;
            if calls == 1 { Err(throttled()) } else { Ok(()) }
        };

        let state = AttemptState::Pending;
        let state = state.advance(&policy, &NoCallback, &mut op);
        assert!(matches!(state, AttemptState::Attempting { attempt: 1 }));
        let state = state.advance(&policy, &NoCallback, &mut op);
        assert!(matches!(state, AttemptState::Backoff { attempt: 1, .. }));
        let state = state.advance(&policy, &NoCallback, &mut op);
        assert!(matches!(state, AttemptState::Attempting { attempt: 2 }));
        let state = state.advance(&policy, &NoCallback, &mut op);
        assert!(matches!(state, AttemptState::Succeeded { attempts: 2, .. }));
        assert!(state.is_terminal());
    }
}
