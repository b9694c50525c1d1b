//! The Retry Engine: exponential backoff with jitter around a fallible
//! thunk, with a separate, smaller retry budget for Git-LFS errors.

use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::git::error::{StderrClass, classify_git_stderr, is_retryable_class};

/// `maxAttempts` either bounds the number of tries or allows unlimited ones
/// — unlimited only makes sense bounded by an outer cancellation signal, so
/// callers that choose it are expected to also wire up cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    Unlimited,
    Bounded(u32),
}

impl Default for MaxAttempts {
    fn default() -> Self {
        MaxAttempts::Unlimited
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: MaxAttempts,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: Option<Duration>,
    pub max_lfs_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MaxAttempts::Unlimited,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(600_000),
            backoff_multiplier: 2.0,
            jitter: None,
            max_lfs_retries: 2,
        }
    }
}

impl RetryConfig {
    /// `min(initial * multiplier^(attempt-1), max_delay)`, `attempt` is
    /// 1-based (the delay *before* the next attempt).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = scaled.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        match self.jitter {
            Some(jitter) if jitter.as_millis() > 0 => {
                let jitter_ms = jitter.as_millis() as i64;
                let noise = rand::rng().random_range(-jitter_ms..=jitter_ms);
                let total = base.as_millis() as i64 + noise;
                Duration::from_millis(total.max(0) as u64)
            }
            _ => base,
        }
    }
}

/// Error returned when retries are exhausted. Carries the last underlying
/// error and, when the exhausted budget was the LFS one, a hint recommending
/// `skipLfs` regardless of how much of the general budget remains.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("operation failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("git-lfs retries exhausted after {attempts} attempt(s), consider enabling skipLfs: {source}")]
    LfsExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// Run `op` until it succeeds or the retry budget (general or LFS) is
/// exhausted. `should_retry` overrides the default stderr-pattern
/// classification when supplied; most callers pass `None` and rely on
/// [`classify_git_stderr`].
pub fn run_with_retry<T, F>(
    config: &RetryConfig,
    mut op: F,
    mut on_retry: impl FnMut(&anyhow::Error, u32),
    should_retry: Option<&dyn Fn(&anyhow::Error) -> bool>,
) -> Result<T, RetryError>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let mut attempt = 0u32;
    let mut lfs_attempts = 0u32;

    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classify_git_stderr(&err.to_string());
                let retryable = match should_retry {
                    Some(predicate) => predicate(&err),
                    None => is_retryable_class(class),
                };

                if class == StderrClass::Lfs {
                    lfs_attempts += 1;
                    if lfs_attempts > config.max_lfs_retries {
                        return Err(RetryError::LfsExhausted {
                            attempts: lfs_attempts,
                            source: err,
                        });
                    }
                } else if !retryable {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                } else if let MaxAttempts::Bounded(max) = config.max_attempts {
                    if attempt >= max {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            source: err,
                        });
                    }
                }

                on_retry(&err, attempt);
                thread::sleep(config.jittered_delay(attempt));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_delay_for_attempt_respects_cap() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(5000));
    }

    #[test]
    fn test_succeeds_without_retry() {
        let config = RetryConfig::default();
        let calls = RefCell::new(0);
        let result: Result<i32, RetryError> = run_with_retry(
            &config,
            || {
                *calls.borrow_mut() += 1;
                Ok(42)
            },
            |_, _| {},
            None,
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_unrecognized_error_is_not_retried() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        };
        let calls = RefCell::new(0);
        let result: Result<(), RetryError> = run_with_retry(
            &config,
            || {
                *calls.borrow_mut() += 1;
                Err(anyhow::anyhow!("fatal: some completely novel error"))
            },
            |_, _| {},
            None,
        );
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_network_error_retries_until_bounded_limit() {
        let config = RetryConfig {
            max_attempts: MaxAttempts::Bounded(3),
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        };
        let calls = RefCell::new(0);
        let retries_seen = RefCell::new(0);
        let result: Result<(), RetryError> = run_with_retry(
            &config,
            || {
                *calls.borrow_mut() += 1;
                Err(anyhow::anyhow!("fatal: Could not read from remote repository."))
            },
            |_, _| *retries_seen.borrow_mut() += 1,
            None,
        );
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(*calls.borrow(), 3);
        assert_eq!(*retries_seen.borrow(), 2);
    }

    #[test]
    fn test_lfs_error_bounded_by_separate_budget() {
        let config = RetryConfig {
            max_attempts: MaxAttempts::Unlimited,
            max_lfs_retries: 1,
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        };
        let calls = RefCell::new(0);
        let result: Result<(), RetryError> = run_with_retry(
            &config,
            || {
                *calls.borrow_mut() += 1;
                Err(anyhow::anyhow!("smudge filter lfs failed"))
            },
            |_, _| {},
            None,
        );
        assert!(matches!(result, Err(RetryError::LfsExhausted { attempts: 2, .. })));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_custom_predicate_overrides_default_classification() {
        let config = RetryConfig {
            max_attempts: MaxAttempts::Bounded(2),
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        };
        let calls = RefCell::new(0);
        let result: Result<(), RetryError> = run_with_retry(
            &config,
            || {
                *calls.borrow_mut() += 1;
                Err(anyhow::anyhow!("totally custom condition"))
            },
            |_, _| {},
            Some(&|_err| true),
        );
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 2, .. })));
    }
}
