//! Bounded retry for filesystem access on slow or shared filesystems.

use std::time::Duration;

use serde::Deserialize;

/// Outcome of one attempt inside [`RetryPolicy::run`].
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Stop and return this value.
    Done(T),
    /// Stop and return this error without retrying.
    Fatal(E),
    /// The attempt hit a transient failure; retry if budget remains.
    Transient(std::io::Error),
}

/// The retry budget was spent.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last_error: std::io::Error,
}

/// Retry budget: attempt count, short wait, and a longer backoff after repeated failures.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,

    /// Pause after an early failure.
    #[serde(with = "millis")]
    pub wait: Duration,

    /// Pause once `backoff_after` consecutive attempts have failed.
    #[serde(with = "millis")]
    pub backoff: Duration,

    /// Number of failed attempts after which `backoff` replaces `wait`.
    pub backoff_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait: Duration::from_millis(100),
            backoff: Duration::from_millis(1000),
            backoff_after: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            wait: Duration::ZERO,
            backoff: Duration::ZERO,
            backoff_after: 1,
        }
    }

    /// Pause to apply after `failed` attempts have failed in a row.
    pub fn delay_after(&self, failed: u32) -> Duration {
        if failed < self.backoff_after {
            self.wait
        } else {
            self.backoff
        }
    }

    /// Run `op` under this policy, sleeping on the current thread between attempts.
    pub fn run<T, E>(
        &self,
        op: impl FnMut(u32) -> Attempt<T, E>,
    ) -> Result<T, RetryError<E>> {
        self.run_with(op, std::thread::sleep)
    }

    /// Run `op` under this policy using `sleep` to wait between attempts.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run_with<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Attempt<T, E>,
        mut sleep: impl FnMut(Duration),
    ) -> Result<T, RetryError<E>> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(RetryError::Fatal(err)),
                Attempt::Transient(io_err) => {
                    if attempt >= max_attempts {
                        return Err(RetryError::Exhausted(Exhausted {
                            attempts: attempt,
                            last_error: io_err,
                        }));
                    }

                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "Filesystem access failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        max_attempts,
                        io_err,
                        delay
                    );
                    sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Failure of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    Fatal(E),
    Exhausted(Exhausted),
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            wait: Duration::from_millis(10),
            backoff: Duration::from_millis(500),
            backoff_after: 2,
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut sleeps = Vec::new();
        let result: Result<u32, RetryError<()>> = policy(5).run_with(
            |attempt| {
                if attempt < 4 {
                    Attempt::Transient(io::Error::other("stale handle"))
                } else {
                    Attempt::Done(attempt)
                }
            },
            |d| sleeps.push(d),
        );

        assert_eq!(result.unwrap(), 4);
        assert_eq!(
            sleeps,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_exhausted_reports_attempts() {
        let mut calls = 0;
        let mut sleeps = 0;
        let result: Result<(), RetryError<()>> = policy(3).run_with(
            |_| {
                calls += 1;
                Attempt::Transient(io::Error::other("timeout"))
            },
            |_| sleeps += 1,
        );

        match result {
            Err(RetryError::Exhausted(exhausted)) => {
                assert_eq!(exhausted.attempts, 3);
                assert_eq!(exhausted.last_error.to_string(), "timeout");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls, 3);
        assert_eq!(sleeps, 2);
    }

    #[test]
    fn test_fatal_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = policy(10).run_with(
            |_| {
                calls += 1;
                Attempt::Fatal("not found")
            },
            |_| panic!("must not sleep"),
        );
        assert!(matches!(result, Err(RetryError::Fatal("not found"))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let mut calls = 0;
        let result: Result<(), RetryError<()>> = policy(0).run_with(
            |_| {
                calls += 1;
                Attempt::Transient(io::Error::other("x"))
            },
            |_| {},
        );
        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_deserialize_from_millis() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 7, "wait": 5, "backoff": 50}"#).unwrap();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.wait, Duration::from_millis(5));
        assert_eq!(policy.backoff, Duration::from_millis(50));
        assert_eq!(policy.backoff_after, 2);
    }
}
