//! Retry policies for API mutations.
//!
//! Two shapes are supported: a fixed number of attempts with a fixed delay
//! between them, and retrying with a fixed delay until a wall-clock budget
//! is spent. Sleeps go through `tokio::time`, so tests can run them on a
//! paused clock.
//!
//! # Example
//!
//! ```ignore
//! use psp_reconciler::retry::RetryPolicy;
//!
//! let outcome = RetryPolicy::default()
//!     .run("create clusterrole", || async { api.create(&pp, &role).await })
//!     .await;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, warn};

/// Default attempt count for bounded retry
pub const DEFAULT_ATTEMPTS: u32 = 5;
/// Default delay between attempts
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);
/// Default budget for time-boxed retry
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(30);

/// How a failing operation is retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Try `attempts` times, sleeping `delay` between consecutive attempts
    Bounded { attempts: u32, delay: Duration },
    /// Keep trying every `delay` until `budget` has elapsed
    TimeBoxed { budget: Duration, delay: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_ATTEMPTS, DEFAULT_DELAY)
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Number of times the operation ran
    pub attempts: u32,
}

impl RetryPolicy {
    /// Bounded retry; zero attempts is treated as one
    pub fn bounded(attempts: u32, delay: Duration) -> Self {
        Self::Bounded {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn time_boxed(budget: Duration, delay: Duration) -> Self {
        Self::TimeBoxed { budget, delay }
    }

    /// Time-boxed retry with the default 30s budget and 5s delay
    pub fn default_time_boxed() -> Self {
        Self::time_boxed(DEFAULT_BUDGET, DEFAULT_DELAY)
    }

    pub fn delay(&self) -> Duration {
        match self {
            Self::Bounded { delay, .. } | Self::TimeBoxed { delay, .. } => *delay,
        }
    }

    /// Decide whether another attempt is allowed after `attempts` failures,
    /// `elapsed` after the first attempt started.
    fn should_retry(&self, attempts: u32, elapsed: Duration) -> bool {
        match self {
            Self::Bounded { attempts: max, .. } => attempts < *max,
            Self::TimeBoxed { budget, delay } => elapsed + *delay <= *budget,
        }
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// Every error is retried; callers that have non-retryable failures must
    /// handle them before entering the retry loop.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => {
                    if !self.should_retry(attempts, start.elapsed()) {
                        error!(
                            operation = %operation_name,
                            attempt = attempts,
                            error = %e,
                            "Operation failed, giving up"
                        );
                        return RetryOutcome {
                            result: Err(e),
                            attempts,
                        };
                    }

                    let delay = self.delay();
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %e,
                        delay = ?delay,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
