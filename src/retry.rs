//! Bounded retry with exponential backoff
//!
//! Portal lookups fail intermittently (permission hiccups on group listings,
//! usage statistics timing out), so per-item calls go through [`retry`].
//! The wrapper is blocking and single-threaded: the calling thread sleeps
//! between attempts.
//!
//! The delay before retry `n` (1-indexed) is `initial_delay_secs ^ n`
//! seconds, so the defaults wait 2, 4 and 8 seconds before giving up on the
//! fourth call.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

/// Default number of retries after the initial call
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base in seconds
pub const DEFAULT_INITIAL_DELAY_SECS: f64 = 2.0;

/// Retry policy for fallible portal calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed call
    pub max_retries: u32,
    /// Base of the exponential delay, in seconds
    pub initial_delay_secs: f64,
    /// Log every retry at `warn` instead of `debug`
    pub verbose: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_secs: DEFAULT_INITIAL_DELAY_SECS,
            verbose: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given retry budget and backoff base
    pub fn new(max_retries: u32, initial_delay_secs: f64) -> Self {
        Self {
            max_retries,
            initial_delay_secs,
            verbose: false,
        }
    }

    /// Policy that retries without sleeping
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, 0.0)
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    ///
    /// Zero, negative and NaN bases collapse to no delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.initial_delay_secs.is_nan() || self.initial_delay_secs <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(self.initial_delay_secs.powi(exponent))
            .unwrap_or(Duration::MAX)
    }
}

/// Run `operation` until it succeeds or the retry budget is spent.
///
/// The operation is called at most `policy.max_retries + 1` times. The last
/// error is returned unchanged.
pub fn retry<T, E, F>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    retry_with_sleep(policy, thread::sleep, operation)
}

/// Like [`retry`], but gives up at once on errors `should_retry` rejects.
///
/// Errors that will not go away by waiting (an expired token) are returned
/// after the first call instead of sleeping through the whole budget.
pub fn retry_if<T, E, F, P>(policy: &RetryPolicy, should_retry: P, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    retry_if_with_sleep(policy, thread::sleep, should_retry, operation)
}

/// [`retry`] with an injectable sleep, used by tests and callers that
/// account for backoff time themselves.
pub fn retry_with_sleep<T, E, F, S>(policy: &RetryPolicy, sleep: S, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
    S: FnMut(Duration),
{
    retry_if_with_sleep(policy, sleep, |_| true, operation)
}

/// [`retry_if`] with an injectable sleep
pub fn retry_if_with_sleep<T, E, F, S, P>(
    policy: &RetryPolicy,
    mut sleep: S,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
    S: FnMut(Duration),
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt > policy.max_retries => return Err(err),
            Err(err) if !should_retry(&err) => {
                debug!("Attempt {} failed: {}. Not retrying", attempt, err);
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                if policy.verbose {
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:.1}s",
                        attempt,
                        err,
                        delay.as_secs_f64()
                    );
                } else {
                    debug!(
                        "Attempt {} failed: {}. Retrying in {:.1}s",
                        attempt,
                        err,
                        delay.as_secs_f64()
                    );
                }
                sleep(delay);
                attempt += 1;
            }
        }
    }
}
