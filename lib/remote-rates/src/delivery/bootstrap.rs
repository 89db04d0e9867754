use std::time::{Duration, Instant};

use snafu::ResultExt as _;

use crate::config::BootstrapConfiguration;
use crate::errors::{Attempt, Backoff, BootstrapError, GenericError};

/// Retry state for bringing up a fallible dependency.
///
/// Each failed attempt pushes the next allowed attempt further out: the first retry waits for the initial delay, and
/// every further failure doubles the delay up to the maximum. A successful attempt resets the backoff, and once ready,
/// no further attempts are made.
#[derive(Clone, Debug)]
pub struct Bootstrap {
    initial_delay: Duration,
    max_delay: Duration,
    retry_delay: Duration,
    last_failure: Option<Instant>,
    failures: u32,
    ready: bool,
}

impl Bootstrap {
    /// Creates a new `Bootstrap` with the given retry delays.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(initial_delay);
        Self {
            initial_delay,
            max_delay,
            retry_delay: initial_delay,
            last_failure: None,
            failures: 0,
            ready: false,
        }
    }

    /// Creates a new `Bootstrap` from the given configuration.
    pub fn from_configuration(config: &BootstrapConfiguration) -> Self {
        Self::new(config.initial_retry_delay(), config.max_retry_delay())
    }

    /// Returns `true` if an attempt has succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns the number of consecutive failed attempts.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns the delay enforced after the most recent failure.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Checks whether an attempt is allowed at `now`.
    ///
    /// # Errors
    ///
    /// If the backoff interval since the last failure has not elapsed, an error is returned with the remaining time.
    pub fn check(&self, now: Instant) -> Result<(), BootstrapError> {
        if self.ready {
            return Ok(());
        }

        match self.last_failure {
            Some(last_failure) => {
                let elapsed = now.saturating_duration_since(last_failure);
                if elapsed < self.retry_delay {
                    Backoff {
                        retry_in: self.retry_delay - elapsed,
                    }
                    .fail()
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    /// Records the outcome of an attempt made at `now`.
    ///
    /// # Errors
    ///
    /// If the attempt failed, the failure is recorded and returned.
    pub fn record(&mut self, now: Instant, outcome: Result<(), GenericError>) -> Result<(), BootstrapError> {
        match outcome {
            Ok(()) => {
                self.ready = true;
                self.failures = 0;
                self.retry_delay = self.initial_delay;
                self.last_failure = None;
                Ok(())
            }
            Err(source) => {
                if self.failures > 0 {
                    self.retry_delay = self.retry_delay.saturating_mul(2).min(self.max_delay);
                }
                self.failures = self.failures.saturating_add(1);
                self.last_failure = Some(now);
                Err::<(), _>(source).context(Attempt {
                    attempts: self.failures,
                })
            }
        }
    }

    /// Runs `attempt` if not ready yet and the backoff interval allows it.
    ///
    /// # Errors
    ///
    /// If the backoff interval has not elapsed, `attempt` is not run and an error is returned. If `attempt` fails, the
    /// failure is recorded and returned.
    pub fn ensure_ready<F>(&mut self, now: Instant, attempt: F) -> Result<(), BootstrapError>
    where
        F: FnOnce() -> Result<(), GenericError>,
    {
        if self.ready {
            return Ok(());
        }

        self.check(now)?;
        self.record(now, attempt())
    }
}
