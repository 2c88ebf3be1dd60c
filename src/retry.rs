//! Bounded retries with linear backoff.

use std::thread;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::{Error, ErrorClass, Result};

/// Retry policy for calls to external collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before retry `n` is `n * base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy described by the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_retries, config.base_delay())
    }

    /// A policy that tries once.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// A value rejected by `is_success` counts as a transient
    /// [`Error::Rejected`]. On exhaustion the last error is returned as is.
    pub fn execute<T, F, C, P>(&self, mut op: F, classify: C, is_success: P) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        C: Fn(&Error) -> ErrorClass,
        P: Fn(&T) -> bool,
    {
        let attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op() {
                Ok(value) if is_success(&value) => return Ok(value),
                Ok(_) => {
                    Error::Rejected(format!("attempt {} returned an unusable result", attempt))
                }
                Err(e) => e,
            };

            let class = if matches!(error, Error::Rejected(_)) {
                ErrorClass::Transient
            } else {
                classify(&error)
            };
            if class == ErrorClass::Fatal || attempt >= attempts {
                return Err(error);
            }

            let delay = self.delay_for(attempt);
            log::warn!(
                "Attempt {}/{} failed ({}); retrying in {:.1}s",
                attempt,
                attempts,
                error,
                delay.as_secs_f64()
            );
            thread::sleep(delay);
        }
    }

    /// [`execute`](Self::execute) with [`Error::class`] and no result check.
    pub fn execute_default<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.execute(op, Error::class, |_| true)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
