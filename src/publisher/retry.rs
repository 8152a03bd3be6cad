//! Pure retry decisions for failed publish attempts
//!
//! Nothing here sleeps or performs I/O. The publisher feeds in the status of
//! the attempt that just failed together with the attempt number and elapsed
//! time, and acts on the returned [`RetryDecision`].

use super::PublishStatus;
use crate::config::RetrySection;
use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Budget measured from the start of the first attempt
    pub max_elapsed: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Fraction of each delay that is randomised, 0.0 to 1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySection::default())
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            max_elapsed: Duration::from_millis(section.max_elapsed_ms),
            initial_backoff: Duration::from_millis(section.initial_backoff_ms),
            max_backoff: Duration::from_millis(section.max_backoff_ms),
            multiplier: section.multiplier.max(1.0),
            jitter: section.jitter.clamp(0.0, 1.0),
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt`
    Retry { attempt: u32, delay: Duration },
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The failure cannot be fixed by trying again
    NonTransient,
    MaxAttempts,
    /// The next attempt could not start inside the elapsed-time budget
    DeadlineExceeded,
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Backoff without randomisation, useful where timings must be exact
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Whether another attempt is allowed after `attempt` attempts ended in
    /// `status`, `elapsed` after the first one started
    pub fn should_retry(&self, status: PublishStatus, attempt: u32, elapsed: Duration) -> bool {
        status.is_transient() && attempt < self.max_attempts && elapsed < self.max_elapsed
    }

    /// Un-jittered delay before the attempt following `attempt`
    ///
    /// `initial * multiplier^(attempt - 1)`, capped at `max_backoff`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap = self.max_backoff.as_millis() as f64;

        if !millis.is_finite() || millis >= cap {
            self.max_backoff
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Jittered delay in `(base * (1 - jitter), base]`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let spread: f64 = rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_millis((base.as_millis() as f64 * (1.0 - spread)) as u64)
    }

    /// Decide between another attempt and giving up
    pub fn decide(&self, status: PublishStatus, attempt: u32, elapsed: Duration) -> RetryDecision {
        if !status.is_transient() {
            return RetryDecision::GiveUp(GiveUpReason::NonTransient);
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::MaxAttempts);
        }
        if elapsed >= self.max_elapsed {
            return RetryDecision::GiveUp(GiveUpReason::DeadlineExceeded);
        }

        let delay = self.backoff_delay(attempt);
        if elapsed + delay >= self.max_elapsed {
            return RetryDecision::GiveUp(GiveUpReason::DeadlineExceeded);
        }

        RetryDecision::Retry {
            attempt: attempt + 1,
            delay,
        }
    }
}
