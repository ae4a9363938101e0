//! Retry policy for failed delivery attempts.
//!
//! After a failed attempt the outbox row either goes back to PENDING with a new
//! `next_attempt_at`, or, once its attempts reach `max_attempts`, to FAILED.

use std::time::Duration;

use chrono::{DateTime, Utc};

use herald_common::config::AppConfig;
use herald_common::error::AppError;

/// Default ceiling on delivery attempts per outbox row.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Default delay between attempts (1 minute).
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Parse the `RETRY_BACKOFF` setting.
    pub fn from_name(name: &str, base: Duration, max: Duration) -> Result<Self, AppError> {
        match name.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed(base)),
            "exponential" => Ok(Backoff::Exponential { base, max }),
            other => Err(AppError::Config(format!(
                "RETRY_BACKOFF must be 'fixed' or 'exponential', got '{}'",
                other
            ))),
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: i32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = (attempt.max(1) - 1).min(31) as u32;
                base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
            }
        }
    }
}

/// What a failed attempt does to an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to PENDING, eligible again at `next_attempt_at`.
    Retry {
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Attempts exhausted; the row becomes FAILED.
    Exhausted { attempts: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Stamped on new outbox rows as their `max_attempts`.
    pub max_attempts: i32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed(DEFAULT_BACKOFF),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        if config.outbox_max_attempts < 1 {
            return Err(AppError::Config(
                "OUTBOX_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            max_attempts: config.outbox_max_attempts,
            backoff: Backoff::from_name(
                &config.retry_backoff,
                Duration::from_secs(config.retry_backoff_secs),
                Duration::from_secs(config.retry_backoff_max_secs),
            )?,
        })
    }

    /// Decide the transition for a row that has failed `attempts_so_far` times
    /// before this failure and allows `max_attempts` in total.
    pub fn on_failure(
        &self,
        attempts_so_far: i32,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> FailureTransition {
        let attempts = attempts_so_far.saturating_add(1);
        if attempts >= max_attempts {
            return FailureTransition::Exhausted { attempts };
        }

        let delay = chrono::Duration::from_std(self.backoff.delay(attempts))
            .unwrap_or(chrono::Duration::MAX);
        let next_attempt_at = now
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        FailureTransition::Retry {
            attempts,
            next_attempt_at,
        }
    }
}
