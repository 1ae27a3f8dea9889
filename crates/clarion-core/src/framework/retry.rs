//! Retry policy and backoff computation.

use std::time::Duration;

use rand::Rng;

/// Upper bound for the `attempts=` override.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Shape of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay after every failure.
    Fixed(Duration),
    /// `base * 2^n`, capped at `max`, with optional jitter of up to `base / 2`.
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

/// How many times a delivery is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    /// Delay shape.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// `max_attempts` attempts separated by `delay`.
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// `max_attempts` attempts with jittered exponential backoff.
    pub const fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base,
                max,
                jitter: true,
            },
        }
    }

    /// Returns a copy with `max_attempts` replaced.
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Attempts actually made, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max, jitter } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
                let capped = base.checked_mul(multiplier).unwrap_or(max).min(max);

                if !jitter {
                    return capped;
                }

                let jitter_range_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX) / 2;
                let remaining_ms =
                    u64::try_from(max.saturating_sub(capped).as_millis()).unwrap_or(0);
                let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
                if jitter_limit_ms == 0 {
                    return capped;
                }

                let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
                (capped + Duration::from_millis(jitter_ms)).min(max)
            }
        }
    }

    /// Delay before the next attempt, honoring a server-provided hint.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.delay_for(attempt);
        match retry_after {
            Some(hint) => delay.max(hint),
            None => delay,
        }
    }
}
