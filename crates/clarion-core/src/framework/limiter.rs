//! Per-service token bucket rate limiting.
//!
//! Each configured service owns one [`TokenBucket`] sized from its
//! [`RateLimit`]: `capacity` tokens, refilled continuously at
//! `capacity / per`. A dispatch takes one token before it may send.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::foundation::error::ParseError;

/// `capacity` sends per `per` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Burst size and number of tokens refilled per interval. At least 1.
    pub capacity: u32,
    /// Refill interval. Non-zero.
    pub per: Duration,
}

impl RateLimit {
    /// Creates a limit, clamping `capacity` to at least 1 and `per` to at
    /// least one millisecond.
    pub const fn new(capacity: u32, per: Duration) -> Self {
        let capacity = if capacity == 0 { 1 } else { capacity };
        let per = if per.is_zero() {
            Duration::from_millis(1)
        } else {
            per
        };
        Self { capacity, per }
    }

    /// `capacity` sends per second.
    pub const fn per_second(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(1))
    }

    /// `capacity` sends per minute.
    pub const fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    fn tokens_per_sec(&self) -> f64 {
        f64::from(self.capacity) / self.per.as_secs_f64()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.capacity, self.per.as_secs_f64())
    }
}

/// Parses `N/seconds`, e.g. `5/60` for five sends a minute.
impl FromStr for RateLimit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidOption {
            key: "limit".into(),
            value: s.to_owned(),
        };
        let (count, secs) = s.split_once('/').ok_or_else(invalid)?;
        let capacity: u32 = count.trim().parse().map_err(|_| invalid())?;
        let secs: f64 = secs.trim().parse().map_err(|_| invalid())?;
        if capacity == 0 || !secs.is_finite() || secs <= 0.0 {
            return Err(invalid());
        }
        let per = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
        Ok(Self::new(capacity, per))
    }
}

/// Why [`TokenBucket::acquire`] gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// No token became available within the wait bound.
    TimedOut,
    /// The cancellation token fired while waiting.
    Cancelled,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket guarded by its own mutex.
///
/// The lock is only held for the arithmetic, never across a wait.
#[derive(Debug)]
pub struct TokenBucket {
    limit: RateLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(BucketState {
                tokens: f64::from(limit.capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// The limit this bucket enforces.
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Tokens currently available, after refilling.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let refill = elapsed.as_secs_f64() * self.limit.tokens_per_sec();
        state.tokens = (state.tokens + refill).min(f64::from(self.limit.capacity));
        state.last_refill = now;
    }

    /// Takes one token if available, otherwise returns how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - state.tokens;
        let wait = missing / self.limit.tokens_per_sec();
        Err(Duration::from_secs_f64(wait).max(Duration::from_millis(1)))
    }

    /// Waits up to `max_wait` for a token.
    ///
    /// Returns immediately with [`AcquireError::TimedOut`] when the next token
    /// cannot arrive within the bound, so a zero bound never sleeps.
    pub async fn acquire(
        &self,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), AcquireError> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            if started.elapsed() + wait > max_wait {
                return Err(AcquireError::TimedOut);
            }
            trace!(wait_ms = wait.as_millis() as u64, "waiting for rate limit token");
            tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        let limit: RateLimit = "5/60".parse().unwrap();
        assert_eq!(limit, RateLimit::per_minute(5));
        assert_eq!("2/0.5".parse::<RateLimit>().unwrap().per, Duration::from_millis(500));
        for bad in ["0/1", "5", "5/0", "x/1", "5/-1", "5/nan"] {
            assert!(bad.parse::<RateLimit>().is_err(), "{bad}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_drains_and_refills() {
        let bucket = TokenBucket::new(RateLimit::per_second(2));
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_millis(500));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!((bucket.available() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_fails_fast() {
        let bucket = TokenBucket::new(RateLimit::per_minute(1));
        let cancel = CancellationToken::new();
        assert!(bucket.acquire(Duration::ZERO, &cancel).await.is_ok());
        assert_eq!(
            bucket.acquire(Duration::ZERO, &cancel).await,
            Err(AcquireError::TimedOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_within_bound() {
        let bucket = TokenBucket::new(RateLimit::per_second(1));
        let cancel = CancellationToken::new();
        bucket.try_acquire().unwrap();

        let start = Instant::now();
        assert!(bucket.acquire(Duration::from_secs(2), &cancel).await.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancelled() {
        let bucket = TokenBucket::new(RateLimit::per_minute(1));
        let cancel = CancellationToken::new();
        bucket.try_acquire().unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        assert_eq!(
            bucket.acquire(Duration::from_secs(120), &cancel).await,
            Err(AcquireError::Cancelled)
        );
    }
}
