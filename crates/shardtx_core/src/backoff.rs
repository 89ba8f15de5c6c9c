//! Retry delays.

use crate::config::TransacterOptions;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;

/// Exponential backoff with additive jitter.
///
/// Each call to [`next_retry`](Self::next_retry) doubles the base delay,
/// clamps it to `[base_delay, max_delay]` and adds a uniformly random jitter
/// in `[0, jitter]`. A zero result means "retry immediately".
pub struct ExponentialBackoff<R = StdRng> {
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
    consecutive_retries: u32,
    rng: R,
}

impl ExponentialBackoff<StdRng> {
    /// Creates a backoff seeded from system entropy.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: Duration) -> Self {
        Self::with_rng(base_delay, max_delay, jitter, StdRng::from_entropy())
    }

    /// Creates a backoff for the retry bounds of `options`.
    #[must_use]
    pub fn from_options(options: &TransacterOptions) -> Self {
        Self::new(
            options.min_retry_delay,
            options.max_retry_delay,
            options.retry_jitter,
        )
    }
}

impl<R: Rng> ExponentialBackoff<R> {
    /// Creates a backoff drawing jitter from `rng`.
    pub fn with_rng(base_delay: Duration, max_delay: Duration, jitter: Duration, rng: R) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter,
            consecutive_retries: 0,
            rng,
        }
    }

    /// Returns the delay before the next retry.
    pub fn next_retry(&mut self) -> Duration {
        self.consecutive_retries = self.consecutive_retries.saturating_add(1);
        self.backoff_delay() + self.jitter_delay()
    }

    /// Forgets previous retries.
    pub fn reset(&mut self) {
        self.consecutive_retries = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub fn consecutive_retries(&self) -> u32 {
        self.consecutive_retries
    }

    fn backoff_delay(&self) -> Duration {
        let exponent = self.consecutive_retries.saturating_sub(1).min(31);
        let grown = self.base_delay.saturating_mul(1u32 << exponent);
        grown.min(self.max_delay).max(self.base_delay.min(self.max_delay))
    }

    fn jitter_delay(&mut self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let bound = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(self.rng.gen_range(0..=bound))
    }
}

impl<R> fmt::Debug for ExponentialBackoff<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialBackoff")
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("consecutive_retries", &self.consecutive_retries)
            .finish_non_exhaustive()
    }
}

/// Blocks the calling thread between attempts.
pub trait Sleeper: Send + Sync {
    /// Sleeps for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
