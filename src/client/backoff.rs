//! Reconnection backoff: exponential growth from a base delay to a cap,
//! with uniform jitter to keep a fleet of clients from retrying in
//! lockstep, and a hard attempt budget.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    /// Fraction of the deterministic delay added as random jitter, in
    /// `[0.0, 1.0]`. At most the delay doubles, which keeps consecutive
    /// delays non-decreasing while the exponential part is still growing.
    pub jitter: f64,
}

pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    rng: SmallRng,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_rng(config, SmallRng::from_entropy())
    }

    /// Deterministic variant for tests.
    pub fn with_rng(config: BackoffConfig, rng: SmallRng) -> Self {
        Self {
            config,
            attempt: 0,
            rng,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let exp = self
            .config
            .base
            .saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .min(self.config.cap);
        self.attempt += 1;

        let jitter_range = exp.as_secs_f64() * self.config.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            Duration::from_secs_f64(self.rng.gen_range(0.0..jitter_range))
        } else {
            Duration::ZERO
        };
        Some(exp + jitter)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Called after one successful reconnect; the next failure starts from
    /// the base delay again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: f64, max_attempts: u32) -> Backoff {
        Backoff::with_rng(
            BackoffConfig {
                base: Duration::from_millis(100),
                cap: Duration::from_secs(5),
                max_attempts,
                jitter,
            },
            SmallRng::seed_from_u64(42),
        )
    }

    #[test]
    fn delays_are_monotonically_non_decreasing_up_to_cap() {
        let mut b = backoff(0.0, 10);
        let mut previous = Duration::ZERO;
        while let Some(delay) = b.next_delay() {
            assert!(delay >= previous, "{delay:?} < {previous:?}");
            assert!(delay <= Duration::from_secs(5));
            previous = delay;
        }
        assert_eq!(b.attempts(), 10);
    }

    #[test]
    fn jittered_delays_stay_monotonic_while_growing() {
        // With jitter <= 1.0 the next exponential step dominates the
        // previous step's jitter.
        let mut b = backoff(1.0, 6);
        let mut previous = Duration::ZERO;
        for _ in 0..6 {
            let delay = b.next_delay().unwrap();
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn budget_exhaustion_yields_none() {
        let mut b = backoff(0.0, 2);
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_none());
        assert!(b.next_delay().is_none());
    }

    #[test]
    fn reset_returns_to_base() {
        let mut b = backoff(0.0, 5);
        let first = b.next_delay().unwrap();
        b.next_delay().unwrap();
        b.next_delay().unwrap();
        b.reset();
        assert_eq!(b.attempts(), 0);
        assert_eq!(b.next_delay().unwrap(), first);
    }

    #[test]
    fn jitter_bounded_by_configured_fraction() {
        let mut b = backoff(0.25, 1);
        let delay = b.next_delay().unwrap();
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }
}
