//! Exponential backoff policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;

/// Doubling delay from `base`, clamped at `cap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay before the first retry.
    #[serde(with = "duration_ms", rename = "base_ms")]
    pub base: Duration,
    /// Upper bound for any delay.
    #[serde(with = "duration_ms", rename = "cap_ms")]
    pub cap: Duration,
    /// Add up to 25% random jitter.
    pub jitter: bool,
}

impl Backoff {
    /// A jitter-free policy.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: false,
        }
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0 = first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(20);
        let delay = self.base.saturating_mul(factor).min(self.cap);

        if self.jitter && !delay.is_zero() {
            let extra = delay.mul_f64(0.25 * rand::thread_rng().gen::<f64>());
            (delay + extra).min(self.cap)
        } else {
            delay
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(b.delay_for(0), Duration::from_millis(100));
        assert_eq!(b.delay_for(1), Duration::from_millis(200));
        assert_eq!(b.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn respects_cap() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(b.delay_for(10), Duration::from_secs(5));
        assert_eq!(b.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let b = Backoff::new(Duration::from_millis(400), Duration::from_secs(60)).with_jitter(true);
        for _ in 0..50 {
            let d = b.delay_for(0);
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(500));
        }
    }
}
