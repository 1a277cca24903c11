//! Bounded exponential backoff for reconnect attempts.
//!
//! Early attempts grow exponentially (`base + 2^n + jitter`). Once the
//! exponential phase would overshoot half the configured range, delays grow
//! linearly in fixed steps until they reach the cap. Jitter never exceeds
//! the gap to the next attempt's lower bound, so delays are non-decreasing
//! in the attempt count even though they are randomized.

use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BackoffConfig;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_ms: u64,
    cap_ms: u64,
    max_attempts: u32,
    exp_threshold: u32,
    step_ms: u64,
    linear_base_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, cap_ms: u64, max_attempts: u32) -> Self {
        let half_range = cap_ms.saturating_sub(base_ms) / 2;
        let mut exp_threshold: u32 = 1;
        while exp_threshold < 62 && (1u64 << (exp_threshold + 1)) < half_range {
            exp_threshold += 1;
        }

        if base_ms > cap_ms {
            warn!(
                base_ms = base_ms,
                cap_ms = cap_ms,
                "Misconfigured backoff: base delay is greater than the cap"
            );
        }

        let step_ms = if max_attempts > exp_threshold {
            let span = cap_ms.saturating_sub(1u64 << exp_threshold);
            (span / u64::from(max_attempts - exp_threshold)).max(1)
        } else {
            1
        };
        let linear_base_ms = base_ms + 2 * (1u64 << exp_threshold);

        debug!(
            base_ms = base_ms,
            cap_ms = cap_ms,
            max_attempts = max_attempts,
            exp_threshold = exp_threshold,
            step_ms = step_ms,
            "Backoff policy configured"
        );

        Self {
            base_ms,
            cap_ms,
            max_attempts,
            exp_threshold,
            step_ms,
            linear_base_ms,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base_ms, config.cap_ms, config.max_attempts)
    }

    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }

    fn delay_ms(&self, attempt: u32) -> u64 {
        if attempt >= self.max_attempts {
            return self.cap_ms;
        }

        let mut rng = rand::thread_rng();
        let ms = if attempt < self.exp_threshold {
            let exp = 1u64 << attempt;
            self.base_ms + exp + rng.gen_range(0..exp)
        } else {
            let steps = u64::from(attempt - self.exp_threshold);
            self.linear_base_ms + self.step_ms * steps + rng.gen_range(0..self.step_ms)
        };
        ms.min(self.cap_ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
