//! Reconnect delay policy: capped exponential backoff with deterministic jitter

use std::hash::{Hash, Hasher};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
        }
    }

    /// Un-jittered delay for a 1-based attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base
            .checked_mul(exp)
            .unwrap_or(self.ceiling)
            .min(self.ceiling)
    }

    /// Delay before reconnect attempt `attempt`, jittered per channel and never above the ceiling
    pub fn delay(&self, key: &str, attempt: u32) -> Duration {
        self.base_delay(attempt)
            .mul_f64(jitter_multiplier(key, attempt))
            .min(self.ceiling)
    }
}

/// Spread in [0.8, 1.2] so channels that dropped together do not reconnect in lockstep
fn jitter_multiplier(key: &str, attempt: u32) -> f64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let hash = hasher.finish();
    let bucket = (hash % 401) as f64;
    0.8 + (bucket / 1000.0)
}
