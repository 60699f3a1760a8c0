//! Exponential backoff with jitter for transport retries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial backoff duration (milliseconds)
    pub floor_ms: u64,
    /// Maximum backoff duration (milliseconds)
    pub ceiling_ms: u64,
    /// Jitter fraction (0.0-1.0)
    pub jitter: f64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor_ms: 250,
            ceiling_ms: 4_000,
            jitter: 0.25,
            multiplier: 2.0,
        }
    }
}

/// Backoff state for one call's retry sequence
#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Next delay: exponential growth capped at the ceiling, with ± jitter.
    pub fn next_backoff(&mut self) -> Duration {
        self.attempt += 1;

        let base_ms = (self.config.floor_ms as f64
            * self.config.multiplier.powi(self.attempt as i32 - 1))
        .min(self.config.ceiling_ms as f64);

        let jitter_range = base_ms * self.config.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let duration_ms = (base_ms + jitter)
            .max(self.config.floor_ms as f64)
            .min(self.config.ceiling_ms as f64);

        Duration::from_millis(duration_ms as u64)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_without_jitter() {
        let mut backoff = BackoffState::new(BackoffConfig {
            floor_ms: 100,
            ceiling_ms: 1_000,
            jitter: 0.0,
            multiplier: 2.0,
        });

        assert_eq!(backoff.next_backoff().as_millis(), 100);
        assert_eq!(backoff.next_backoff().as_millis(), 200);
        assert_eq!(backoff.next_backoff().as_millis(), 400);
        assert_eq!(backoff.next_backoff().as_millis(), 800);
        // Capped at the ceiling.
        assert_eq!(backoff.next_backoff().as_millis(), 1_000);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = BackoffConfig {
            floor_ms: 1_000,
            ceiling_ms: 10_000,
            jitter: 0.25,
            multiplier: 2.0,
        };
        let mut backoff = BackoffState::new(config.clone());

        for _ in 0..10 {
            let ms = backoff.next_backoff().as_millis() as u64;
            assert!(ms >= config.floor_ms);
            assert!(ms <= config.ceiling_ms);
        }
    }
}
