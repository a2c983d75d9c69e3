//! Retry backoff calculator (C10, spec §4.10): constant, linear or
//! exponential growth, capped and optionally jittered.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    mode: BackoffMode,
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl BackoffStrategy {
    pub fn new(mode: BackoffMode, base: Duration, cap: Duration) -> Self {
        Self {
            mode,
            base,
            cap: cap.max(base),
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying the `attempt`-th time (0-based: `attempt == 0`
    /// is the first retry, after the initial try failed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.cap.as_millis() as f64;

        let raw_ms = match self.mode {
            BackoffMode::Constant => base_ms,
            BackoffMode::Linear => base_ms * (attempt as f64 + 1.0),
            BackoffMode::Exponential => base_ms * 2f64.powi(attempt as i32),
        };
        let capped_ms = raw_ms.min(cap_ms);

        let final_ms = if self.jitter {
            // Full jitter: uniform in [0, capped].
            rand::thread_rng().gen_range(0.0..=capped_ms)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms as u64)
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::new(BackoffMode::Exponential, Duration::from_millis(100), Duration::from_secs(30)).with_jitter(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_mode_returns_the_same_delay_every_attempt() {
        let strategy = BackoffStrategy::new(BackoffMode::Constant, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(strategy.calculate_delay(5), Duration::from_millis(10));
    }

    #[test]
    fn linear_mode_grows_by_a_fixed_increment() {
        let strategy = BackoffStrategy::new(BackoffMode::Linear, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(10));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(20));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(30));
    }

    #[test]
    fn exponential_mode_doubles_and_respects_the_cap() {
        let strategy = BackoffStrategy::new(BackoffMode::Exponential, Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(300), "must cap, not keep doubling to 400");
    }

    #[test]
    fn jitter_never_exceeds_the_uncapped_delay() {
        let strategy = BackoffStrategy::new(BackoffMode::Exponential, Duration::from_millis(100), Duration::from_secs(1)).with_jitter(true);
        for attempt in 0..5 {
            let delay = strategy.calculate_delay(attempt);
            assert!(delay <= Duration::from_secs(1));
        }
    }
}
