//! Circuit breaker (C10, spec §4.10): failure-ratio over a sliding window
//! of recent outcomes, fast-failing once the ratio is breached.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// How far back outcomes are considered.
    pub window: Duration,
    /// Fraction of failures in the window that trips the breaker.
    pub failure_ratio_threshold: f64,
    /// Minimum number of samples in the window before the ratio is judged;
    /// below this the breaker stays closed regardless of ratio.
    pub minimum_throughput: usize,
    /// How long the breaker stays open before allowing a probe attempt.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            failure_ratio_threshold: 0.5,
            minimum_throughput: 10,
            open_duration: Duration::from_secs(15),
        }
    }
}

struct Outcome {
    at: Instant,
    success: bool,
}

enum State {
    Closed,
    Open { since: Instant },
}

/// Tracks recent call outcomes per pipeline and decides whether to
/// fast-fail. One instance is shared process-wide (spec §4.10: "the
/// pipeline is global... so the circuit-breaker counts across calls").
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    outcomes: Mutex<VecDeque<Outcome>>,
    state: Mutex<State>,
    last_sql_error_number: Mutex<Option<i32>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            outcomes: Mutex::new(VecDeque::new()),
            state: Mutex::new(State::Closed),
            last_sql_error_number: Mutex::new(None),
        }
    }

    /// `true` if the breaker is currently fast-failing calls.
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock();
        if let State::Open { since } = *state {
            if since.elapsed() >= self.config.open_duration {
                *state = State::Closed;
                return false;
            }
            return true;
        }
        false
    }

    pub fn last_sql_error_number(&self) -> Option<i32> {
        *self.last_sql_error_number.lock()
    }

    pub fn record_success(&self) {
        self.record(true, None);
    }

    pub fn record_failure(&self, sql_error_number: Option<i32>) {
        *self.last_sql_error_number.lock() = sql_error_number;
        self.record(false, sql_error_number);
    }

    fn record(&self, success: bool, _sql_error_number: Option<i32>) {
        let now = Instant::now();
        let mut outcomes = self.outcomes.lock();
        outcomes.push_back(Outcome { at: now, success });
        while let Some(front) = outcomes.front() {
            if now.duration_since(front.at) > self.config.window {
                outcomes.pop_front();
            } else {
                break;
            }
        }

        if outcomes.len() < self.config.minimum_throughput {
            return;
        }
        let failures = outcomes.iter().filter(|o| !o.success).count();
        let ratio = failures as f64 / outcomes.len() as f64;
        if ratio >= self.config.failure_ratio_threshold {
            *self.state.lock() = State::Open { since: now };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window: Duration::from_secs(60),
            failure_ratio_threshold: 0.5,
            minimum_throughput: 4,
            open_duration: Duration::from_millis(50),
        }
    }

    #[test]
    fn stays_closed_below_minimum_throughput() {
        let breaker = CircuitBreaker::new(config());
        breaker.record_failure(Some(1205));
        breaker.record_failure(Some(1205));
        assert!(!breaker.is_open());
    }

    #[test]
    fn opens_once_the_failure_ratio_is_breached() {
        let breaker = CircuitBreaker::new(config());
        breaker.record_failure(Some(1205));
        breaker.record_failure(Some(1205));
        breaker.record_success();
        breaker.record_failure(Some(1205));
        assert!(breaker.is_open());
        assert_eq!(breaker.last_sql_error_number(), Some(1205));
    }

    #[test]
    fn stays_closed_when_most_calls_succeed() {
        let breaker = CircuitBreaker::new(config());
        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure(Some(1205));
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn half_opens_after_the_open_duration_elapses() {
        let breaker = CircuitBreaker::new(config());
        breaker.record_failure(Some(1205));
        breaker.record_failure(Some(1205));
        breaker.record_failure(Some(1205));
        breaker.record_failure(Some(1205));
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!breaker.is_open());
    }
}
