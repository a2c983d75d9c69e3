//! Adaptive batch sizer for the bulk pipeline (C13, spec §4.13): after each
//! flush, grows or shrinks the next batch size geometrically toward a
//! throughput target, clamped by a configurable floor under memory
//! pressure or an explicit throttle signal.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BatchSizerConfig {
    /// Batch size used for the very first flush.
    pub initial_batch_size: u32,
    pub min_batch_size: u32,
    pub max_batch_size: u32,
    /// How long a single flush should ideally take; the sizer nudges the
    /// batch size toward whatever achieves this.
    pub target_batch_duration: Duration,
    /// Memory-pressure signal (0.0-1.0) above which the batch size shrinks
    /// regardless of observed throughput.
    pub memory_pressure_shrink_threshold: f64,
    /// Factor applied when growing or shrinking toward the target.
    pub adjustment_factor: f64,
}

impl Default for BatchSizerConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 5000,
            min_batch_size: 100,
            max_batch_size: 50_000,
            target_batch_duration: Duration::from_secs(1),
            memory_pressure_shrink_threshold: 0.8,
            adjustment_factor: 0.5,
        }
    }
}

/// Outcome of a single flush, fed back into the sizer to compute the next
/// batch size.
#[derive(Debug, Clone, Copy)]
pub struct FlushOutcome {
    pub rows_flushed: u32,
    pub elapsed: Duration,
    /// Memory-pressure load, 0.0-1.0, as reported by the host process.
    pub memory_pressure: f64,
    /// Set when the driver or an interceptor raised a throttle signal for
    /// this flush.
    pub throttled: bool,
}

/// Tracks the current batch size across flushes of one bulk pipeline run.
/// Not shared across pipelines; owned by the single task driving the
/// producer-channel loop.
pub struct AdaptiveBatchSizer {
    config: BatchSizerConfig,
    current: u32,
}

impl AdaptiveBatchSizer {
    pub fn new(config: BatchSizerConfig) -> Self {
        let current = config.initial_batch_size.clamp(config.min_batch_size, config.max_batch_size);
        Self { config, current }
    }

    pub fn current_batch_size(&self) -> u32 {
        self.current
    }

    /// Computes and applies the next batch size from the prior flush's
    /// outcome (spec §4.13: memory pressure and throttle signals override
    /// the throughput-driven adjustment).
    pub fn record_flush(&mut self, outcome: FlushOutcome) -> u32 {
        if outcome.throttled || outcome.memory_pressure > self.config.memory_pressure_shrink_threshold {
            self.current = self.config.min_batch_size;
            return self.current;
        }

        if outcome.elapsed.is_zero() || outcome.rows_flushed == 0 {
            return self.current;
        }

        let throughput = outcome.rows_flushed as f64 / outcome.elapsed.as_secs_f64();
        let target = throughput * self.config.target_batch_duration.as_secs_f64();
        let delta = (target - self.current as f64) * self.config.adjustment_factor;
        let next = (self.current as f64 + delta).round() as i64;
        self.current = next
            .clamp(self.config.min_batch_size as i64, self.config.max_batch_size as i64)
            as u32;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> AdaptiveBatchSizer {
        AdaptiveBatchSizer::new(BatchSizerConfig {
            initial_batch_size: 1000,
            min_batch_size: 100,
            max_batch_size: 10_000,
            target_batch_duration: Duration::from_secs(1),
            memory_pressure_shrink_threshold: 0.8,
            adjustment_factor: 0.5,
        })
    }

    #[test]
    fn starts_at_the_configured_initial_size() {
        assert_eq!(sizer().current_batch_size(), 1000);
    }

    #[test]
    fn memory_pressure_above_threshold_shrinks_to_floor() {
        let mut sizer = sizer();
        let next = sizer.record_flush(FlushOutcome {
            rows_flushed: 1000,
            elapsed: Duration::from_millis(500),
            memory_pressure: 0.9,
            throttled: false,
        });
        assert_eq!(next, 100);
    }

    #[test]
    fn throttle_signal_clamps_to_floor_even_with_healthy_throughput() {
        let mut sizer = sizer();
        let next = sizer.record_flush(FlushOutcome {
            rows_flushed: 1000,
            elapsed: Duration::from_millis(500),
            memory_pressure: 0.1,
            throttled: true,
        });
        assert_eq!(next, 100);
    }

    #[test]
    fn fast_flush_grows_batch_size_toward_target() {
        let mut sizer = sizer();
        // 1000 rows in 200ms => 5000 rows/sec throughput, target = 5000 for a 1s batch.
        let next = sizer.record_flush(FlushOutcome {
            rows_flushed: 1000,
            elapsed: Duration::from_millis(200),
            memory_pressure: 0.1,
            throttled: false,
        });
        assert!(next > 1000, "expected growth toward throughput target, got {next}");
    }

    #[test]
    fn slow_flush_shrinks_batch_size_toward_target() {
        let mut sizer = sizer();
        // 1000 rows in 4s => 250 rows/sec throughput, target = 250 for a 1s batch.
        let next = sizer.record_flush(FlushOutcome {
            rows_flushed: 1000,
            elapsed: Duration::from_secs(4),
            memory_pressure: 0.1,
            throttled: false,
        });
        assert!(next < 1000, "expected shrink toward throughput target, got {next}");
    }

    #[test]
    fn never_exceeds_configured_bounds() {
        let mut sizer = AdaptiveBatchSizer::new(BatchSizerConfig {
            initial_batch_size: 9900,
            min_batch_size: 100,
            max_batch_size: 10_000,
            target_batch_duration: Duration::from_secs(1),
            memory_pressure_shrink_threshold: 0.8,
            adjustment_factor: 1.0,
        });
        let next = sizer.record_flush(FlushOutcome {
            rows_flushed: 100_000,
            elapsed: Duration::from_millis(1),
            memory_pressure: 0.1,
            throttled: false,
        });
        assert_eq!(next, 10_000);
    }

    #[test]
    fn zero_row_flush_leaves_batch_size_unchanged() {
        let mut sizer = sizer();
        let next = sizer.record_flush(FlushOutcome {
            rows_flushed: 0,
            elapsed: Duration::from_millis(500),
            memory_pressure: 0.1,
            throttled: false,
        });
        assert_eq!(next, 1000);
    }
}
