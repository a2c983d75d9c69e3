//! Resilience pipeline (C10, spec §4.10): **Retry → CircuitBreaker →
//! Timeout → UserOperation**, composed outermost-first. One instance is
//! shared process-wide so the breaker counts failures across calls.

use crate::backoff::BackoffStrategy;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::classifier::{DefaultClassifier, TransientClassifier};
use sqlrt_core::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ResiliencePipelineConfig {
    pub backoff: BackoffStrategy,
    pub max_attempts: u32,
    /// Elevate `SET DEADLOCK_PRIORITY HIGH` before the retry that follows
    /// a 1205, provided the connection is still open/opening.
    pub deadlock_priority_elevation: bool,
    pub circuit_breaker: CircuitBreakerConfig,
    pub default_command_timeout: Duration,
}

impl Default for ResiliencePipelineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffStrategy::default(),
            max_attempts: 3,
            deadlock_priority_elevation: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            default_command_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-attempt information handed to the operation closure so it can
/// react to a requested deadlock-priority elevation without the pipeline
/// needing to know anything about connections.
#[derive(Debug, Clone, Copy)]
pub struct AttemptInfo {
    pub attempt: u32,
    pub elevate_deadlock_priority: bool,
}

pub struct ResiliencePipeline {
    config: ResiliencePipelineConfig,
    breaker: CircuitBreaker,
    classifier: Arc<dyn TransientClassifier>,
}

impl ResiliencePipeline {
    pub fn new(config: ResiliencePipelineConfig) -> Self {
        Self::with_classifier(config, Arc::new(DefaultClassifier))
    }

    pub fn with_classifier(config: ResiliencePipelineConfig, classifier: Arc<dyn TransientClassifier>) -> Self {
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        Self { config, breaker, classifier }
    }

    /// Runs `operation` under the full pipeline. `command_timeout`
    /// overrides the configured default per spec §4.10.
    pub async fn execute<F, Fut, T>(
        &self,
        cancellation: &CancellationToken,
        command_timeout: Option<Duration>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(AttemptInfo) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = command_timeout.unwrap_or(self.config.default_command_timeout);
        let mut elevate_next = false;

        for attempt in 0..self.config.max_attempts.max(1) {
            if cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.breaker.is_open() {
                return Err(Error::CircuitOpen {
                    last_sql_error_number: self.breaker.last_sql_error_number(),
                });
            }

            let info = AttemptInfo {
                attempt,
                elevate_deadlock_priority: elevate_next,
            };
            elevate_next = false;

            let attempt_result = tokio::select! {
                biased;
                _ = cancellation.cancelled() => Err(Error::Cancelled),
                result = tokio::time::timeout(timeout, operation(info)) => match result {
                    Ok(inner) => inner,
                    Err(_elapsed) => Err(Error::Transient {
                        message: "command timed out".to_string(),
                        sql_error_number: Some(-2),
                    }),
                },
            };

            match attempt_result {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => {
                    self.breaker.record_failure(error.sql_error_number());
                    let is_last_attempt = attempt + 1 >= self.config.max_attempts;
                    if is_last_attempt || !self.classifier.is_transient(&error) {
                        return Err(error);
                    }

                    if self.config.deadlock_priority_elevation && self.classifier.is_deadlock(&error) {
                        elevate_next = true;
                    }

                    tracing::debug!(attempt, error = %error, "resilience pipeline retrying after transient failure");
                    tokio::time::sleep(self.config.backoff.calculate_delay(attempt)).await;
                }
            }
        }

        unreachable!("loop always returns on its last iteration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffMode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> ResiliencePipelineConfig {
        ResiliencePipelineConfig {
            backoff: BackoffStrategy::new(BackoffMode::Constant, Duration::from_millis(1), Duration::from_millis(5)),
            max_attempts,
            deadlock_priority_elevation: true,
            circuit_breaker: CircuitBreakerConfig {
                minimum_throughput: 1000,
                ..CircuitBreakerConfig::default()
            },
            default_command_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_retrying() {
        let pipeline = ResiliencePipeline::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let result = pipeline
            .execute(&CancellationToken::new(), None, |_info| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Error>(7) }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_up_to_max_attempts() {
        let pipeline = ResiliencePipeline::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let result = pipeline
            .execute(&CancellationToken::new(), None, |_info| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Transient { message: "deadlock".into(), sql_error_number: Some(1205) })
                    } else {
                        Ok(99)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn requests_deadlock_priority_elevation_on_the_retry_after_a_1205() {
        let pipeline = ResiliencePipeline::new(fast_config(2));
        let seen_elevation = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = seen_elevation.clone();
        let _ = pipeline
            .execute(&CancellationToken::new(), None, move |info: AttemptInfo| {
                seen.lock().unwrap().push(info.elevate_deadlock_priority);
                async move {
                    if info.attempt == 0 {
                        Err(Error::Transient { message: "deadlock".into(), sql_error_number: Some(1205) })
                    } else {
                        Ok::<_, Error>(())
                    }
                }
            })
            .await;
        assert_eq!(*seen_elevation.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let pipeline = ResiliencePipeline::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let result = pipeline
            .execute(&CancellationToken::new(), None, |_info| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::ParameterMissing("p".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_bypasses_retry() {
        let pipeline = ResiliencePipeline::new(fast_config(5));
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        token.cancel();
        let result = pipeline
            .execute(&token, None, |_info| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Error>(()) }
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausting_retries_surfaces_the_last_error() {
        let pipeline = ResiliencePipeline::new(fast_config(2));
        let result = pipeline
            .execute(&CancellationToken::new(), None, |_info| async {
                Err::<(), _>(Error::Transient { message: "still down".into(), sql_error_number: Some(10054) })
            })
            .await;
        assert!(matches!(result, Err(Error::Transient { .. })));
    }
}
