//! Interceptor chain (C11, spec §4.11): `onExecuting`/`onExecuted`/
//! `onFailed` hooks, invoked in registration order, with mock-result
//! suppression.

use async_trait::async_trait;
use sqlrt_core::{Error, InstanceId, Value};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Mutable context threaded through `onExecuting`. An interceptor that
/// calls `set_result` suppresses the driver call entirely; the executor
/// emits `mock_result` instead (spec §4.11).
pub struct InterceptorContext {
    pub instance_id: InstanceId,
    pub cancellation: CancellationToken,
    suppress_execution: bool,
    mock_result: Option<Value>,
}

impl InterceptorContext {
    pub fn new(instance_id: InstanceId, cancellation: CancellationToken) -> Self {
        Self {
            instance_id,
            cancellation,
            suppress_execution: false,
            mock_result: None,
        }
    }

    pub fn suppress_execution(&self) -> bool {
        self.suppress_execution
    }

    pub fn mock_result(&self) -> Option<&Value> {
        self.mock_result.as_ref()
    }

    pub fn set_result(&mut self, value: Value) {
        self.suppress_execution = true;
        self.mock_result = Some(value);
    }

    pub fn reset(&mut self) {
        self.suppress_execution = false;
        self.mock_result = None;
    }
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_executing(&self, _command: &str, _ctx: &mut InterceptorContext) {}

    async fn on_executed(&self, _command: &str, _duration_us: u64, _result: Option<&Value>) {}

    async fn on_failed(&self, _command: &str, _duration_us: u64, _error: &Error) {}
}

/// Process-singleton registry of interceptors (spec §5: "interceptor
/// chain... [is a] process-singleton"). Invocation order matches
/// registration order.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    fn snapshot(&self) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors.read().clone()
    }

    /// Runs every `onExecuting` hook in order; returns once all have had a
    /// chance to inspect/mutate `ctx`, per spec ("`onExecuting` completes
    /// for all interceptors before the driver is touched").
    pub async fn fire_executing(&self, command: &str, ctx: &mut InterceptorContext) {
        for interceptor in self.snapshot() {
            interceptor.on_executing(command, ctx).await;
        }
    }

    pub async fn fire_executed(&self, command: &str, duration_us: u64, result: Option<&Value>) {
        for interceptor in self.snapshot() {
            interceptor.on_executed(command, duration_us, result).await;
        }
    }

    pub async fn fire_failed(&self, command: &str, duration_us: u64, error: &Error) {
        for interceptor in self.snapshot() {
            interceptor.on_failed(command, duration_us, error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct OrderRecordingInterceptor {
        id: usize,
        order: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Interceptor for OrderRecordingInterceptor {
        async fn on_executing(&self, _command: &str, _ctx: &mut InterceptorContext) {
            self.order.lock().unwrap().push(self.id);
        }
    }

    #[tokio::test]
    async fn hooks_fire_in_registration_order() {
        let chain = InterceptorChain::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        chain.register(Arc::new(OrderRecordingInterceptor { id: 1, order: order.clone() }));
        chain.register(Arc::new(OrderRecordingInterceptor { id: 2, order: order.clone() }));
        chain.register(Arc::new(OrderRecordingInterceptor { id: 3, order: order.clone() }));

        let mut ctx = InterceptorContext::new(InstanceId::from("db1"), CancellationToken::new());
        chain.fire_executing("select 1", &mut ctx).await;

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    struct SuppressingInterceptor;

    #[async_trait]
    impl Interceptor for SuppressingInterceptor {
        async fn on_executing(&self, _command: &str, ctx: &mut InterceptorContext) {
            ctx.set_result(Value::Int64(42));
        }
    }

    #[tokio::test]
    async fn an_interceptor_can_suppress_execution_with_a_mock_result() {
        let chain = InterceptorChain::new();
        chain.register(Arc::new(SuppressingInterceptor));

        let mut ctx = InterceptorContext::new(InstanceId::from("db1"), CancellationToken::new());
        chain.fire_executing("select 1", &mut ctx).await;

        assert!(ctx.suppress_execution());
        assert!(matches!(ctx.mock_result(), Some(Value::Int64(42))));
    }

    #[tokio::test]
    async fn reset_clears_suppression() {
        let mut ctx = InterceptorContext::new(InstanceId::from("db1"), CancellationToken::new());
        ctx.set_result(Value::Bool(true));
        ctx.reset();
        assert!(!ctx.suppress_execution());
        assert!(ctx.mock_result().is_none());
    }

    #[tokio::test]
    async fn failure_counter_tracks_invocations() {
        struct CountingInterceptor(AtomicUsize);

        #[async_trait]
        impl Interceptor for CountingInterceptor {
            async fn on_failed(&self, _command: &str, _duration_us: u64, _error: &Error) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let chain = InterceptorChain::new();
        let interceptor = Arc::new(CountingInterceptor(AtomicUsize::new(0)));
        chain.register(interceptor.clone());

        chain.fire_failed("select 1", 100, &Error::Cancelled).await;
        assert_eq!(interceptor.0.load(Ordering::SeqCst), 1);
    }
}
