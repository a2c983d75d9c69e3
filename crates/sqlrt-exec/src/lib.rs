//! Parameter binder, connection pool, execution strategy, executor,
//! adaptive batch sizer and resumable cursor store (C3, C12–C14) for the
//! sqlrt data-access runtime.

mod batch_sizer;
mod binder;
mod executor;
mod mapper;
mod pool;
mod resumable;
mod strategy;

pub use batch_sizer::{AdaptiveBatchSizer, BatchSizerConfig, FlushOutcome};
pub use binder::{
    bind_sp_parameters, bind_tvp_parameter, bind_tvp_value, build_sp_command_text, BoundParameter, NullChecking,
};
pub use executor::{ChaosInjector, Executor, ExecutorConfig, MultiResultReader, NoopChaosInjector, Parameters};
pub use mapper::{map_rows, FromRow};
pub use pool::{ConnectionFactory, Pool, PoolConfig, PoolStats};
pub use resumable::{resumable_query, CursorStore, InMemoryCursorStore};
pub use strategy::{ResilientStrategy, Strategy, TransactionalStrategy};
