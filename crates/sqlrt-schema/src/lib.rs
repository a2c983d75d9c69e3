//! Negative cache, hybrid snapshot, epoch store and schema service
//! orchestration (C4–C8) for the sqlrt data-access runtime.

mod epoch;
mod negative_cache;
mod service;
mod snapshot;
mod striped_lock;

pub use epoch::{spawn_watcher, FlushCoordinator, FlushHook};
pub use negative_cache::{NegativeCache, ObjectKind};
pub use service::{SchemaService, SchemaServiceConfig};
pub use snapshot::Snapshot;
pub use striped_lock::StripedLocks;
