//! tiberius wire plumbing, schema-discovery batch queries, and the
//! file-backed epoch store / in-memory distributed-cache stand-ins that
//! back the `sqlrt-core` traits (spec §4.5, §4.7, §6).

mod connection;
mod distributed_cache;
mod epoch_storage;
mod repository;

pub use connection::{MssqlConnectOptions, MssqlConnection, MssqlConnectionError};
pub use distributed_cache::InMemoryDistributedCache;
pub use epoch_storage::FileEpochStorage;
pub use repository::TiberiusSchemaRepository;
