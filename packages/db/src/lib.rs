//! Persistence for the CI engine.
//!
//! Services depend on the traits in [`store`]. Two backends implement them:
//! [`MemoryStore`] for single-process use and tests, and the SurrealDB
//! [`repositories`] behind the global connection from [`init`].
//!
//! # Features
//!
//! - `memory` (default): in-memory SurrealDB engine
//! - `rocksdb`: RocksDB for persistent file-based storage

mod connection;
mod memory;
mod schema;
pub mod repositories;
pub mod store;

pub use connection::{Database, DbConfig, DbError, get_db, init_db};
pub use memory::MemoryStore;
pub use schema::{TABLES, init_schema};
pub use store::{JobStore, PipelineStore, ResourceStore, TraceChunkStore};

/// Connect and create the schema. Safe to call more than once.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}
