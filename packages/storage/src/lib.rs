//! Byte storage tiers and leases for job traces.
//!
//! - [`Storage`]: durable object storage (S3, filesystem, memory) via `object_store`
//! - [`CacheTier`]: fast tier holding chunks that are still being appended to
//! - [`LeaseBackend`] and [`in_lock`]: named exclusive leases with a TTL

mod cache;
mod lease;
mod object;

pub use cache::{CacheTier, MemoryCache};
pub use lease::{LeaseBackend, LeasePolicy, MemoryLeases, in_lock};
pub use object::{S3Config, Storage, StorageBackendConfig, StorageConfig, StorageKind};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("failed to obtain lease {key}")]
    LeaseNotObtained { key: String },
}
