use ci_core::{ChunkError, ConfigError, JobId, TransitionError};
use db::DbError;
use storage::StorageError;

/// Errors produced by the engine services.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("job {job_id} has missing dependencies")]
    MissingDependencies { job_id: JobId },

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// The chunk's write lease could not be obtained in time.
    #[error("failed to obtain write lease {key}")]
    WriteError { key: String },

    #[error("{entity} changed concurrently; giving up after {attempts} attempts")]
    StaleObject { entity: String, attempts: u32 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::LeaseNotObtained { key } => EngineError::WriteError { key },
            other => EngineError::Storage(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
