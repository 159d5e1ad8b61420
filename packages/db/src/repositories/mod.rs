//! SurrealDB implementations of the store traits.

mod job_repo;
mod pipeline_repo;
mod resource_repo;
mod trace_chunk_repo;

pub use job_repo::JobRepository;
pub use pipeline_repo::PipelineRepository;
pub use resource_repo::ResourceRepository;
pub use trace_chunk_repo::TraceChunkRepository;

use serde::Deserialize;

use crate::{DbError, get_db};

/// Named id counters stored in the `sequence` table.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Sequence {
    Job,
    Pipeline,
}

impl Sequence {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Sequence::Job => "job",
            Sequence::Pipeline => "pipeline",
        }
    }
}

/// Atomically bump a sequence and return the new value.
pub(crate) async fn next_in_sequence(sequence: Sequence) -> Result<u64, DbError> {
    let db = get_db()?;

    #[derive(Deserialize)]
    struct SequenceRecord {
        value: u64,
    }

    let mut result = db
        .query("UPSERT type::thing('sequence', $name) SET value = (value OR 0) + 1 RETURN AFTER")
        .bind(("name", sequence.name()))
        .await?;
    let records: Vec<SequenceRecord> = result.take(0)?;

    records
        .into_iter()
        .next()
        .map(|r| r.value)
        .ok_or_else(|| DbError::Query(format!("sequence {} did not advance", sequence.name())))
}
