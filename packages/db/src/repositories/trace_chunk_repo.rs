//! SurrealDB-backed trace chunk metadata, keyed by `[job_id, chunk_index]`.

use async_trait::async_trait;
use chrono::Utc;
use ci_core::{DataStore, JobId, TraceChunk};

use crate::store::TraceChunkStore;
use crate::{DbError, get_db};

pub struct TraceChunkRepository;

#[async_trait]
impl TraceChunkStore for TraceChunkRepository {
    async fn find_chunk(
        &self,
        job_id: JobId,
        chunk_index: u64,
    ) -> Result<Option<TraceChunk>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM type::thing('trace_chunk', [$job, $index])")
            .bind(("job", job_id.0))
            .bind(("index", chunk_index))
            .await?;
        let chunks: Vec<TraceChunk> = result.take(0)?;

        Ok(chunks.into_iter().next())
    }

    async fn ensure_chunk(&self, job_id: JobId, chunk_index: u64) -> Result<TraceChunk, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                UPSERT type::thing('trace_chunk', [$job, $index]) SET
                    job_id = $job,
                    chunk_index = $index,
                    data_store = (data_store OR $store),
                    created_at = (created_at OR $now),
                    updated_at = (updated_at OR $now)
                RETURN AFTER
                "#,
            )
            .bind(("job", job_id.0))
            .bind(("index", chunk_index))
            .bind(("store", DataStore::Cache))
            .bind(("now", Utc::now()))
            .await?;
        let chunks: Vec<TraceChunk> = result.take(0)?;

        chunks.into_iter().next().ok_or_else(|| {
            DbError::Query(format!("Failed to create chunk {} of job {}", chunk_index, job_id))
        })
    }

    async fn save_chunk(&self, chunk: &TraceChunk) -> Result<TraceChunk, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPSERT type::thing('trace_chunk', [$job, $index]) CONTENT $chunk RETURN AFTER")
            .bind(("job", chunk.job_id.0))
            .bind(("index", chunk.chunk_index))
            .bind(("chunk", chunk.clone()))
            .await?;
        let chunks: Vec<TraceChunk> = result.take(0)?;

        chunks.into_iter().next().ok_or_else(|| {
            DbError::Query(format!(
                "Failed to save chunk {} of job {}",
                chunk.chunk_index, chunk.job_id
            ))
        })
    }

    async fn chunks_for_job(&self, job_id: JobId) -> Result<Vec<TraceChunk>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM trace_chunk WHERE job_id = $job ORDER BY chunk_index ASC")
            .bind(("job", job_id.0))
            .await?;
        let chunks: Vec<TraceChunk> = result.take(0)?;

        Ok(chunks)
    }
}
