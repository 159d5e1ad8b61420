//! SurrealDB-backed pipeline storage.

use async_trait::async_trait;
use ci_core::{Pipeline, PipelineId};
use serde::{Deserialize, Serialize};

use crate::store::PipelineStore;
use crate::{DbError, get_db};

use super::{Sequence, next_in_sequence};

pub struct PipelineRepository;

#[derive(Debug, Serialize, Deserialize)]
struct PipelineRecord {
    pipeline_id: u64,
    root_id: u64,
    lock_version: u64,
    pipeline: Pipeline,
}

impl From<Pipeline> for PipelineRecord {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            pipeline_id: pipeline.id.0,
            root_id: pipeline.root_id.0,
            lock_version: pipeline.lock_version,
            pipeline,
        }
    }
}

#[async_trait]
impl PipelineStore for PipelineRepository {
    async fn next_pipeline_id(&self) -> Result<PipelineId, DbError> {
        Ok(PipelineId(next_in_sequence(Sequence::Pipeline).await?))
    }

    async fn insert_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline, DbError> {
        let db = get_db()?;

        let mut existing = db
            .query("SELECT * FROM type::thing('pipeline', $id)")
            .bind(("id", pipeline.id.0))
            .await?;
        let found: Vec<PipelineRecord> = existing.take(0)?;
        if !found.is_empty() {
            return Err(DbError::AlreadyExists(format!("pipeline {}", pipeline.id)));
        }

        let mut result = db
            .query(
                r#"
                CREATE type::thing('pipeline', $id) CONTENT $record;
                UPSERT type::thing('sequence', $sequence)
                    SET value = math::max([(value OR 0), $id]);
                "#,
            )
            .bind(("id", pipeline.id.0))
            .bind(("record", PipelineRecord::from(pipeline.clone())))
            .bind(("sequence", Sequence::Pipeline.name()))
            .await?;
        let created: Vec<PipelineRecord> = result.take(0)?;

        created
            .into_iter()
            .next()
            .map(|r| r.pipeline)
            .ok_or_else(|| DbError::Query("Failed to create pipeline".into()))
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM type::thing('pipeline', $id)")
            .bind(("id", id.0))
            .await?;
        let records: Vec<PipelineRecord> = result.take(0)?;

        records
            .into_iter()
            .next()
            .map(|r| r.pipeline)
            .ok_or_else(|| DbError::NotFound(format!("Pipeline not found: {}", id)))
    }

    async fn update_pipeline_if_unchanged(
        &self,
        pipeline: &Pipeline,
    ) -> Result<Option<Pipeline>, DbError> {
        let db = get_db()?;

        let mut next = pipeline.clone();
        next.lock_version += 1;

        let mut result = db
            .query(
                r#"
                UPDATE type::thing('pipeline', $id) CONTENT $record
                WHERE lock_version = $expected
                RETURN AFTER
                "#,
            )
            .bind(("id", pipeline.id.0))
            .bind(("expected", pipeline.lock_version))
            .bind(("record", PipelineRecord::from(next)))
            .await?;
        let records: Vec<PipelineRecord> = result.take(0)?;

        match records.into_iter().next() {
            Some(record) => Ok(Some(record.pipeline)),
            None => {
                self.get_pipeline(pipeline.id).await?;
                Ok(None)
            }
        }
    }

    async fn family_pipeline_ids(&self, root_id: PipelineId) -> Result<Vec<PipelineId>, DbError> {
        let db = get_db()?;

        #[derive(Deserialize)]
        struct IdRow {
            pipeline_id: u64,
        }

        let mut result = db
            .query("SELECT pipeline_id FROM pipeline WHERE root_id = $root ORDER BY pipeline_id ASC")
            .bind(("root", root_id.0))
            .await?;
        let rows: Vec<IdRow> = result.take(0)?;

        Ok(rows.into_iter().map(|r| PipelineId(r.pipeline_id)).collect())
    }
}
