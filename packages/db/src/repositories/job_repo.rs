//! SurrealDB-backed job storage.

use async_trait::async_trait;
use ci_core::{Job, JobId, JobStatus, PipelineId};
use serde::{Deserialize, Serialize};

use crate::store::JobStore;
use crate::{DbError, get_db};

use super::{Sequence, next_in_sequence};

/// Repository for job persistence operations.
pub struct JobRepository;

/// Stored form: the job itself plus the columns queries filter on.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    job_id: u64,
    pipeline_id: u64,
    name: String,
    status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_group: Option<String>,
    retried: bool,
    lock_version: u64,
    job: Job,
}

impl From<Job> for JobRecord {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id.0,
            pipeline_id: job.pipeline_id.0,
            name: job.name.clone(),
            status: job.status,
            resource_group: job.resource_group.clone(),
            retried: job.retried,
            lock_version: job.lock_version,
            job,
        }
    }
}

fn into_jobs(records: Vec<JobRecord>) -> Vec<Job> {
    records.into_iter().map(|r| r.job).collect()
}

#[async_trait]
impl JobStore for JobRepository {
    async fn next_job_id(&self) -> Result<JobId, DbError> {
        Ok(JobId(next_in_sequence(Sequence::Job).await?))
    }

    async fn insert_job(&self, job: &Job) -> Result<Job, DbError> {
        let db = get_db()?;

        let mut existing = db
            .query("SELECT * FROM type::thing('job', $id)")
            .bind(("id", job.id.0))
            .await?;
        let found: Vec<JobRecord> = existing.take(0)?;
        if !found.is_empty() {
            return Err(DbError::AlreadyExists(format!("job {}", job.id)));
        }

        let mut result = db
            .query(
                r#"
                CREATE type::thing('job', $id) CONTENT $record;
                UPSERT type::thing('sequence', $sequence)
                    SET value = math::max([(value OR 0), $id]);
                "#,
            )
            .bind(("id", job.id.0))
            .bind(("record", JobRecord::from(job.clone())))
            .bind(("sequence", Sequence::Job.name()))
            .await?;

        let created: Vec<JobRecord> = result.take(0)?;
        created
            .into_iter()
            .next()
            .map(|r| r.job)
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    async fn get_job(&self, id: JobId) -> Result<Job, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM type::thing('job', $id)")
            .bind(("id", id.0))
            .await?;
        let records: Vec<JobRecord> = result.take(0)?;

        records
            .into_iter()
            .next()
            .map(|r| r.job)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    async fn update_job_if_unchanged(&self, job: &Job) -> Result<Option<Job>, DbError> {
        let db = get_db()?;

        let mut next = job.clone();
        next.lock_version += 1;

        let mut result = db
            .query(
                r#"
                UPDATE type::thing('job', $id) CONTENT $record
                WHERE lock_version = $expected
                RETURN AFTER
                "#,
            )
            .bind(("id", job.id.0))
            .bind(("expected", job.lock_version))
            .bind(("record", JobRecord::from(next)))
            .await?;
        let records: Vec<JobRecord> = result.take(0)?;

        match records.into_iter().next() {
            Some(record) => Ok(Some(record.job)),
            None => {
                // Distinguish a lost race from a missing row.
                self.get_job(job.id).await?;
                Ok(None)
            }
        }
    }

    async fn jobs_in_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM job WHERE pipeline_id = $pipeline ORDER BY job_id ASC")
            .bind(("pipeline", pipeline_id.0))
            .await?;
        let records: Vec<JobRecord> = result.take(0)?;

        Ok(into_jobs(records))
    }

    async fn latest_successful_jobs(
        &self,
        pipeline_ids: &[PipelineId],
        names: &[String],
    ) -> Result<Vec<Job>, DbError> {
        if pipeline_ids.is_empty() || names.is_empty() {
            return Ok(Vec::new());
        }
        let db = get_db()?;

        let pipelines: Vec<u64> = pipeline_ids.iter().map(|id| id.0).collect();
        let mut result = db
            .query(
                r#"
                SELECT * FROM job
                WHERE pipeline_id IN $pipelines
                    AND name IN $names
                    AND status = $status
                    AND retried = false
                ORDER BY job_id ASC
                "#,
            )
            .bind(("pipelines", pipelines))
            .bind(("names", names.to_vec()))
            .bind(("status", JobStatus::Success))
            .await?;
        let records: Vec<JobRecord> = result.take(0)?;

        Ok(into_jobs(records))
    }

    async fn jobs_in_resource_group(
        &self,
        group_key: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                r#"
                SELECT * FROM job
                WHERE resource_group = $group AND status IN $statuses
                ORDER BY job_id ASC
                "#,
            )
            .bind(("group", group_key.to_string()))
            .bind(("statuses", statuses.to_vec()))
            .await?;
        let records: Vec<JobRecord> = result.take(0)?;

        Ok(into_jobs(records))
    }
}
