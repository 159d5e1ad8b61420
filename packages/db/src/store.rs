//! Storage traits the engine services are written against.
//!
//! Two implementations exist: [`crate::MemoryStore`] for a single process
//! and the SurrealDB repositories in [`crate::repositories`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ci_core::{
    Job, JobId, JobStatus, Pipeline, PipelineId, Resource, ResourceGroup, TraceChunk,
};

use crate::DbError;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate an id larger than every job id seen so far.
    async fn next_job_id(&self) -> Result<JobId, DbError>;

    /// Insert a new job. Fails with `AlreadyExists` for a duplicate id.
    async fn insert_job(&self, job: &Job) -> Result<Job, DbError>;

    async fn get_job(&self, id: JobId) -> Result<Job, DbError>;

    /// Conditional write keyed on `lock_version`.
    ///
    /// Stores `job` with `lock_version + 1` when the stored version still
    /// equals `job.lock_version`; returns `None` when another writer won.
    async fn update_job_if_unchanged(&self, job: &Job) -> Result<Option<Job>, DbError>;

    /// All jobs of a pipeline, retried ones included, by id.
    async fn jobs_in_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>, DbError>;

    /// Latest successful jobs whose pipeline and name are both in the given sets.
    async fn latest_successful_jobs(
        &self,
        pipeline_ids: &[PipelineId],
        names: &[String],
    ) -> Result<Vec<Job>, DbError>;

    /// Jobs bound to a resource group and currently in one of `statuses`.
    async fn jobs_in_resource_group(
        &self,
        group_key: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, DbError>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn next_pipeline_id(&self) -> Result<PipelineId, DbError>;

    async fn insert_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline, DbError>;

    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, DbError>;

    /// Conditional write keyed on `lock_version`, like jobs.
    async fn update_pipeline_if_unchanged(
        &self,
        pipeline: &Pipeline,
    ) -> Result<Option<Pipeline>, DbError>;

    /// Ids of every pipeline sharing the family root.
    async fn family_pipeline_ids(&self, root_id: PipelineId) -> Result<Vec<PipelineId>, DbError>;
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create the group or update its process mode.
    async fn save_resource_group(&self, group: &ResourceGroup) -> Result<ResourceGroup, DbError>;

    async fn find_resource_group(&self, key: &str) -> Result<Option<ResourceGroup>, DbError>;

    /// Return the group's single resource, creating it free on first use.
    async fn ensure_resource(&self, key: &str) -> Result<Resource, DbError>;

    async fn find_resource(&self, key: &str) -> Result<Option<Resource>, DbError>;

    /// Atomically set the holder to `job_id` if, and only if, it is empty.
    async fn retain_resource(
        &self,
        key: &str,
        job_id: JobId,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Atomically clear the holder if, and only if, it equals `job_id`.
    async fn release_resource(&self, key: &str, job_id: JobId) -> Result<bool, DbError>;

    /// Every resource that currently has a holder.
    async fn retained_resources(&self) -> Result<Vec<Resource>, DbError>;
}

#[async_trait]
pub trait TraceChunkStore: Send + Sync {
    async fn find_chunk(
        &self,
        job_id: JobId,
        chunk_index: u64,
    ) -> Result<Option<TraceChunk>, DbError>;

    /// Return the chunk, creating it in the cache tier when absent.
    async fn ensure_chunk(&self, job_id: JobId, chunk_index: u64) -> Result<TraceChunk, DbError>;

    /// Overwrite chunk metadata. Callers hold the chunk's write lease.
    async fn save_chunk(&self, chunk: &TraceChunk) -> Result<TraceChunk, DbError>;

    /// Chunks of a job in index order.
    async fn chunks_for_job(&self, job_id: JobId) -> Result<Vec<TraceChunk>, DbError>;
}
