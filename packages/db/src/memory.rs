//! In-process store. Every operation runs under one async mutex, which makes
//! the conditional writes atomic across tasks.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ci_core::{
    Job, JobId, JobStatus, Pipeline, PipelineId, Resource, ResourceGroup, TraceChunk,
};
use tokio::sync::Mutex;

use crate::DbError;
use crate::store::{JobStore, PipelineStore, ResourceStore, TraceChunkStore};

#[derive(Default)]
struct Tables {
    jobs: BTreeMap<JobId, Job>,
    pipelines: BTreeMap<PipelineId, Pipeline>,
    groups: HashMap<String, ResourceGroup>,
    resources: HashMap<String, Resource>,
    chunks: BTreeMap<(JobId, u64), TraceChunk>,
    last_job_id: u64,
    last_pipeline_id: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn next_job_id(&self) -> Result<JobId, DbError> {
        let mut tables = self.tables.lock().await;
        tables.last_job_id += 1;
        Ok(JobId(tables.last_job_id))
    }

    async fn insert_job(&self, job: &Job) -> Result<Job, DbError> {
        let mut tables = self.tables.lock().await;
        if tables.jobs.contains_key(&job.id) {
            return Err(DbError::AlreadyExists(format!("job {}", job.id)));
        }
        tables.last_job_id = tables.last_job_id.max(job.id.0);
        tables.jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, DbError> {
        let tables = self.tables.lock().await;
        tables
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    async fn update_job_if_unchanged(&self, job: &Job) -> Result<Option<Job>, DbError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", job.id)))?;
        if stored.lock_version != job.lock_version {
            return Ok(None);
        }
        let mut updated = job.clone();
        updated.lock_version += 1;
        *stored = updated.clone();
        Ok(Some(updated))
    }

    async fn jobs_in_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<Job>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|job| job.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn latest_successful_jobs(
        &self,
        pipeline_ids: &[PipelineId],
        names: &[String],
    ) -> Result<Vec<Job>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|job| {
                job.is_latest()
                    && job.status == JobStatus::Success
                    && pipeline_ids.contains(&job.pipeline_id)
                    && names.contains(&job.name)
            })
            .cloned()
            .collect())
    }

    async fn jobs_in_resource_group(
        &self,
        group_key: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|job| {
                job.resource_group.as_deref() == Some(group_key) && statuses.contains(&job.status)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn next_pipeline_id(&self) -> Result<PipelineId, DbError> {
        let mut tables = self.tables.lock().await;
        tables.last_pipeline_id += 1;
        Ok(PipelineId(tables.last_pipeline_id))
    }

    async fn insert_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline, DbError> {
        let mut tables = self.tables.lock().await;
        if tables.pipelines.contains_key(&pipeline.id) {
            return Err(DbError::AlreadyExists(format!("pipeline {}", pipeline.id)));
        }
        tables.last_pipeline_id = tables.last_pipeline_id.max(pipeline.id.0);
        tables.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline.clone())
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, DbError> {
        let tables = self.tables.lock().await;
        tables
            .pipelines
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("Pipeline not found: {}", id)))
    }

    async fn update_pipeline_if_unchanged(
        &self,
        pipeline: &Pipeline,
    ) -> Result<Option<Pipeline>, DbError> {
        let mut tables = self.tables.lock().await;
        let stored = tables.pipelines.get_mut(&pipeline.id).ok_or_else(|| {
            DbError::NotFound(format!("Pipeline not found: {}", pipeline.id))
        })?;
        if stored.lock_version != pipeline.lock_version {
            return Ok(None);
        }
        let mut updated = pipeline.clone();
        updated.lock_version += 1;
        *stored = updated.clone();
        Ok(Some(updated))
    }

    async fn family_pipeline_ids(&self, root_id: PipelineId) -> Result<Vec<PipelineId>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .pipelines
            .values()
            .filter(|pipeline| pipeline.root_id == root_id)
            .map(|pipeline| pipeline.id)
            .collect())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn save_resource_group(&self, group: &ResourceGroup) -> Result<ResourceGroup, DbError> {
        let mut tables = self.tables.lock().await;
        let saved = tables
            .groups
            .entry(group.key.clone())
            .and_modify(|existing| existing.process_mode = group.process_mode)
            .or_insert_with(|| group.clone());
        Ok(saved.clone())
    }

    async fn find_resource_group(&self, key: &str) -> Result<Option<ResourceGroup>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables.groups.get(key).cloned())
    }

    async fn ensure_resource(&self, key: &str) -> Result<Resource, DbError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .resources
            .entry(key.to_string())
            .or_insert_with(|| Resource::free(key))
            .clone())
    }

    async fn find_resource(&self, key: &str) -> Result<Option<Resource>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables.resources.get(key).cloned())
    }

    async fn retain_resource(
        &self,
        key: &str,
        job_id: JobId,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut tables = self.tables.lock().await;
        match tables.resources.get_mut(key) {
            Some(resource) if resource.is_free() => {
                resource.retained_by = Some(job_id);
                resource.retained_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(DbError::NotFound(format!("Resource not found: {}", key))),
        }
    }

    async fn release_resource(&self, key: &str, job_id: JobId) -> Result<bool, DbError> {
        let mut tables = self.tables.lock().await;
        match tables.resources.get_mut(key) {
            Some(resource) if resource.retained_by == Some(job_id) => {
                resource.retained_by = None;
                resource.retained_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn retained_resources(&self) -> Result<Vec<Resource>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .resources
            .values()
            .filter(|resource| !resource.is_free())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TraceChunkStore for MemoryStore {
    async fn find_chunk(
        &self,
        job_id: JobId,
        chunk_index: u64,
    ) -> Result<Option<TraceChunk>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables.chunks.get(&(job_id, chunk_index)).cloned())
    }

    async fn ensure_chunk(&self, job_id: JobId, chunk_index: u64) -> Result<TraceChunk, DbError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .chunks
            .entry((job_id, chunk_index))
            .or_insert_with(|| TraceChunk::new(job_id, chunk_index))
            .clone())
    }

    async fn save_chunk(&self, chunk: &TraceChunk) -> Result<TraceChunk, DbError> {
        let mut tables = self.tables.lock().await;
        tables
            .chunks
            .insert((chunk.job_id, chunk.chunk_index), chunk.clone());
        Ok(chunk.clone())
    }

    async fn chunks_for_job(&self, job_id: JobId) -> Result<Vec<TraceChunk>, DbError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .chunks
            .range((job_id, 0)..=(job_id, u64::MAX))
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }
}
