//! Automatic retries of dropped jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ci_core::{Job, JobId};
use db::JobStore;

use crate::EngineResult;
use crate::optimistic::retry_on_conflict;

#[async_trait]
pub trait RetryService: Send + Sync {
    /// Create the job that supersedes `job`.
    async fn retry(&self, job: &Job) -> EngineResult<Job>;
}

/// Retries by cloning the job into a fresh `created` job.
pub struct CloneRetryService {
    jobs: Arc<dyn JobStore>,
    transition_retries: u32,
}

impl CloneRetryService {
    pub fn new(jobs: Arc<dyn JobStore>, transition_retries: u32) -> Self {
        Self {
            jobs,
            transition_retries,
        }
    }
}

impl CloneRetryService {
    /// Set or clear `retried` on the stored job. Returns whether it changed.
    async fn set_retried(&self, id: JobId, retried: bool) -> EngineResult<bool> {
        let jobs = &self.jobs;
        retry_on_conflict(&format!("job {id}"), self.transition_retries, |_| async move {
            let mut stored = jobs.get_job(id).await?;
            if stored.retried == retried {
                return Ok(Some(false));
            }
            stored.retried = retried;
            stored.updated_at = Utc::now();
            Ok(jobs.update_job_if_unchanged(&stored).await?.map(|_| true))
        })
        .await
    }
}

#[async_trait]
impl RetryService for CloneRetryService {
    /// Marks the original `retried` before inserting the copy, so at most one
    /// job of the name is ever latest. A failed insert clears the mark again.
    async fn retry(&self, job: &Job) -> EngineResult<Job> {
        let id = self.jobs.next_job_id().await?;
        let now = Utc::now();

        let mut clone = Job::new(id, job.pipeline_id, job.name.clone());
        clone.kind = job.kind;
        clone.stage_idx = job.stage_idx;
        clone.scheduling_mode = job.scheduling_mode;
        clone.resource_group = job.resource_group.clone();
        clone.retries_count = job.retries_count + 1;
        clone.retries_max = job.retries_max;
        clone.needs = job.needs.clone();
        clone.dependencies = job.dependencies.clone();
        clone.cross_dependencies = job.cross_dependencies.clone();
        clone.variables = job.variables.clone();
        clone.prerequisites = job.prerequisites.clone();
        clone.runner_timeout_secs = job.runner_timeout_secs;
        clone.created_at = now;
        clone.updated_at = now;

        let marked = self.set_retried(job.id, true).await?;
        let created = match self.jobs.insert_job(&clone).await {
            Ok(created) => created,
            Err(e) => {
                if marked && let Err(undo) = self.set_retried(job.id, false).await {
                    tracing::warn!(
                        "Failed to unmark job {} after a failed retry: {}",
                        job.id,
                        undo
                    );
                }
                return Err(e.into());
            }
        };

        tracing::info!("Job {} retried as job {}", job.id, created.id);
        Ok(created)
    }
}
