//! Pipeline status roll-up from the statuses of its latest jobs.

use std::sync::Arc;

use chrono::Utc;
use ci_core::{EngineEvent, JobStatus, PipelineId, composite_status};
use db::{JobStore, PipelineStore};

use crate::optimistic::retry_on_conflict;
use crate::{EngineResult, Outbox};

pub struct PipelineStatusUpdater {
    pipelines: Arc<dyn PipelineStore>,
    jobs: Arc<dyn JobStore>,
    outbox: Outbox,
    retries: u32,
}

impl PipelineStatusUpdater {
    pub fn new(
        pipelines: Arc<dyn PipelineStore>,
        jobs: Arc<dyn JobStore>,
        outbox: Outbox,
        retries: u32,
    ) -> Self {
        Self {
            pipelines,
            jobs,
            outbox,
            retries,
        }
    }

    /// Recompute and store the pipeline's status. Returns the status.
    pub async fn update_status(&self, pipeline_id: PipelineId) -> EngineResult<JobStatus> {
        let entity = format!("pipeline {pipeline_id}");
        retry_on_conflict(&entity, self.retries, |_| async move {
            let mut pipeline = self.pipelines.get_pipeline(pipeline_id).await?;
            let status = composite_status(
                self.jobs
                    .jobs_in_pipeline(pipeline_id)
                    .await?
                    .into_iter()
                    .filter(|job| job.is_latest())
                    .map(|job| job.status),
            );
            if status == pipeline.status {
                return Ok(Some(status));
            }

            let old_status = pipeline.status;
            let now = Utc::now();
            pipeline.status = status;
            pipeline.updated_at = now;
            if status == JobStatus::Running && pipeline.started_at.is_none() {
                pipeline.started_at = Some(now);
            }
            pipeline.finished_at = status.is_terminal().then_some(now);

            let Some(saved) = self.pipelines.update_pipeline_if_unchanged(&pipeline).await? else {
                return Ok(None);
            };
            tracing::info!("Pipeline {} {} -> {}", pipeline_id, old_status, saved.status);
            self.outbox.emit(EngineEvent::PipelineStatusChanged {
                pipeline_id,
                old_status,
                new_status: saved.status,
                timestamp: now,
            });
            Ok(Some(saved.status))
        })
        .await
    }
}
