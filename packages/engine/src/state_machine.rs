//! The job lifecycle: transition table plus hooks, persisted optimistically.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ci_core::{
    EngineEvent, FailureReason, Guards, Job, JobConfig, JobEvent, JobId, JobStatus,
    TimeoutSource, next_status,
};
use db::JobStore;

use crate::dependencies::ResolutionContext;
use crate::optimistic::retry_on_conflict;
use crate::{
    DependencyResolver, EngineError, EngineResult, Outbox, ResourceGroupCoordinator,
    RetryService,
};

/// What became of a fired event.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The new status was written.
    Applied { job: Job, from: JobStatus },
    /// A pre-hook held the job back; nothing was written.
    Halted(Job),
}

impl TransitionOutcome {
    pub fn job(&self) -> &Job {
        match self {
            TransitionOutcome::Applied { job, .. } | TransitionOutcome::Halted(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            TransitionOutcome::Applied { job, .. } | TransitionOutcome::Halted(job) => job,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

enum Attempt {
    Done(TransitionOutcome),
    /// The `run` guard found missing dependencies.
    MissingDependencies,
}

pub struct JobStateMachine {
    jobs: Arc<dyn JobStore>,
    coordinator: Arc<ResourceGroupCoordinator>,
    resolver: Arc<DependencyResolver>,
    retries: Arc<dyn RetryService>,
    outbox: Outbox,
    config: JobConfig,
}

impl JobStateMachine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        coordinator: Arc<ResourceGroupCoordinator>,
        resolver: Arc<DependencyResolver>,
        retries: Arc<dyn RetryService>,
        outbox: Outbox,
        config: JobConfig,
    ) -> Self {
        Self {
            jobs,
            coordinator,
            resolver,
            retries,
            outbox,
            config,
        }
    }

    /// Fire `event` on the job.
    ///
    /// Fails with `InvalidTransition` when the event is not allowed from the
    /// job's status and with `MissingDependencies` when `run` is rejected; in
    /// the latter case the job has been dropped.
    pub async fn fire(&self, job_id: JobId, event: JobEvent) -> EngineResult<TransitionOutcome> {
        self.fire_with_reason(job_id, event, None).await
    }

    pub async fn enqueue(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::Enqueue).await
    }

    pub async fn enqueue_waiting_for_resource(
        &self,
        job_id: JobId,
    ) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::EnqueueWaitingForResource).await
    }

    pub async fn enqueue_preparing(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::EnqueuePreparing).await
    }

    pub async fn run(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::Run).await
    }

    pub async fn succeed(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::Succeed).await
    }

    /// Fire `drop`, recording why the job failed.
    pub async fn drop_job(
        &self,
        job_id: JobId,
        reason: FailureReason,
    ) -> EngineResult<TransitionOutcome> {
        self.fire_with_reason(job_id, JobEvent::Drop, Some(reason))
            .await
    }

    pub async fn cancel(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::Cancel).await
    }

    pub async fn skip(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::Skip).await
    }

    pub async fn actionize(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::Actionize).await
    }

    pub async fn schedule(&self, job_id: JobId) -> EngineResult<TransitionOutcome> {
        self.fire(job_id, JobEvent::Schedule).await
    }

    async fn fire_with_reason(
        &self,
        job_id: JobId,
        event: JobEvent,
        reason: Option<FailureReason>,
    ) -> EngineResult<TransitionOutcome> {
        match self.transition(job_id, event, reason).await? {
            Attempt::Done(outcome) => Ok(outcome),
            Attempt::MissingDependencies => {
                tracing::info!("Job {} cannot run: missing dependencies", job_id);
                self.transition(
                    job_id,
                    JobEvent::Drop,
                    Some(FailureReason::MissingDependencyFailure),
                )
                .await?;
                Err(EngineError::MissingDependencies { job_id })
            }
        }
    }

    /// Load, run pre-hooks, compute, write conditionally; reload on conflict.
    ///
    /// `apply` never touches the scheduling mode and the write only lands on
    /// the version that was loaded, so the mode stays as created.
    async fn transition(
        &self,
        job_id: JobId,
        event: JobEvent,
        reason: Option<FailureReason>,
    ) -> EngineResult<Attempt> {
        let entity = format!("job {job_id}");
        retry_on_conflict(&entity, self.config.transition_retries, |_| async move {
            let current = self.jobs.get_job(job_id).await?;
            let to = next_status(current.status, event, Guards::for_job(&current))?;

            match event {
                JobEvent::EnqueueWaitingForResource if current.has_resource_group() => {
                    if !self.coordinator.assign(&current).await? {
                        tracing::debug!("Job {} is still waiting for its resource", job_id);
                        return Ok(Some(Attempt::Done(TransitionOutcome::Halted(current))));
                    }
                }
                JobEvent::Run => {
                    let mut ctx = ResolutionContext::new();
                    if !self.resolver.valid(&current, &mut ctx).await? {
                        return Ok(Some(Attempt::MissingDependencies));
                    }
                }
                _ => {}
            }

            let from = current.status;
            let next = apply(
                current,
                to,
                event,
                reason,
                Utc::now(),
                self.config.project_timeout_secs,
            );

            let Some(saved) = self.jobs.update_job_if_unchanged(&next).await? else {
                return Ok(None);
            };
            tracing::debug!("Job {} {}: {} -> {}", job_id, event, from, to);
            self.after_transition(&saved, from, event).await;
            Ok(Some(Attempt::Done(TransitionOutcome::Applied { job: saved, from })))
        })
        .await
    }

    /// Post-hooks. The write is committed; failures here are only logged.
    async fn after_transition(&self, job: &Job, from: JobStatus, event: JobEvent) {
        let now = Utc::now();
        self.outbox.emit(EngineEvent::JobStatusChanged {
            job_id: job.id,
            pipeline_id: job.pipeline_id,
            old_status: from,
            new_status: job.status,
            timestamp: now,
        });

        if job.status == JobStatus::WaitingForResource
            && let Some(key) = &job.resource_group
        {
            self.outbox.emit(EngineEvent::ResourceRequested {
                group_key: key.clone(),
                job_id: job.id,
                timestamp: now,
            });
        }

        if job.status.is_terminal()
            && job.has_resource_group()
            && let Some(key) = &job.resource_group
        {
            match self.coordinator.release(job).await {
                Ok(true) => self.outbox.emit(EngineEvent::ResourceReleased {
                    group_key: key.clone(),
                    job_id: job.id,
                    timestamp: now,
                }),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    "Failed to release resource '{}' held by job {}: {}",
                    key,
                    job.id,
                    e
                ),
            }
        }

        if event == JobEvent::Drop && job.is_retryable_on_drop() {
            match self.retries.retry(job).await {
                Ok(retry) => self.outbox.emit(EngineEvent::JobRetried {
                    job_id: job.id,
                    retry_job_id: retry.id,
                    timestamp: now,
                }),
                Err(e) => tracing::warn!("Failed to retry job {}: {}", job.id, e),
            }
        }
    }
}

/// Compute the job after moving to `to`. Pure, so safe to redo on conflict.
fn apply(
    mut job: Job,
    to: JobStatus,
    event: JobEvent,
    reason: Option<FailureReason>,
    now: DateTime<Utc>,
    project_timeout_secs: u64,
) -> Job {
    job.status = to;
    job.updated_at = now;

    match to {
        JobStatus::WaitingForResource => job.waiting_for_resource_at = Some(now),
        JobStatus::Running => {
            job.started_at = Some(now);
            if job.kind.has_trace() {
                let (timeout, source) = timeout_for(project_timeout_secs, job.runner_timeout_secs);
                job.timeout_secs = Some(timeout);
                job.timeout_source = Some(source);
            }
        }
        _ => {}
    }

    if to.is_terminal() {
        job.finished_at = Some(now);
        job.duration_secs = job
            .started_at
            .map(|started| (now - started).num_milliseconds() as f64 / 1000.0);
    }

    if event == JobEvent::Drop {
        job.failure_reason = Some(reason.unwrap_or_default());
    }

    job
}

/// The effective timeout and which limit decided it.
fn timeout_for(project_secs: u64, runner_secs: Option<u64>) -> (u64, TimeoutSource) {
    match runner_secs {
        Some(runner) if runner < project_secs => (runner, TimeoutSource::RunnerTimeoutSource),
        _ => (project_secs, TimeoutSource::ProjectTimeoutSource),
    }
}
