//! Mutual exclusion over named single-slot resources.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ci_core::{EngineEvent, Job, JobId, ProcessMode, ResourceGroup, ResourceGroupConfig};
use db::{DbError, JobStore, ResourceStore};

use crate::{EngineResult, Outbox};

/// Hands out each group's resource to at most one job at a time.
pub struct ResourceGroupCoordinator {
    resources: Arc<dyn ResourceStore>,
    jobs: Arc<dyn JobStore>,
    outbox: Outbox,
    config: ResourceGroupConfig,
}

impl ResourceGroupCoordinator {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        jobs: Arc<dyn JobStore>,
        outbox: Outbox,
        config: ResourceGroupConfig,
    ) -> Self {
        Self {
            resources,
            jobs,
            outbox,
            config,
        }
    }

    /// Create the group (and its resource) or update its process mode.
    pub async fn ensure_group(&self, key: &str, mode: ProcessMode) -> EngineResult<ResourceGroup> {
        let group = match self.resources.find_resource_group(key).await? {
            Some(group) if group.process_mode == mode => group,
            Some(group) => {
                self.resources
                    .save_resource_group(&group.with_process_mode(mode))
                    .await?
            }
            None => {
                tracing::info!("Creating resource group '{}' ({})", key, mode);
                self.resources
                    .save_resource_group(&ResourceGroup::new(key).with_process_mode(mode))
                    .await?
            }
        };
        self.resources.ensure_resource(key).await?;
        Ok(group)
    }

    /// Give the job's group resource to `job` if it is free.
    ///
    /// Returns `true` when the job holds the resource afterwards, including
    /// when it already held it. Jobs without a group never hold anything.
    pub async fn assign(&self, job: &Job) -> EngineResult<bool> {
        let Some(key) = job.resource_group.as_deref() else {
            return Ok(false);
        };

        let resource = self.resources.ensure_resource(key).await?;
        if resource.retained_by == Some(job.id) {
            return Ok(true);
        }
        if resource.retained_by.is_some() {
            return Ok(false);
        }

        let retained = self.resources.retain_resource(key, job.id, Utc::now()).await?;
        if retained {
            tracing::debug!("Job {} retained resource '{}'", job.id, key);
        }
        Ok(retained)
    }

    /// Free the job's group resource if `job` holds it.
    pub async fn release(&self, job: &Job) -> EngineResult<bool> {
        let Some(key) = job.resource_group.as_deref() else {
            return Ok(false);
        };
        let released = self.resources.release_resource(key, job.id).await?;
        if released {
            tracing::debug!("Job {} released resource '{}'", job.id, key);
        }
        Ok(released)
    }

    pub async fn current_holder(&self, key: &str) -> EngineResult<Option<JobId>> {
        Ok(self
            .resources
            .find_resource(key)
            .await?
            .and_then(|resource| resource.retained_by))
    }

    /// Number of free slots in the group: 0 or 1.
    pub async fn free_resources(&self, key: &str) -> EngineResult<usize> {
        let resource = self.resources.ensure_resource(key).await?;
        Ok(usize::from(resource.is_free()))
    }

    /// Latest jobs that may be offered the resource next, in offer order.
    pub async fn upcoming_processables(&self, key: &str) -> EngineResult<Vec<Job>> {
        let mode = self
            .resources
            .find_resource_group(key)
            .await?
            .map(|group| group.process_mode)
            .unwrap_or_default();

        let candidates: Vec<Job> = self
            .jobs
            .jobs_in_resource_group(key, mode.candidate_statuses())
            .await?
            .into_iter()
            .filter(Job::is_latest)
            .collect();

        Ok(mode.order_upcoming(candidates))
    }

    /// Force-release resources whose holders finished long ago.
    ///
    /// A holder is stale when it is terminal (or gone) and untouched for
    /// longer than the configured threshold. Returns how many were freed.
    pub async fn release_stale(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let threshold = Duration::seconds(
            i64::try_from(self.config.stale_threshold_secs).unwrap_or(i64::MAX),
        );
        let cutoff = now.checked_sub_signed(threshold).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut released = 0;
        for resource in self.resources.retained_resources().await? {
            let Some(holder) = resource.retained_by else {
                continue;
            };
            match self.release_if_stale(&resource.group_key, holder, cutoff).await {
                Ok(true) => {
                    released += 1;
                    let timestamp = Utc::now();
                    self.outbox.emit(EngineEvent::StaleResourceReleased {
                        group_key: resource.group_key.clone(),
                        job_id: holder,
                        timestamp,
                    });
                    self.outbox.emit(EngineEvent::ResourceReleased {
                        group_key: resource.group_key,
                        job_id: holder,
                        timestamp,
                    });
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    "Failed to release stale resource '{}' held by job {}: {}",
                    resource.group_key,
                    holder,
                    e
                ),
            }
        }

        if released > 0 {
            tracing::info!("Released {} stale resource(s)", released);
        }
        Ok(released)
    }

    async fn release_if_stale(
        &self,
        key: &str,
        holder: JobId,
        cutoff: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let stale = match self.jobs.get_job(holder).await {
            Ok(job) => job.status.is_terminal() && job.updated_at < cutoff,
            Err(DbError::NotFound(_)) => true,
            Err(e) => return Err(e.into()),
        };
        if !stale {
            return Ok(false);
        }
        Ok(self.resources.release_resource(key, holder).await?)
    }
}
