//! Pipelines and status roll-up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobStatus;

/// Unique identifier for a pipeline. Ids grow in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u64);

impl PipelineId {
    /// Parse a pipeline ID, as produced by expanding a pipeline selector.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.trim().parse()?))
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pipeline groups jobs created from one configuration run.
///
/// Child pipelines (triggered by bridges) keep a pointer to their parent and
/// share the `root_id` of the family they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<PipelineId>,
    pub root_id: PipelineId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lock_version: u64,
}

impl Pipeline {
    /// Create a root pipeline.
    pub fn new(id: PipelineId) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent_id: None,
            root_id: id,
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            lock_version: 0,
        }
    }

    /// Create a child pipeline in the same family as `parent`.
    pub fn child_of(parent: &Pipeline, id: PipelineId) -> Self {
        Self {
            parent_id: Some(parent.id),
            root_id: parent.root_id,
            ..Self::new(id)
        }
    }

    pub fn is_same_family(&self, other: &Pipeline) -> bool {
        self.root_id == other.root_id
    }
}

/// Roll a set of job statuses up into a single status.
///
/// An empty set is `created` and `skipped` only wins when everything was
/// skipped. Callers pass the statuses of latest (non-retried) jobs.
pub fn composite_status<I>(statuses: I) -> JobStatus
where
    I: IntoIterator<Item = JobStatus>,
{
    let mut counts = [0usize; JobStatus::ALL.len()];
    let mut total = 0usize;
    for status in statuses {
        counts[status as usize] += 1;
        total += 1;
    }
    let count = |status: JobStatus| counts[status as usize];

    if total == 0 {
        return JobStatus::Created;
    }
    if count(JobStatus::Skipped) == total {
        return JobStatus::Skipped;
    }
    if count(JobStatus::Success) + count(JobStatus::Skipped) == total {
        return JobStatus::Success;
    }
    if count(JobStatus::Created) == total {
        return JobStatus::Created;
    }
    if count(JobStatus::Canceled) + count(JobStatus::Success) + count(JobStatus::Skipped) == total
    {
        return JobStatus::Canceled;
    }
    let finished = count(JobStatus::Success)
        + count(JobStatus::Failed)
        + count(JobStatus::Canceled)
        + count(JobStatus::Skipped);
    if finished == total {
        return JobStatus::Failed;
    }
    if count(JobStatus::Running) > 0 {
        return JobStatus::Running;
    }
    if count(JobStatus::Pending) > 0 {
        return JobStatus::Pending;
    }
    if count(JobStatus::Preparing) > 0 {
        return JobStatus::Preparing;
    }
    if count(JobStatus::WaitingForResource) > 0 {
        return JobStatus::WaitingForResource;
    }
    if count(JobStatus::Manual) > 0 {
        return JobStatus::Manual;
    }
    if count(JobStatus::Scheduled) > 0 {
        return JobStatus::Scheduled;
    }
    // A mix of created and finished jobs: the pipeline is still progressing.
    JobStatus::Running
}
