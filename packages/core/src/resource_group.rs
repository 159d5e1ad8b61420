//! Resource groups: named single-slot locks shared by jobs across pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId, JobStatus};

/// Order in which waiting jobs are offered a freed resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Any job already waiting for the resource.
    #[default]
    Unordered,
    /// Jobs of older pipelines first, including ones not yet waiting.
    OldestFirst,
    /// Jobs of newer pipelines first, including ones not yet waiting.
    NewestFirst,
}

impl ProcessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMode::Unordered => "unordered",
            ProcessMode::OldestFirst => "oldest_first",
            ProcessMode::NewestFirst => "newest_first",
        }
    }

    /// Statuses a job may have to appear among the upcoming candidates.
    pub fn candidate_statuses(&self) -> &'static [JobStatus] {
        match self {
            ProcessMode::Unordered => &[JobStatus::WaitingForResource],
            ProcessMode::OldestFirst | ProcessMode::NewestFirst => &[
                JobStatus::Created,
                JobStatus::Scheduled,
                JobStatus::WaitingForResource,
            ],
        }
    }

    /// Filter and order candidate jobs for assignment.
    ///
    /// Ordered modes sort by pipeline id, then put `waiting_for_resource`
    /// ahead of other upcoming statuses, then by job id.
    pub fn order_upcoming(&self, jobs: Vec<Job>) -> Vec<Job> {
        let statuses = self.candidate_statuses();
        let mut upcoming: Vec<Job> = jobs
            .into_iter()
            .filter(|job| statuses.contains(&job.status))
            .collect();

        let waiting_rank = |job: &Job| u8::from(job.status != JobStatus::WaitingForResource);
        match self {
            ProcessMode::Unordered => upcoming.sort_by_key(|job| job.id),
            ProcessMode::OldestFirst => {
                upcoming.sort_by_key(|job| (job.pipeline_id, waiting_rank(job), job.id))
            }
            ProcessMode::NewestFirst => upcoming.sort_by_key(|job| {
                (
                    std::cmp::Reverse(job.pipeline_id),
                    waiting_rank(job),
                    job.id,
                )
            }),
        }
        upcoming
    }
}

impl std::fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named group with exactly one resource slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub key: String,
    #[serde(default)]
    pub process_mode: ProcessMode,
    pub created_at: DateTime<Utc>,
}

impl ResourceGroup {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            process_mode: ProcessMode::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_process_mode(mut self, mode: ProcessMode) -> Self {
        self.process_mode = mode;
        self
    }
}

/// The slot of a resource group, optionally retained by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub group_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained_by: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn free(group_key: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            retained_by: None,
            retained_at: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.retained_by.is_none()
    }
}
