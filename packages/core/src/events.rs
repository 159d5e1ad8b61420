//! Outbox events emitted by lifecycle hooks for asynchronous follow-up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, PipelineId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A job's status changed.
    JobStatusChanged {
        job_id: JobId,
        pipeline_id: PipelineId,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: DateTime<Utc>,
    },
    /// A job entered `waiting_for_resource` and wants the group's slot.
    ResourceRequested {
        group_key: String,
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A job gave up its resource; the next candidate should be tried.
    ResourceReleased {
        group_key: String,
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// The stale sweep forced a resource free.
    StaleResourceReleased {
        group_key: String,
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A dropped job was retried as a new job.
    JobRetried {
        job_id: JobId,
        retry_job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A trace chunk reached capacity and should be promoted.
    ChunkFull {
        job_id: JobId,
        chunk_index: u64,
        timestamp: DateTime<Utc>,
    },
    /// The rolled-up status of a pipeline changed.
    PipelineStatusChanged {
        pipeline_id: PipelineId,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::JobStatusChanged { timestamp, .. }
            | EngineEvent::ResourceRequested { timestamp, .. }
            | EngineEvent::ResourceReleased { timestamp, .. }
            | EngineEvent::StaleResourceReleased { timestamp, .. }
            | EngineEvent::JobRetried { timestamp, .. }
            | EngineEvent::ChunkFull { timestamp, .. }
            | EngineEvent::PipelineStatusChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            EngineEvent::JobStatusChanged { job_id, .. }
            | EngineEvent::ResourceRequested { job_id, .. }
            | EngineEvent::ResourceReleased { job_id, .. }
            | EngineEvent::StaleResourceReleased { job_id, .. }
            | EngineEvent::JobRetried { job_id, .. }
            | EngineEvent::ChunkFull { job_id, .. } => Some(*job_id),
            EngineEvent::PipelineStatusChanged { .. } => None,
        }
    }

    /// Resource group the event concerns, if any.
    pub fn group_key(&self) -> Option<&str> {
        match self {
            EngineEvent::ResourceRequested { group_key, .. }
            | EngineEvent::ResourceReleased { group_key, .. }
            | EngineEvent::StaleResourceReleased { group_key, .. } => Some(group_key),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            EngineEvent::JobStatusChanged {
                job_id,
                old_status,
                new_status,
                ..
            } => format!("Job {} {} -> {}", job_id, old_status, new_status),
            EngineEvent::ResourceRequested {
                group_key, job_id, ..
            } => format!("Job {} requested resource '{}'", job_id, group_key),
            EngineEvent::ResourceReleased {
                group_key, job_id, ..
            } => format!("Job {} released resource '{}'", job_id, group_key),
            EngineEvent::StaleResourceReleased {
                group_key, job_id, ..
            } => format!("Stale resource '{}' taken from job {}", group_key, job_id),
            EngineEvent::JobRetried {
                job_id,
                retry_job_id,
                ..
            } => format!("Job {} retried as {}", job_id, retry_job_id),
            EngineEvent::ChunkFull {
                job_id,
                chunk_index,
                ..
            } => format!("Trace chunk {} of job {} is full", chunk_index, job_id),
            EngineEvent::PipelineStatusChanged {
                pipeline_id,
                new_status,
                ..
            } => format!("Pipeline {} -> {}", pipeline_id, new_status),
        }
    }
}
