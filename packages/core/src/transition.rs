//! The job lifecycle as an explicit transition table.
//!
//! Hooks (resource assignment, dependency checks, timestamps, outbox events)
//! live in the engine; this module only answers "where does this event take a
//! job in this state".

use serde::{Deserialize, Serialize};

use crate::{Job, JobStatus};

/// Events that move a job between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    Enqueue,
    EnqueueWaitingForResource,
    EnqueuePreparing,
    Run,
    Succeed,
    Drop,
    Cancel,
    Skip,
    Actionize,
    Schedule,
}

impl JobEvent {
    pub const ALL: [JobEvent; 10] = [
        JobEvent::Enqueue,
        JobEvent::EnqueueWaitingForResource,
        JobEvent::EnqueuePreparing,
        JobEvent::Run,
        JobEvent::Succeed,
        JobEvent::Drop,
        JobEvent::Cancel,
        JobEvent::Skip,
        JobEvent::Actionize,
        JobEvent::Schedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Enqueue => "enqueue",
            JobEvent::EnqueueWaitingForResource => "enqueue_waiting_for_resource",
            JobEvent::EnqueuePreparing => "enqueue_preparing",
            JobEvent::Run => "run",
            JobEvent::Succeed => "succeed",
            JobEvent::Drop => "drop",
            JobEvent::Cancel => "cancel",
            JobEvent::Skip => "skip",
            JobEvent::Actionize => "actionize",
            JobEvent::Schedule => "schedule",
        }
    }
}

impl std::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job facts the table branches on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guards {
    pub has_resource_group: bool,
    pub has_unmet_prerequisites: bool,
}

impl Guards {
    pub fn for_job(job: &Job) -> Self {
        Self {
            has_resource_group: job.has_resource_group(),
            has_unmet_prerequisites: job.has_unmet_prerequisites(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {event} a job that is {from}")]
    InvalidTransition { from: JobStatus, event: JobEvent },
}

/// Resolve the target status of `event` fired on a job in `from`.
pub fn next_status(
    from: JobStatus,
    event: JobEvent,
    guards: Guards,
) -> Result<JobStatus, TransitionError> {
    use JobStatus::*;

    let invalid = || TransitionError::InvalidTransition { from, event };
    let after_waiting = if guards.has_unmet_prerequisites {
        Preparing
    } else {
        Pending
    };

    match event {
        JobEvent::Enqueue => match from {
            Created | Skipped | Manual | Scheduled if guards.has_resource_group => {
                Ok(WaitingForResource)
            }
            Created | Skipped | Manual | Scheduled => Ok(after_waiting),
            _ => Err(invalid()),
        },
        JobEvent::EnqueueWaitingForResource => match from {
            WaitingForResource => Ok(after_waiting),
            _ => Err(invalid()),
        },
        JobEvent::EnqueuePreparing => match from {
            Preparing if !guards.has_unmet_prerequisites => Ok(Pending),
            _ => Err(invalid()),
        },
        JobEvent::Run => unless_already(from, Running).ok_or_else(invalid),
        JobEvent::Succeed => unless_already(from, Success).ok_or_else(invalid),
        JobEvent::Drop => unless_already(from, Failed).ok_or_else(invalid),
        JobEvent::Cancel => unless_already(from, Canceled).ok_or_else(invalid),
        JobEvent::Skip => unless_already(from, Skipped).ok_or_else(invalid),
        JobEvent::Actionize => match from {
            Created => Ok(Manual),
            _ => Err(invalid()),
        },
        JobEvent::Schedule => match from {
            Created => Ok(Scheduled),
            _ => Err(invalid()),
        },
    }
}

fn unless_already(from: JobStatus, to: JobStatus) -> Option<JobStatus> {
    (from != to).then_some(to)
}
