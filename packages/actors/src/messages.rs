//! Message types for actor communication.

use ci_core::{EngineEvent, JobId};
use ractor::RpcReplyPort;

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// An event read from the engine outbox.
    Event(EngineEvent),

    /// Run the stale resource sweep now.
    SweepStale,

    /// Keys of the resource groups that have an actor.
    ListGroups { reply: RpcReplyPort<Vec<String>> },

    /// Stop all children, then the supervisor.
    Shutdown,
}

/// Messages for a ResourceGroupActor.
#[derive(Debug)]
pub enum ResourceGroupMessage {
    /// Offer the free resource to the next upcoming jobs.
    AssignNext,

    /// Like `AssignNext`, replying with the jobs that moved on.
    AssignNextWithReply { reply: RpcReplyPort<Vec<JobId>> },

    Shutdown,
}

/// Messages for the TraceFlushActor.
#[derive(Debug)]
pub enum TraceFlushMessage {
    /// Move a full chunk to the durable tier.
    Promote { job_id: JobId, chunk_index: u64 },

    /// Flush every remaining chunk of a finished job.
    Archive { job_id: JobId },

    Shutdown,
}

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error("Failed to spawn actor: {0}")]
    Spawn(#[from] ractor::SpawnErr),
}
