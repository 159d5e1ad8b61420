//! Moves trace chunks to the durable tier off the write path.

use ci_core::JobId;
use engine::Engine;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::TraceFlushMessage;

pub struct TraceFlushActor;

impl TraceFlushActor {
    async fn promote(engine: &Engine, job_id: JobId, chunk_index: u64) {
        match engine.traces.promote_to_durable(job_id, chunk_index).await {
            Ok(true) => tracing::debug!("Flushed trace chunk {} of job {}", chunk_index, job_id),
            Ok(false) => {}
            // Still being written to; the next ChunkFull or the archive retries.
            Err(e) => tracing::warn!(
                "Failed to flush trace chunk {} of job {}: {}",
                chunk_index,
                job_id,
                e
            ),
        }
    }
}

impl Actor for TraceFlushActor {
    type Msg = TraceFlushMessage;
    type State = Engine;
    type Arguments = Engine;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        engine: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting trace flush actor");
        Ok(engine)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        engine: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TraceFlushMessage::Promote {
                job_id,
                chunk_index,
            } => Self::promote(engine, job_id, chunk_index).await,

            TraceFlushMessage::Archive { job_id } => {
                if let Err(e) = engine.traces.archive(job_id).await {
                    tracing::warn!("Failed to archive trace of job {}: {}", job_id, e);
                }
            }

            TraceFlushMessage::Shutdown => {
                tracing::info!("Stopping trace flush actor");
                myself.stop(None);
            }
        }
        Ok(())
    }
}
