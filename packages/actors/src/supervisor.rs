//! Supervisor actor: routes outbox events to the worker actors.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use ci_core::EngineEvent;
use engine::Engine;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::messages::{ActorError, ResourceGroupMessage, SupervisorMessage, TraceFlushMessage};
use crate::resource_group_actor::{ResourceGroupActor, ResourceGroupActorState};
use crate::trace_flush_actor::TraceFlushActor;

/// State for the supervisor actor.
pub struct SupervisorState {
    engine: Engine,
    /// Resource group actors by group key.
    groups: HashMap<String, ActorRef<ResourceGroupMessage>>,
    trace_flush: ActorRef<TraceFlushMessage>,
    /// Outbox reader and sweep ticker.
    tasks: Vec<JoinHandle<()>>,
}

impl SupervisorState {
    async fn group_actor(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        key: &str,
    ) -> Result<ActorRef<ResourceGroupMessage>, ActorProcessingErr> {
        if let Some(actor) = self.groups.get(key) {
            return Ok(actor.clone());
        }

        let (actor, _handle) = Actor::spawn_linked(
            None,
            ResourceGroupActor,
            ResourceGroupActorState::new(key, self.engine.clone()),
            myself.get_cell(),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn group actor: {}", e)))?;

        self.groups.insert(key.to_string(), actor.clone());
        Ok(actor)
    }

    async fn route(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        event: EngineEvent,
    ) -> Result<(), ActorProcessingErr> {
        match event {
            EngineEvent::ResourceRequested { group_key, .. }
            | EngineEvent::ResourceReleased { group_key, .. } => {
                let actor = self.group_actor(myself, &group_key).await?;
                actor.send_message(ResourceGroupMessage::AssignNext)?;
            }

            EngineEvent::ChunkFull {
                job_id,
                chunk_index,
                ..
            } => {
                self.trace_flush.send_message(TraceFlushMessage::Promote {
                    job_id,
                    chunk_index,
                })?;
            }

            EngineEvent::JobStatusChanged {
                job_id,
                pipeline_id,
                new_status,
                ..
            } => {
                if new_status.is_terminal() {
                    self.trace_flush
                        .send_message(TraceFlushMessage::Archive { job_id })?;
                }
                if let Err(e) = self.engine.pipeline_status.update_status(pipeline_id).await {
                    tracing::warn!("Failed to update status of pipeline {}: {}", pipeline_id, e);
                }
            }

            EngineEvent::StaleResourceReleased { .. }
            | EngineEvent::JobRetried { .. }
            | EngineEvent::PipelineStatusChanged { .. } => {
                tracing::debug!("{}", event.description());
            }
        }
        Ok(())
    }
}

/// Forward outbox events into the supervisor's mailbox.
fn forward_outbox(engine: &Engine, myself: ActorRef<SupervisorMessage>) -> JoinHandle<()> {
    let mut rx = engine.outbox.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if myself.send_message(SupervisorMessage::Event(event)).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Supervisor lagged behind the outbox by {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Periodically ask for a stale resource sweep.
fn sweep_ticker(every: Duration, myself: ActorRef<SupervisorMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if myself.send_message(SupervisorMessage::SweepStale).is_err() {
                break;
            }
        }
    })
}

/// Supervisor actor for the engine's background work.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = Engine;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        engine: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting engine supervisor");

        let (trace_flush, _handle) =
            Actor::spawn_linked(None, TraceFlushActor, engine.clone(), myself.get_cell())
                .await
                .map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to spawn trace flush actor: {}", e))
                })?;

        let sweep_every =
            Duration::from_secs(engine.config.resource_groups.sweep_interval_secs.max(1));
        let tasks = vec![
            forward_outbox(&engine, myself.clone()),
            sweep_ticker(sweep_every, myself.clone()),
        ];

        Ok(SupervisorState {
            engine,
            groups: HashMap::new(),
            trace_flush,
            tasks,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for task in &state.tasks {
            task.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Event(event) => {
                let description = event.description();
                if let Err(e) = state.route(&myself, event).await {
                    tracing::warn!("Failed to handle '{}': {}", description, e);
                }
            }

            SupervisorMessage::SweepStale => {
                if let Err(e) = state.engine.coordinator.release_stale(Utc::now()).await {
                    tracing::warn!("Stale resource sweep failed: {}", e);
                }
            }

            SupervisorMessage::ListGroups { reply } => {
                let mut keys: Vec<String> = state.groups.keys().cloned().collect();
                keys.sort();
                let _ = reply.send(keys);
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                for group in state.groups.values() {
                    let _ = group.send_message(ResourceGroupMessage::Shutdown);
                }
                let _ = state.trace_flush.send_message(TraceFlushMessage::Shutdown);
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!("Child actor {} stopped: {:?}", cell.get_id(), reason);
                state.groups.retain(|_, actor| actor.get_id() != cell.get_id());
            }
            SupervisionEvent::ActorFailed(cell, err) => {
                tracing::warn!("Child actor {} failed: {}", cell.get_id(), err);
                // A new group actor is spawned on the group's next event.
                state.groups.retain(|_, actor| actor.get_id() != cell.get_id());
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start the supervisor for `engine`.
pub async fn start_supervisor(
    engine: Engine,
) -> Result<(ActorRef<SupervisorMessage>, JoinHandle<()>), ActorError> {
    let (actor, handle) = Actor::spawn(None, Supervisor, engine).await?;
    Ok((actor, handle))
}

/// Bring the engine up from environment variables and start its supervisor.
///
/// Call once at process startup.
pub async fn start_from_env()
-> Result<(Engine, ActorRef<SupervisorMessage>, JoinHandle<()>), ActorError> {
    engine::logging::init_logging(None);
    tracing::info!("Initializing CI engine...");

    let engine = Engine::from_env().await?;
    let (supervisor, handle) = start_supervisor(engine.clone()).await?;

    tracing::info!("CI engine initialized");
    Ok((engine, supervisor, handle))
}
