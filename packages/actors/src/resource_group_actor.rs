//! One actor per resource group: hands a freed resource to the next job.

use ci_core::{JobId, JobStatus};
use engine::{Engine, EngineError, EngineResult};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::ResourceGroupMessage;

pub struct ResourceGroupActorState {
    key: String,
    engine: Engine,
}

impl ResourceGroupActorState {
    pub fn new(key: impl Into<String>, engine: Engine) -> Self {
        Self {
            key: key.into(),
            engine,
        }
    }

    /// Fire `enqueue_waiting_for_resource` on as many upcoming jobs as there
    /// are free slots. Returns the jobs that left the waiting state.
    async fn assign_next(&self) -> EngineResult<Vec<JobId>> {
        let coordinator = &self.engine.coordinator;
        let free = coordinator.free_resources(&self.key).await?;
        if free == 0 {
            return Ok(Vec::new());
        }

        let upcoming = coordinator.upcoming_processables(&self.key).await?;
        let mut assigned = Vec::new();
        for job in upcoming.into_iter().take(free) {
            match self
                .engine
                .state_machine
                .enqueue_waiting_for_resource(job.id)
                .await
            {
                Ok(outcome) if outcome.job().status != JobStatus::WaitingForResource => {
                    assigned.push(job.id);
                }
                Ok(_) => {}
                // Ordered modes keep the slot for an older job that is not
                // waiting yet.
                Err(EngineError::InvalidTransition(e)) => {
                    tracing::debug!("Resource group '{}': job {} {}", self.key, job.id, e);
                }
                Err(e) => return Err(e),
            }
        }

        if !assigned.is_empty() {
            tracing::info!("Resource group '{}' assigned to {:?}", self.key, assigned);
        }
        Ok(assigned)
    }
}

pub struct ResourceGroupActor;

impl Actor for ResourceGroupActor {
    type Msg = ResourceGroupMessage;
    type State = ResourceGroupActorState;
    type Arguments = ResourceGroupActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting resource group actor: {}", args.key);
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ResourceGroupMessage::AssignNext => {
                if let Err(e) = state.assign_next().await {
                    tracing::warn!("Resource group '{}' failed to assign: {}", state.key, e);
                }
            }

            ResourceGroupMessage::AssignNextWithReply { reply } => {
                let assigned = state.assign_next().await.unwrap_or_else(|e| {
                    tracing::warn!("Resource group '{}' failed to assign: {}", state.key, e);
                    Vec::new()
                });
                let _ = reply.send(assigned);
            }

            ResourceGroupMessage::Shutdown => {
                tracing::info!("Stopping resource group actor: {}", state.key);
                myself.stop(None);
            }
        }
        Ok(())
    }
}
