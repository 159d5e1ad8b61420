#![allow(dead_code)]

use ci_core::{EngineConfig, EngineEvent, Job, Pipeline, PipelineId};
use engine::{Engine, EngineResult};
use tokio::sync::broadcast::Receiver;

pub async fn engine() -> EngineResult<Engine> {
    engine_with(EngineConfig::default()).await
}

pub async fn engine_with(config: EngineConfig) -> EngineResult<Engine> {
    engine::logging::init_logging(Some("warn"));
    Engine::in_memory(config).await
}

/// Insert a root pipeline.
pub async fn root_pipeline(engine: &Engine) -> EngineResult<Pipeline> {
    let id = engine.backends.pipelines.next_pipeline_id().await?;
    Ok(engine
        .backends
        .pipelines
        .insert_pipeline(&Pipeline::new(id))
        .await?)
}

pub async fn child_pipeline(engine: &Engine, parent: &Pipeline) -> EngineResult<Pipeline> {
    let id = engine.backends.pipelines.next_pipeline_id().await?;
    Ok(engine
        .backends
        .pipelines
        .insert_pipeline(&Pipeline::child_of(parent, id))
        .await?)
}

/// A fresh job with the next free id; customize it before [`insert`].
pub async fn new_job(engine: &Engine, pipeline_id: PipelineId, name: &str) -> EngineResult<Job> {
    let id = engine.backends.jobs.next_job_id().await?;
    Ok(Job::new(id, pipeline_id, name))
}

pub async fn insert(engine: &Engine, job: Job) -> EngineResult<Job> {
    Ok(engine.backends.jobs.insert_job(&job).await?)
}

/// Everything published on the outbox since the last drain.
pub fn drain(rx: &mut Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
