use std::future::Future;
use std::time::Duration;

use actors::{
    Actor, ResourceGroupActor, ResourceGroupActorState, ResourceGroupMessage, SupervisorMessage,
    start_supervisor,
};
use chrono::Utc;
use ci_core::{EngineConfig, Job, JobId, JobStatus, Pipeline, PipelineId, ProcessMode};
use engine::{Engine, EngineResult};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> EngineResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<bool>>,
{
    for _ in 0..200 {
        if check().await? {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(false)
}

async fn status_of(engine: &Engine, id: JobId) -> EngineResult<JobStatus> {
    Ok(engine.backends.jobs.get_job(id).await?.status)
}

async fn setup(config: EngineConfig) -> EngineResult<(Engine, PipelineId)> {
    engine::logging::init_logging(Some("warn"));
    let engine = Engine::in_memory(config).await?;
    let id = engine.backends.pipelines.next_pipeline_id().await?;
    engine
        .backends
        .pipelines
        .insert_pipeline(&Pipeline::new(id))
        .await?;
    Ok((engine, id))
}

async fn grouped_job(
    engine: &Engine,
    pipeline_id: PipelineId,
    name: &str,
    group: &str,
) -> EngineResult<Job> {
    let id = engine.backends.jobs.next_job_id().await?;
    let job = Job::new(id, pipeline_id, name).with_resource_group(group);
    Ok(engine.backends.jobs.insert_job(&job).await?)
}

#[tokio::test]
async fn group_actor_hands_the_resource_on() -> TestResult {
    let (engine, pipeline_id) = setup(EngineConfig::default()).await?;
    engine
        .coordinator
        .ensure_group("deploy-prod", ProcessMode::Unordered)
        .await?;
    let first = grouped_job(&engine, pipeline_id, "deploy-a", "deploy-prod").await?;
    let second = grouped_job(&engine, pipeline_id, "deploy-b", "deploy-prod").await?;

    let (supervisor, handle) = start_supervisor(engine.clone()).await?;

    engine.state_machine.enqueue(first.id).await?;
    assert!(
        eventually(|| async { Ok(status_of(&engine, first.id).await? == JobStatus::Pending) })
            .await?
    );

    engine.state_machine.enqueue(second.id).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        status_of(&engine, second.id).await?,
        JobStatus::WaitingForResource
    );

    let groups = ractor::call!(supervisor, |reply| SupervisorMessage::ListGroups { reply })?;
    assert_eq!(groups, vec!["deploy-prod".to_string()]);

    engine.state_machine.run(first.id).await?;
    engine.state_machine.succeed(first.id).await?;
    assert!(
        eventually(|| async { Ok(status_of(&engine, second.id).await? == JobStatus::Pending) })
            .await?
    );
    assert_eq!(
        engine.coordinator.current_holder("deploy-prod").await?,
        Some(second.id)
    );

    supervisor.send_message(SupervisorMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn full_chunks_and_finished_traces_are_flushed() -> TestResult {
    let (engine, pipeline_id) = setup(EngineConfig::default().with_chunk_size(4)).await?;
    let id = engine.backends.jobs.next_job_id().await?;
    let job = engine
        .backends
        .jobs
        .insert_job(&Job::new(id, pipeline_id, "build"))
        .await?;

    let (supervisor, handle) = start_supervisor(engine.clone()).await?;

    engine.state_machine.enqueue(job.id).await?;
    engine.state_machine.run(job.id).await?;
    engine.traces.append_log(job.id, b"abcdef").await?;

    let first_flushed = || async {
        Ok(engine
            .backends
            .chunks
            .find_chunk(job.id, 0)
            .await?
            .is_some_and(|chunk| chunk.is_flushed()))
    };
    assert!(eventually(first_flushed).await?);

    engine.state_machine.succeed(job.id).await?;
    let all_flushed = || async {
        let chunks = engine.backends.chunks.chunks_for_job(job.id).await?;
        Ok(chunks.len() == 2 && chunks.iter().all(|chunk| chunk.is_flushed()))
    };
    assert!(eventually(all_flushed).await?);
    assert_eq!(engine.traces.read_log(job.id).await?.as_ref(), b"abcdef");

    let pipeline_done = || async {
        Ok(engine.backends.pipelines.get_pipeline(pipeline_id).await?.status == JobStatus::Success)
    };
    assert!(eventually(pipeline_done).await?);

    supervisor.send_message(SupervisorMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn sweep_frees_resources_of_long_finished_jobs() -> TestResult {
    let (engine, pipeline_id) = setup(EngineConfig::default().with_stale_threshold(0)).await?;
    let holder = grouped_job(&engine, pipeline_id, "deploy", "staging").await?;
    assert!(engine.coordinator.assign(&holder).await?);

    let mut finished = engine.backends.jobs.get_job(holder.id).await?;
    finished.status = JobStatus::Canceled;
    finished.updated_at = Utc::now() - chrono::Duration::seconds(5);
    engine.backends.jobs.update_job_if_unchanged(&finished).await?;

    let (supervisor, handle) = start_supervisor(engine.clone()).await?;
    supervisor.send_message(SupervisorMessage::SweepStale)?;

    assert!(
        eventually(|| async { Ok(engine.coordinator.current_holder("staging").await?.is_none()) })
            .await?
    );

    supervisor.send_message(SupervisorMessage::Shutdown)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn group_actor_reports_which_jobs_moved_on() -> TestResult {
    let (engine, pipeline_id) = setup(EngineConfig::default()).await?;
    engine
        .coordinator
        .ensure_group("review-apps", ProcessMode::OldestFirst)
        .await?;
    let first = grouped_job(&engine, pipeline_id, "review-a", "review-apps").await?;
    let second = grouped_job(&engine, pipeline_id, "review-b", "review-apps").await?;
    engine.state_machine.enqueue(first.id).await?;
    engine.state_machine.enqueue(second.id).await?;

    let (actor, handle) = Actor::spawn(
        None,
        ResourceGroupActor,
        ResourceGroupActorState::new("review-apps", engine.clone()),
    )
    .await?;

    let assigned = ractor::call!(actor, |reply| ResourceGroupMessage::AssignNextWithReply {
        reply
    })?;
    assert_eq!(assigned, vec![first.id]);
    assert_eq!(status_of(&engine, first.id).await?, JobStatus::Pending);

    let assigned = ractor::call!(actor, |reply| ResourceGroupMessage::AssignNextWithReply {
        reply
    })?;
    assert!(assigned.is_empty());
    assert_eq!(
        status_of(&engine, second.id).await?,
        JobStatus::WaitingForResource
    );

    actor.send_message(ResourceGroupMessage::Shutdown)?;
    handle.await?;
    Ok(())
}
