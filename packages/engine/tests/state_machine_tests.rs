mod common;

use chrono::{Duration, Utc};
use ci_core::{
    EngineConfig, EngineEvent, FailureReason, JobEvent, JobStatus, ProcessMode,
    TimeoutSource, TransitionError,
};
use common::{drain, engine, engine_with, insert, new_job, root_pipeline};
use engine::{EngineError, EngineResult, TransitionOutcome};
use futures_util::future::join_all;

#[tokio::test]
async fn enqueue_run_succeed() -> EngineResult<()> {
    let config = EngineConfig::default();
    let project_timeout = config.jobs.project_timeout_secs;
    let engine = engine_with(config).await?;
    let mut events = engine.outbox.subscribe();
    let pipeline = root_pipeline(&engine).await?;
    let job = insert(&engine, new_job(&engine, pipeline.id, "build").await?).await?;

    let outcome = engine.state_machine.enqueue(job.id).await?;
    assert_eq!(
        outcome.job().status,
        JobStatus::Pending,
        "no resource group and no prerequisites"
    );
    assert!(matches!(outcome, TransitionOutcome::Applied { from: JobStatus::Created, .. }));

    let running = engine.state_machine.run(job.id).await?.into_job();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());
    assert_eq!(running.timeout_secs, Some(project_timeout));
    assert_eq!(running.timeout_source, Some(TimeoutSource::ProjectTimeoutSource));

    let done = engine.state_machine.succeed(job.id).await?.into_job();
    assert_eq!(done.status, JobStatus::Success);
    assert!(done.finished_at.is_some());
    assert!(done.duration_secs.is_some_and(|secs| secs >= 0.0));
    assert_eq!(done.lock_version, 3);

    let changes: Vec<(JobStatus, JobStatus)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::JobStatusChanged {
                old_status,
                new_status,
                ..
            } => Some((old_status, new_status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec![
            (JobStatus::Created, JobStatus::Pending),
            (JobStatus::Pending, JobStatus::Running),
            (JobStatus::Running, JobStatus::Success),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn runner_timeout_applies_when_smaller() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let job = insert(
        &engine,
        new_job(&engine, pipeline.id, "build").await?.with_runner_timeout(120),
    )
    .await?;

    let running = engine.state_machine.run(job.id).await?.into_job();
    assert_eq!(running.timeout_secs, Some(120));
    assert_eq!(running.timeout_source, Some(TimeoutSource::RunnerTimeoutSource));
    Ok(())
}

#[tokio::test]
async fn invalid_events_are_rejected_without_writing() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let job = insert(&engine, new_job(&engine, pipeline.id, "lint").await?).await?;

    let err = engine.state_machine.enqueue_waiting_for_resource(job.id).await;
    assert!(matches!(
        err,
        Err(EngineError::InvalidTransition(TransitionError::InvalidTransition {
            from: JobStatus::Created,
            event: JobEvent::EnqueueWaitingForResource
        }))
    ));

    engine.state_machine.skip(job.id).await?;
    let err = engine.state_machine.skip(job.id).await;
    assert!(matches!(err, Err(EngineError::InvalidTransition(_))));

    let stored = engine.backends.jobs.get_job(job.id).await?;
    assert_eq!(stored.status, JobStatus::Skipped);
    assert_eq!(stored.lock_version, 1);
    Ok(())
}

#[tokio::test]
async fn manual_and_scheduled_jobs_can_be_enqueued() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let manual = insert(&engine, new_job(&engine, pipeline.id, "deploy").await?).await?;
    let delayed = insert(&engine, new_job(&engine, pipeline.id, "nightly").await?).await?;

    assert_eq!(
        engine.state_machine.actionize(manual.id).await?.job().status,
        JobStatus::Manual
    );
    assert_eq!(
        engine.state_machine.schedule(delayed.id).await?.job().status,
        JobStatus::Scheduled
    );
    assert_eq!(
        engine.state_machine.enqueue(manual.id).await?.job().status,
        JobStatus::Pending
    );
    assert_eq!(
        engine.state_machine.enqueue(delayed.id).await?.job().status,
        JobStatus::Pending
    );
    Ok(())
}

#[tokio::test]
async fn prerequisites_hold_jobs_in_preparing() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let job = insert(
        &engine,
        new_job(&engine, pipeline.id, "deploy")
            .await?
            .with_prerequisites(vec!["environment".into()]),
    )
    .await?;

    let preparing = engine.state_machine.enqueue(job.id).await?.into_job();
    assert_eq!(preparing.status, JobStatus::Preparing);
    assert!(matches!(
        engine.state_machine.enqueue_preparing(job.id).await,
        Err(EngineError::InvalidTransition(_))
    ));

    let mut provisioned = preparing;
    provisioned.prerequisites.clear();
    engine
        .backends
        .jobs
        .update_job_if_unchanged(&provisioned)
        .await?;

    let pending = engine.state_machine.enqueue_preparing(job.id).await?.into_job();
    assert_eq!(pending.status, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn resource_group_serializes_jobs() -> EngineResult<()> {
    let engine = engine().await?;
    let mut events = engine.outbox.subscribe();
    engine
        .coordinator
        .ensure_group("deploy-prod", ProcessMode::Unordered)
        .await?;
    let pipeline = root_pipeline(&engine).await?;
    let first = insert(
        &engine,
        new_job(&engine, pipeline.id, "deploy-a")
            .await?
            .with_resource_group("deploy-prod"),
    )
    .await?;
    let second = insert(
        &engine,
        new_job(&engine, pipeline.id, "deploy-b")
            .await?
            .with_resource_group("deploy-prod"),
    )
    .await?;

    for job in [&first, &second] {
        let waiting = engine.state_machine.enqueue(job.id).await?.into_job();
        assert_eq!(waiting.status, JobStatus::WaitingForResource);
        assert!(waiting.waiting_for_resource_at.is_some());
    }
    let requested = drain(&mut events)
        .iter()
        .filter(|event| matches!(event, EngineEvent::ResourceRequested { .. }))
        .count();
    assert_eq!(requested, 2);

    let pending = engine
        .state_machine
        .enqueue_waiting_for_resource(first.id)
        .await?;
    assert_eq!(pending.job().status, JobStatus::Pending);
    assert_eq!(
        engine.coordinator.current_holder("deploy-prod").await?,
        Some(first.id)
    );

    // The slot is taken: the second job stays queued and nothing is written.
    let halted = engine
        .state_machine
        .enqueue_waiting_for_resource(second.id)
        .await?;
    assert!(!halted.is_applied());
    assert_eq!(halted.job().status, JobStatus::WaitingForResource);
    assert_eq!(
        engine.backends.jobs.get_job(second.id).await?.lock_version,
        1
    );

    engine.state_machine.run(first.id).await?;
    drain(&mut events);
    engine.state_machine.succeed(first.id).await?;
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        EngineEvent::ResourceReleased { job_id, .. } if *job_id == first.id
    )));
    assert_eq!(engine.coordinator.current_holder("deploy-prod").await?, None);

    let pending = engine
        .state_machine
        .enqueue_waiting_for_resource(second.id)
        .await?;
    assert_eq!(pending.job().status, JobStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn canceling_releases_the_resource() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let job = insert(
        &engine,
        new_job(&engine, pipeline.id, "deploy")
            .await?
            .with_resource_group("staging"),
    )
    .await?;

    engine.state_machine.enqueue(job.id).await?;
    engine.state_machine.enqueue_waiting_for_resource(job.id).await?;
    engine.state_machine.run(job.id).await?;
    assert_eq!(engine.coordinator.current_holder("staging").await?, Some(job.id));

    engine.state_machine.cancel(job.id).await?;
    assert_eq!(engine.coordinator.current_holder("staging").await?, None);
    Ok(())
}

#[tokio::test]
async fn missing_dependencies_drop_and_retry_the_job() -> EngineResult<()> {
    let engine = engine().await?;
    let mut events = engine.outbox.subscribe();
    let pipeline = root_pipeline(&engine).await?;
    let build = insert(
        &engine,
        new_job(&engine, pipeline.id, "build")
            .await?
            .with_status(JobStatus::Success)
            .with_artifacts_expire_at(Utc::now() - Duration::hours(1)),
    )
    .await?;
    let test = insert(
        &engine,
        new_job(&engine, pipeline.id, "test")
            .await?
            .with_stage(1)
            .with_retries_max(1),
    )
    .await?;

    let err = engine.state_machine.run(test.id).await;
    assert!(matches!(
        err,
        Err(EngineError::MissingDependencies { job_id }) if job_id == test.id
    ));

    let failed = engine.backends.jobs.get_job(test.id).await?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.failure_reason,
        Some(FailureReason::MissingDependencyFailure)
    );
    assert!(failed.retried);

    let retry_id = drain(&mut events).into_iter().find_map(|event| match event {
        EngineEvent::JobRetried {
            job_id,
            retry_job_id,
            ..
        } if job_id == test.id => Some(retry_job_id),
        _ => None,
    });
    let Some(retry_id) = retry_id else {
        panic!("expected a JobRetried event");
    };
    let retry = engine.backends.jobs.get_job(retry_id).await?;
    assert_eq!(retry.status, JobStatus::Created);
    assert_eq!(retry.name, "test");
    assert_eq!(retry.retries_count, 1);
    assert!(retry.is_latest());
    assert_ne!(retry.id, build.id);

    // Out of retries: dropping the retry does not spawn another job.
    engine
        .state_machine
        .drop_job(retry.id, FailureReason::ScriptFailure)
        .await?;
    assert!(
        !drain(&mut events)
            .iter()
            .any(|event| matches!(event, EngineEvent::JobRetried { .. }))
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_events_apply_once() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let job = insert(&engine, new_job(&engine, pipeline.id, "build").await?).await?;
    engine.state_machine.enqueue(job.id).await?;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let state_machine = engine.state_machine.clone();
        tasks.push(tokio::spawn(async move { state_machine.cancel(job.id).await }));
    }

    let mut applied = 0;
    let mut rejected = 0;
    for result in join_all(tasks).await {
        match result {
            Ok(Ok(outcome)) if outcome.is_applied() => applied += 1,
            Ok(Err(EngineError::InvalidTransition(_))) => rejected += 1,
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!((applied, rejected), (1, 7));

    let stored = engine.backends.jobs.get_job(job.id).await?;
    assert_eq!(stored.status, JobStatus::Canceled);
    assert_eq!(stored.lock_version, 2);
    Ok(())
}

#[tokio::test]
async fn pipeline_status_follows_latest_jobs() -> EngineResult<()> {
    let engine = engine().await?;
    let mut events = engine.outbox.subscribe();
    let pipeline = root_pipeline(&engine).await?;
    let build = insert(&engine, new_job(&engine, pipeline.id, "build").await?).await?;
    let test = insert(
        &engine,
        new_job(&engine, pipeline.id, "test").await?.with_stage(1),
    )
    .await?;

    engine.state_machine.enqueue(build.id).await?;
    engine.state_machine.run(build.id).await?;
    assert_eq!(
        engine.pipeline_status.update_status(pipeline.id).await?,
        JobStatus::Running
    );

    engine.state_machine.succeed(build.id).await?;
    engine.state_machine.skip(test.id).await?;
    assert_eq!(
        engine.pipeline_status.update_status(pipeline.id).await?,
        JobStatus::Success
    );

    let stored = engine.backends.pipelines.get_pipeline(pipeline.id).await?;
    assert_eq!(stored.status, JobStatus::Success);
    assert!(stored.started_at.is_some());
    assert!(stored.finished_at.is_some());

    let rollups: Vec<JobStatus> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            EngineEvent::PipelineStatusChanged { new_status, .. } => Some(new_status),
            _ => None,
        })
        .collect();
    assert_eq!(rollups, vec![JobStatus::Running, JobStatus::Success]);
    Ok(())
}
