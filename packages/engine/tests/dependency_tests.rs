mod common;

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use ci_core::{
    CrossDependency, Job, JobId, JobKind, JobStatus, Need, Variable, VariableSource,
};
use common::{child_pipeline, engine, insert, new_job, root_pipeline};
use engine::{Dependencies, Engine, EngineResult, ResolutionContext};

fn id_set(dependencies: &Dependencies) -> BTreeSet<JobId> {
    dependencies.ids().into_iter().collect()
}

async fn resolve(engine: &Engine, job: &Job) -> EngineResult<Dependencies> {
    engine
        .resolver
        .resolve(job, &mut ResolutionContext::new())
        .await
}

async fn valid(engine: &Engine, job: &Job) -> EngineResult<bool> {
    engine.resolver.valid(job, &mut ResolutionContext::new()).await
}

#[tokio::test]
async fn dag_jobs_depend_on_their_needs() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let a = insert(&engine, new_job(&engine, pipeline.id, "A").await?).await?;
    let b = insert(&engine, new_job(&engine, pipeline.id, "B").await?).await?;
    insert(&engine, new_job(&engine, pipeline.id, "C").await?).await?;
    insert(&engine, new_job(&engine, pipeline.id, "lint").await?).await?;

    let job = insert(
        &engine,
        new_job(&engine, pipeline.id, "test").await?.with_needs(vec![
            Need::new("A"),
            Need::new("B"),
            Need::without_artifacts("lint"),
        ]),
    )
    .await?;

    let dependencies = resolve(&engine, &job).await?;
    assert_eq!(id_set(&dependencies), BTreeSet::from([a.id, b.id]));
    assert!(dependencies.cross_pipeline.is_empty());
    assert!(dependencies.cross_project.is_empty());
    Ok(())
}

#[tokio::test]
async fn stage_jobs_depend_on_earlier_stages_only() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let build = insert(&engine, new_job(&engine, pipeline.id, "build").await?).await?;
    let test = insert(
        &engine,
        new_job(&engine, pipeline.id, "test").await?.with_stage(1),
    )
    .await?;
    insert(
        &engine,
        new_job(&engine, pipeline.id, "sibling").await?.with_stage(2),
    )
    .await?;
    insert(
        &engine,
        new_job(&engine, pipeline.id, "later").await?.with_stage(3),
    )
    .await?;
    let deploy = insert(
        &engine,
        new_job(&engine, pipeline.id, "deploy").await?.with_stage(2),
    )
    .await?;

    let dependencies = resolve(&engine, &deploy).await?;
    assert_eq!(id_set(&dependencies), BTreeSet::from([build.id, test.id]));
    Ok(())
}

#[tokio::test]
async fn successful_upstream_with_valid_artifacts_is_a_valid_dependency() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let j1 = insert(
        &engine,
        new_job(&engine, pipeline.id, "J1")
            .await?
            .with_status(JobStatus::Success)
            .with_artifacts_expire_at(Utc::now() + Duration::days(7)),
    )
    .await?;
    let j2 = insert(
        &engine,
        new_job(&engine, pipeline.id, "J2").await?.with_stage(1),
    )
    .await?;

    let dependencies = resolve(&engine, &j2).await?;
    assert_eq!(dependencies.ids(), vec![j1.id]);
    assert!(valid(&engine, &j2).await?);
    Ok(())
}

#[tokio::test]
async fn explicit_dependencies_filter_candidates() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let linux = insert(&engine, new_job(&engine, pipeline.id, "build:linux").await?).await?;
    insert(&engine, new_job(&engine, pipeline.id, "build:mac").await?).await?;

    let picky = insert(
        &engine,
        new_job(&engine, pipeline.id, "package")
            .await?
            .with_stage(1)
            .with_dependencies(vec!["build:linux".into()]),
    )
    .await?;
    assert_eq!(resolve(&engine, &picky).await?.ids(), vec![linux.id]);

    let none = insert(
        &engine,
        new_job(&engine, pipeline.id, "docs")
            .await?
            .with_stage(1)
            .with_dependencies(Vec::new()),
    )
    .await?;
    assert!(resolve(&engine, &none).await?.all().is_empty());
    Ok(())
}

#[tokio::test]
async fn retried_jobs_and_bridges_are_not_dependencies() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let mut old = new_job(&engine, pipeline.id, "build").await?;
    old.retried = true;
    insert(&engine, old).await?;
    let retry = insert(&engine, new_job(&engine, pipeline.id, "build").await?).await?;
    insert(
        &engine,
        new_job(&engine, pipeline.id, "trigger")
            .await?
            .with_kind(JobKind::Bridge),
    )
    .await?;

    let job = insert(
        &engine,
        new_job(&engine, pipeline.id, "test").await?.with_stage(1),
    )
    .await?;
    assert_eq!(resolve(&engine, &job).await?.ids(), vec![retry.id]);
    Ok(())
}

#[tokio::test]
async fn erased_artifacts_invalidate_the_job() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let mut build = new_job(&engine, pipeline.id, "build")
        .await?
        .with_status(JobStatus::Success);
    build.erased_at = Some(Utc::now());
    insert(&engine, build).await?;

    let test = insert(
        &engine,
        new_job(&engine, pipeline.id, "test").await?.with_stage(1),
    )
    .await?;
    assert!(!valid(&engine, &test).await?);
    Ok(())
}

/// A parent pipeline with a successful `build`, and a child pipeline.
async fn family(engine: &Engine) -> EngineResult<(Job, ci_core::Pipeline)> {
    let parent = root_pipeline(engine).await?;
    let build = insert(
        engine,
        new_job(engine, parent.id, "build")
            .await?
            .with_status(JobStatus::Success),
    )
    .await?;
    insert(engine, new_job(engine, parent.id, "lint").await?.with_status(JobStatus::Success))
        .await?;
    let child = child_pipeline(engine, &parent).await?;
    Ok((build, child))
}

#[tokio::test]
async fn cross_pipeline_dependencies_resolve_within_the_family() -> EngineResult<()> {
    let engine = engine().await?;
    let (build, child) = family(&engine).await?;

    let job = insert(
        &engine,
        new_job(&engine, child.id, "test")
            .await?
            .with_variables(vec![
                Variable::new("UPSTREAM_PIPELINE", build.pipeline_id.to_string()),
                Variable::new("UPSTREAM_JOB", "build"),
            ])
            .with_cross_dependencies(vec![CrossDependency::new(
                "$UPSTREAM_PIPELINE",
                "${UPSTREAM_JOB}",
            )]),
    )
    .await?;

    let dependencies = resolve(&engine, &job).await?;
    assert_eq!(
        dependencies
            .cross_pipeline
            .iter()
            .map(|job| job.id)
            .collect::<Vec<_>>(),
        vec![build.id]
    );
    assert!(dependencies.valid_cross_pipeline());
    assert!(valid(&engine, &job).await?);
    Ok(())
}

#[tokio::test]
async fn cross_pipeline_spec_pointing_at_own_pipeline_is_dropped() -> EngineResult<()> {
    let engine = engine().await?;
    let (_, child) = family(&engine).await?;
    insert(
        &engine,
        new_job(&engine, child.id, "build")
            .await?
            .with_status(JobStatus::Success),
    )
    .await?;

    let job = insert(
        &engine,
        new_job(&engine, child.id, "test")
            .await?
            .with_stage(1)
            .with_dependencies(Vec::new())
            .with_cross_dependencies(vec![CrossDependency::new("$CI_PIPELINE_ID", "build")]),
    )
    .await?;

    let dependencies = resolve(&engine, &job).await?;
    assert!(dependencies.cross_pipeline.is_empty());
    assert!(!valid(&engine, &job).await?);
    Ok(())
}

#[tokio::test]
async fn cross_pipeline_ignores_dependency_variables_and_foreign_pipelines() -> EngineResult<()> {
    let engine = engine().await?;
    let (build, child) = family(&engine).await?;
    let stranger = root_pipeline(&engine).await?;
    insert(
        &engine,
        new_job(&engine, stranger.id, "build")
            .await?
            .with_status(JobStatus::Success),
    )
    .await?;

    let from_dotenv = insert(
        &engine,
        new_job(&engine, child.id, "test")
            .await?
            .with_variables(vec![
                Variable::new("UPSTREAM", build.pipeline_id.to_string())
                    .with_source(VariableSource::Dependency),
            ])
            .with_cross_dependencies(vec![CrossDependency::new("$UPSTREAM", "build")]),
    )
    .await?;
    assert!(resolve(&engine, &from_dotenv).await?.cross_pipeline.is_empty());
    assert!(!valid(&engine, &from_dotenv).await?);

    let foreign = insert(
        &engine,
        new_job(&engine, child.id, "test-foreign")
            .await?
            .with_cross_dependencies(vec![CrossDependency::new(
                stranger.id.to_string(),
                "build",
            )]),
    )
    .await?;
    assert!(resolve(&engine, &foreign).await?.cross_pipeline.is_empty());

    let mut unspecified = CrossDependency::new(build.pipeline_id.to_string(), "build");
    unspecified.artifacts = false;
    let without_artifacts = insert(
        &engine,
        new_job(&engine, child.id, "test-plain")
            .await?
            .with_cross_dependencies(vec![unspecified]),
    )
    .await?;
    assert!(valid(&engine, &without_artifacts).await?);
    Ok(())
}

#[tokio::test]
async fn resolution_is_memoized_per_context() -> EngineResult<()> {
    let engine = engine().await?;
    let pipeline = root_pipeline(&engine).await?;
    let build = insert(&engine, new_job(&engine, pipeline.id, "build").await?).await?;
    let test = insert(
        &engine,
        new_job(&engine, pipeline.id, "test").await?.with_stage(1),
    )
    .await?;

    let mut ctx = ResolutionContext::new();
    let first = engine.resolver.resolve(&test, &mut ctx).await?;
    assert_eq!(first.ids(), vec![build.id]);

    // A job added afterwards is not seen through the same context.
    insert(&engine, new_job(&engine, pipeline.id, "build:arm").await?).await?;
    assert_eq!(engine.resolver.resolve(&test, &mut ctx).await?, first);
    assert_eq!(resolve(&engine, &test).await?.ids().len(), 2);
    Ok(())
}
