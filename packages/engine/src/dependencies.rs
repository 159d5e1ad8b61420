//! Which upstream jobs' artifacts a job may consume.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ci_core::{Job, JobId, PipelineId, SchedulingMode, VariableSource};
use db::{JobStore, PipelineStore};

use crate::{ArtifactStore, EngineResult, VariableExpander};

/// A job's resolved dependencies, grouped by where they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependencies {
    /// Latest builds of the job's own pipeline.
    pub local: Vec<Job>,
    /// Latest successful builds of other pipelines in the same family.
    pub cross_pipeline: Vec<Job>,
    /// Always empty; kept so callers can treat every source alike.
    pub cross_project: Vec<Job>,
    /// Cross-pipeline specs that requested artifacts from a named pipeline.
    specified_cross_pipeline: usize,
}

impl Dependencies {
    /// Every dependency, without duplicates, in source order.
    pub fn all(&self) -> Vec<&Job> {
        let mut seen = HashSet::new();
        self.local
            .iter()
            .chain(&self.cross_pipeline)
            .chain(&self.cross_project)
            .filter(|job| seen.insert(job.id))
            .collect()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.all().into_iter().map(|job| job.id).collect()
    }

    /// Every specified cross-pipeline dependency was found.
    pub fn valid_cross_pipeline(&self) -> bool {
        self.cross_pipeline.len() == self.specified_cross_pipeline
    }
}

/// Memoizes resolution results for the duration of one operation.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    resolved: HashMap<JobId, Dependencies>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: JobId) -> Option<&Dependencies> {
        self.resolved.get(&job_id)
    }
}

/// A cross-pipeline spec after template expansion.
struct ExpandedSpec {
    pipeline: PipelineId,
    job: String,
}

pub struct DependencyResolver {
    jobs: Arc<dyn JobStore>,
    pipelines: Arc<dyn PipelineStore>,
    artifacts: Arc<dyn ArtifactStore>,
    expander: Arc<dyn VariableExpander>,
}

impl DependencyResolver {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pipelines: Arc<dyn PipelineStore>,
        artifacts: Arc<dyn ArtifactStore>,
        expander: Arc<dyn VariableExpander>,
    ) -> Self {
        Self {
            jobs,
            pipelines,
            artifacts,
            expander,
        }
    }

    /// Resolve `job`'s dependencies, reusing a result cached in `ctx`.
    pub async fn resolve(
        &self,
        job: &Job,
        ctx: &mut ResolutionContext,
    ) -> EngineResult<Dependencies> {
        if let Some(cached) = ctx.get(job.id) {
            return Ok(cached.clone());
        }

        let specified = job
            .cross_dependencies
            .iter()
            .filter(|spec| spec.is_specified())
            .count();
        let dependencies = Dependencies {
            local: self.local(job).await?,
            cross_pipeline: self.cross_pipeline(job).await?,
            cross_project: Vec::new(),
            specified_cross_pipeline: specified,
        };

        ctx.resolved.insert(job.id, dependencies.clone());
        Ok(dependencies)
    }

    /// Whether `job` may run with the artifacts its dependencies provide.
    pub async fn valid(&self, job: &Job, ctx: &mut ResolutionContext) -> EngineResult<bool> {
        let dependencies = self.resolve(job, ctx).await?;

        for dependency in &dependencies.local {
            if !self.artifacts.valid(dependency).await {
                tracing::info!(
                    "Job {} depends on job {} whose artifacts are unavailable",
                    job.id,
                    dependency.id
                );
                return Ok(false);
            }
        }

        if !dependencies.valid_cross_pipeline() {
            tracing::info!(
                "Job {} found {} of {} cross-pipeline dependencies",
                job.id,
                dependencies.cross_pipeline.len(),
                dependencies.specified_cross_pipeline
            );
            return Ok(false);
        }

        Ok(true)
    }

    async fn local(&self, job: &Job) -> EngineResult<Vec<Job>> {
        if job.dependencies.as_ref().is_some_and(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let candidates = self
            .jobs
            .jobs_in_pipeline(job.pipeline_id)
            .await?
            .into_iter()
            .filter(|other| other.id != job.id && other.is_latest())
            .filter(|other| other.kind.produces_artifacts());

        let mut local: Vec<Job> = match job.scheduling_mode {
            SchedulingMode::Dag => {
                let needed = job.artifact_need_names();
                candidates
                    .filter(|other| needed.contains(&other.name.as_str()))
                    .collect()
            }
            SchedulingMode::Stage => candidates
                .filter(|other| other.stage_idx < job.stage_idx)
                .collect(),
        };

        if let Some(names) = &job.dependencies {
            local.retain(|other| names.contains(&other.name));
        }
        Ok(local)
    }

    async fn cross_pipeline(&self, job: &Job) -> EngineResult<Vec<Job>> {
        let specs = self.expanded_specs(job);
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        let pipeline = self.pipelines.get_pipeline(job.pipeline_id).await?;
        let family: HashSet<PipelineId> = self
            .pipelines
            .family_pipeline_ids(pipeline.root_id)
            .await?
            .into_iter()
            .collect();

        let mut pipeline_ids: Vec<PipelineId> = specs
            .iter()
            .map(|spec| spec.pipeline)
            .filter(|id| family.contains(id))
            .collect();
        pipeline_ids.sort();
        pipeline_ids.dedup();
        if pipeline_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = specs.iter().map(|spec| spec.job.clone()).collect();
        names.sort();
        names.dedup();

        let found = self
            .jobs
            .latest_successful_jobs(&pipeline_ids, &names)
            .await?;

        Ok(found
            .into_iter()
            .filter(|other| other.kind.produces_artifacts())
            .filter(|other| {
                specs
                    .iter()
                    .any(|spec| spec.pipeline == other.pipeline_id && spec.job == other.name)
            })
            .collect())
    }

    /// Expand specified cross-pipeline specs, dropping references to the
    /// job's own pipeline and pipelines that are not valid ids.
    fn expanded_specs(&self, job: &Job) -> Vec<ExpandedSpec> {
        let specified: Vec<_> = job
            .cross_dependencies
            .iter()
            .filter(|spec| spec.is_specified())
            .collect();
        if specified.is_empty() {
            return Vec::new();
        }

        let scope = expansion_scope(job);
        specified
            .into_iter()
            .filter_map(|spec| {
                let template = spec.pipeline.as_deref().unwrap_or_default();
                let pipeline = PipelineId::parse(&self.expander.expand(template, &scope)).ok()?;
                if pipeline == job.pipeline_id {
                    return None;
                }
                Some(ExpandedSpec {
                    pipeline,
                    job: self.expander.expand(&spec.job, &scope),
                })
            })
            .collect()
    }
}

/// Predefined variables, then the job's own variables except those exported
/// by dependencies. Later entries win.
fn expansion_scope(job: &Job) -> HashMap<String, String> {
    let mut scope = HashMap::from([
        ("CI_PIPELINE_ID".to_string(), job.pipeline_id.to_string()),
        ("CI_JOB_ID".to_string(), job.id.to_string()),
        ("CI_JOB_NAME".to_string(), job.name.clone()),
    ]);
    for variable in &job.variables {
        if variable.source != VariableSource::Dependency {
            scope.insert(variable.key.clone(), variable.value.clone());
        }
    }
    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci_core::Variable;

    #[test]
    fn dependency_variables_are_not_in_scope() {
        let job = Job::new(JobId(9), PipelineId(3), "deploy").with_variables(vec![
            Variable::new("UPSTREAM", "1"),
            Variable::new("LEAKED", "2").with_source(VariableSource::Dependency),
        ]);
        let scope = expansion_scope(&job);
        assert_eq!(scope.get("UPSTREAM").map(String::as_str), Some("1"));
        assert_eq!(scope.get("CI_PIPELINE_ID").map(String::as_str), Some("3"));
        assert_eq!(scope.get("CI_JOB_NAME").map(String::as_str), Some("deploy"));
        assert!(!scope.contains_key("LEAKED"));
    }
}
