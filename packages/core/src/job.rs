//! Job domain types for units of work inside a pipeline.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PipelineId;

/// Unique identifier for a job. Assigned by the store in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, std::num::ParseIntError> {
        Ok(Self(s.trim().parse()?))
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job (and, by roll-up, of a pipeline).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Created,
    Scheduled,
    Manual,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 11] = [
        JobStatus::Created,
        JobStatus::Scheduled,
        JobStatus::Manual,
        JobStatus::WaitingForResource,
        JobStatus::Preparing,
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Canceled,
        JobStatus::Skipped,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled | JobStatus::Skipped
        )
    }

    /// Get a simple status string for display and queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Manual => "manual",
            JobStatus::WaitingForResource => "waiting_for_resource",
            JobStatus::Preparing => "preparing",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// How a job's local dependencies are derived. Fixed at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Depends on every job of earlier stages.
    #[default]
    Stage,
    /// Depends only on the jobs listed in `needs`.
    Dag,
}

/// The two processable kinds a pipeline can contain.
///
/// Both consume resource groups and both are schedulable; only builds carry a
/// trace, produce artifacts and receive a timeout classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[default]
    Build,
    /// Triggers a downstream pipeline.
    Bridge,
}

impl JobKind {
    pub fn consumes_resources(&self) -> bool {
        true
    }

    pub fn is_schedulable(&self) -> bool {
        true
    }

    pub fn produces_artifacts(&self) -> bool {
        matches!(self, JobKind::Build)
    }

    pub fn has_trace(&self) -> bool {
        matches!(self, JobKind::Build)
    }
}

/// A DAG edge to an upstream job of the same pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Need {
    pub name: String,
    /// Whether the upstream job's artifacts are downloaded.
    #[serde(default = "default_true")]
    pub artifacts: bool,
    #[serde(default)]
    pub optional: bool,
}

impl Need {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifacts: true,
            optional: false,
        }
    }

    /// A need that orders execution without fetching artifacts.
    pub fn without_artifacts(name: impl Into<String>) -> Self {
        Self {
            artifacts: false,
            ..Self::new(name)
        }
    }
}

fn default_true() -> bool {
    true
}

/// A reference to a job in another pipeline of the same family.
///
/// `pipeline` and `job` are templates expanded against the job's variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossDependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    pub job: String,
    #[serde(default)]
    pub artifacts: bool,
}

impl CrossDependency {
    pub fn new(pipeline: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            pipeline: Some(pipeline.into()),
            job: job.into(),
            artifacts: true,
        }
    }

    /// Only specs naming a pipeline and requesting artifacts are resolved.
    pub fn is_specified(&self) -> bool {
        self.pipeline.is_some() && self.artifacts
    }
}

/// Where a variable came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    Predefined,
    Pipeline,
    #[default]
    Job,
    /// Exported by an upstream job (dotenv report).
    Dependency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub source: VariableSource,
}

impl Variable {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            source: VariableSource::Job,
        }
    }

    pub fn with_source(mut self, source: VariableSource) -> Self {
        self.source = source;
        self
    }
}

/// Why a job ended up `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    #[default]
    UnknownFailure,
    ScriptFailure,
    MissingDependencyFailure,
    JobExecutionTimeout,
    RunnerSystemFailure,
    DataIntegrityFailure,
}

/// Which limit decided a running job's timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutSource {
    ProjectTimeoutSource,
    RunnerTimeoutSource,
}

/// A job is a named unit of work inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    #[serde(default)]
    pub kind: JobKind,
    /// Position of the job's stage within the pipeline.
    pub stage_idx: u32,
    pub status: JobStatus,
    #[serde(default)]
    pub scheduling_mode: SchedulingMode,
    /// Key of the resource group the job must hold while active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub retries_count: u32,
    #[serde(default)]
    pub retries_max: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<Need>,
    /// Explicit `dependencies:` list. `Some(vec![])` means "no artifacts".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_dependencies: Vec<CrossDependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    /// Unmet prerequisites that must be provisioned before the job runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,
    /// Set once a retry has superseded this job.
    #[serde(default)]
    pub retried: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// Maximum timeout of the runner that picked the job up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_source: Option<TimeoutSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_expire_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub erased_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for_resource_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Optimistic concurrency counter, bumped by every conditional write.
    #[serde(default)]
    pub lock_version: u64,
}

impl Job {
    /// Create a new job in the `created` state.
    pub fn new(id: JobId, pipeline_id: PipelineId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            pipeline_id,
            name: name.into(),
            kind: JobKind::Build,
            stage_idx: 0,
            status: JobStatus::Created,
            scheduling_mode: SchedulingMode::Stage,
            resource_group: None,
            retries_count: 0,
            retries_max: 0,
            needs: Vec::new(),
            dependencies: None,
            cross_dependencies: Vec::new(),
            variables: Vec::new(),
            prerequisites: Vec::new(),
            retried: false,
            failure_reason: None,
            runner_timeout_secs: None,
            timeout_secs: None,
            timeout_source: None,
            artifacts_expire_at: None,
            erased_at: None,
            created_at: now,
            updated_at: now,
            waiting_for_resource_at: None,
            started_at: None,
            finished_at: None,
            duration_secs: None,
            lock_version: 0,
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_stage(mut self, stage_idx: u32) -> Self {
        self.stage_idx = stage_idx;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Switch to DAG scheduling with the given needs.
    pub fn with_needs(mut self, needs: Vec<Need>) -> Self {
        self.scheduling_mode = SchedulingMode::Dag;
        self.needs = needs;
        self
    }

    pub fn with_dependencies(mut self, names: Vec<String>) -> Self {
        self.dependencies = Some(names);
        self
    }

    pub fn with_cross_dependencies(mut self, specs: Vec<CrossDependency>) -> Self {
        self.cross_dependencies = specs;
        self
    }

    pub fn with_resource_group(mut self, key: impl Into<String>) -> Self {
        self.resource_group = Some(key.into());
        self
    }

    pub fn with_retries_max(mut self, retries_max: u32) -> Self {
        self.retries_max = retries_max;
        self
    }

    pub fn with_variables(mut self, variables: Vec<Variable>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_prerequisites(mut self, prerequisites: Vec<String>) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    pub fn with_runner_timeout(mut self, secs: u64) -> Self {
        self.runner_timeout_secs = Some(secs);
        self
    }

    pub fn with_artifacts_expire_at(mut self, at: DateTime<Utc>) -> Self {
        self.artifacts_expire_at = Some(at);
        self
    }

    pub fn has_resource_group(&self) -> bool {
        self.resource_group.is_some() && self.kind.consumes_resources()
    }

    pub fn has_unmet_prerequisites(&self) -> bool {
        !self.prerequisites.is_empty()
    }

    /// The job has not been superseded by a retry.
    pub fn is_latest(&self) -> bool {
        !self.retried
    }

    /// Names of needs whose artifacts must be fetched.
    pub fn artifact_need_names(&self) -> Vec<&str> {
        self.needs
            .iter()
            .filter(|need| need.artifacts)
            .map(|need| need.name.as_str())
            .collect()
    }

    /// Whether dropping this job should spawn an automatic retry.
    pub fn is_retryable_on_drop(&self) -> bool {
        self.retries_max > 0 && self.retries_count < self.retries_max
    }

    /// Whether the job's artifacts are gone, either expired or erased.
    pub fn artifacts_unavailable_at(&self, now: DateTime<Utc>) -> bool {
        self.erased_at.is_some() || self.artifacts_expire_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_names_round_trip_through_from_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("completed".parse::<JobStatus>().is_err());
    }

    #[test]
    fn status_serializes_as_snake_case_string() {
        let json = serde_json::to_string(&JobStatus::WaitingForResource).unwrap_or_default();
        assert_eq!(json, "\"waiting_for_resource\"");
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                JobStatus::Success,
                JobStatus::Failed,
                JobStatus::Canceled,
                JobStatus::Skipped
            ]
        );
    }

    #[test]
    fn with_needs_switches_to_dag() {
        let job = Job::new(JobId(1), PipelineId(1), "test")
            .with_needs(vec![Need::new("build"), Need::without_artifacts("lint")]);
        assert_eq!(job.scheduling_mode, SchedulingMode::Dag);
        assert_eq!(job.artifact_need_names(), vec!["build"]);
    }

    #[test]
    fn retry_eligibility() {
        let mut job = Job::new(JobId(1), PipelineId(1), "flaky").with_retries_max(2);
        assert!(job.is_retryable_on_drop());
        job.retries_count = 2;
        assert!(!job.is_retryable_on_drop());
        assert!(!Job::new(JobId(2), PipelineId(1), "once").is_retryable_on_drop());
    }

    #[test]
    fn artifacts_unavailable_when_expired_or_erased() {
        let now = Utc::now();
        let job = Job::new(JobId(1), PipelineId(1), "build");
        assert!(!job.artifacts_unavailable_at(now));

        let expired = job.clone().with_artifacts_expire_at(now - Duration::minutes(1));
        assert!(expired.artifacts_unavailable_at(now));

        let mut erased = job.with_artifacts_expire_at(now + Duration::days(1));
        assert!(!erased.artifacts_unavailable_at(now));
        erased.erased_at = Some(now);
        assert!(erased.artifacts_unavailable_at(now));
    }

    #[test]
    fn cross_dependency_needs_pipeline_and_artifacts() {
        assert!(CrossDependency::new("$PARENT_PIPELINE_ID", "build").is_specified());
        let mut spec = CrossDependency::new("1", "build");
        spec.artifacts = false;
        assert!(!spec.is_specified());
        spec.artifacts = true;
        spec.pipeline = None;
        assert!(!spec.is_specified());
    }
}
