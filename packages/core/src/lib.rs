//! Core domain types for the CI execution engine.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and the lifecycle transition table
//! - Pipeline and status roll-up
//! - ResourceGroup and Resource for mutual exclusion
//! - TraceChunk and chunk splicing for job logs
//! - Outbox events and engine configuration

mod config;
mod events;
mod job;
mod pipeline;
mod resource_group;
pub mod trace;
pub mod transition;

pub use config::{ConfigError, EngineConfig, JobConfig, ResourceGroupConfig, TraceConfig};
pub use events::EngineEvent;
pub use job::{
    CrossDependency, FailureReason, Job, JobId, JobKind, JobStatus, Need, SchedulingMode,
    TimeoutSource, UnknownStatus, Variable, VariableSource,
};
pub use pipeline::{Pipeline, PipelineId, composite_status};
pub use resource_group::{ProcessMode, Resource, ResourceGroup};
pub use trace::{CHUNK_SIZE, ChunkError, DataStore, TraceChunk};
pub use transition::{Guards, JobEvent, TransitionError, next_status};
