//! Execution core of the CI engine.
//!
//! - [`JobStateMachine`]: job lifecycle with pre/post hooks and optimistic writes
//! - [`ResourceGroupCoordinator`]: one active job per named resource
//! - [`DependencyResolver`]: which upstream artifacts a job may consume
//! - [`TraceLogStore`]: chunked, tiered, append-only job logs
//!
//! Hooks that need asynchronous follow-up publish [`ci_core::EngineEvent`]s on
//! the [`Outbox`]; the `actors` package consumes them.

mod artifacts;
mod dependencies;
mod error;
pub mod logging;
mod optimistic;
mod outbox;
mod pipelines;
mod resource_groups;
mod retry;
mod runtime;
mod state_machine;
mod trace;
mod variables;

pub use artifacts::{ArtifactStore, ExpiryArtifactStore};
pub use dependencies::{Dependencies, DependencyResolver, ResolutionContext};
pub use error::{EngineError, EngineResult};
pub use optimistic::retry_on_conflict;
pub use outbox::Outbox;
pub use pipelines::PipelineStatusUpdater;
pub use resource_groups::ResourceGroupCoordinator;
pub use retry::{CloneRetryService, RetryService};
pub use runtime::{Backends, Engine};
pub use state_machine::{JobStateMachine, TransitionOutcome};
pub use trace::{ChunkHandle, TraceLogStore};
pub use variables::{ShellStyleExpander, VariableExpander};
