//! Actor system driving the engine's asynchronous hooks.
//!
//! # Architecture
//!
//! - `Supervisor` - reads the engine outbox, routes events, runs the stale sweep
//! - `ResourceGroupActor` - one per group; offers a freed resource to the next jobs
//! - `TraceFlushActor` - promotes full trace chunks and archives finished traces
//!
//! # Usage
//!
//! ```ignore
//! use actors::{SupervisorMessage, start_supervisor};
//!
//! let engine = engine::Engine::in_memory(Default::default()).await?;
//! let (supervisor, handle) = start_supervisor(engine.clone()).await?;
//!
//! // Jobs fired through `engine.state_machine` now get their resource
//! // assignments and trace flushes in the background.
//! supervisor.send_message(SupervisorMessage::Shutdown)?;
//! ```

mod messages;
mod resource_group_actor;
mod supervisor;
mod trace_flush_actor;

pub use messages::{ActorError, ResourceGroupMessage, SupervisorMessage, TraceFlushMessage};
pub use resource_group_actor::{ResourceGroupActor, ResourceGroupActorState};
pub use supervisor::{Supervisor, SupervisorState, start_from_env, start_supervisor};
pub use trace_flush_actor::TraceFlushActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
