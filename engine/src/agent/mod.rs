//! Conversation agent
//!
//! The [`ReplyOrchestrator`] turns one inbound event into at most one reply.
//! The [`Dispatcher`] feeds it from the inbound queue, one worker per
//! conversation key, so turns for the same conversation never overlap.

pub mod dispatcher;
pub mod orchestrator;
pub mod persona;
pub mod stats;

pub use dispatcher::{inbound_queue, DispatchSummary, Dispatcher, EventHandler};
pub use orchestrator::{IgnoreReason, OrchestratorSettings, ReplyOrchestrator, TurnOutcome};
pub use persona::Command;
pub use stats::{InMemoryStats, SessionStats, StatsSink};
