//! Orchestration layer for shipr.
//!
//! This module drives task execution: the [`Scheduler`] resolves the
//! requested task graph and runs ready tasks concurrently, reporting
//! lifecycle changes as [`TaskEvent`]s on a per-run channel.

pub mod events;
mod scheduler;

pub use events::{event_channel, EventReceiver, EventSender, RunSummary, TaskEvent};
pub use scheduler::Scheduler;
