//! Lifecycle events emitted by the scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::core::task::TaskInfo;
use crate::error::Error;

/// Lifecycle of a task within one run.
///
/// Timestamps are captured by the scheduler's control loop, so a task's
/// `Started::at` is never earlier than the `Finished::at` of any of its
/// dependencies.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task body was started.
    Started { task: TaskInfo, at: Instant },
    /// A task body completed successfully.
    Finished {
        task: TaskInfo,
        at: Instant,
        duration: Duration,
    },
    /// A task body returned an error. Its dependents will not run.
    Failed {
        task: TaskInfo,
        at: Instant,
        duration: Duration,
        error: Arc<Error>,
    },
    /// A requested task or dependency is not registered. Nothing was started.
    NotFound { name: String },
}

impl TaskEvent {
    /// Name of the task the event is about.
    pub fn task_name(&self) -> &str {
        match self {
            TaskEvent::Started { task, .. }
            | TaskEvent::Finished { task, .. }
            | TaskEvent::Failed { task, .. } => &task.name,
            TaskEvent::NotFound { name } => name,
        }
    }

    /// Whether observing this event makes the run a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskEvent::Failed { .. } | TaskEvent::NotFound { .. })
    }
}

pub type EventSender = mpsc::UnboundedSender<TaskEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TaskEvent>;

/// Create the channel one run reports its events on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Outcome of a run that passed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks that finished, in completion order.
    pub completed: Vec<String>,
    /// Tasks whose body returned an error, in completion order.
    pub failed: Vec<String>,
    /// Tasks that never started because a dependency failed.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}
