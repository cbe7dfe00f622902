//! Task data model.
//!
//! A task is a named unit of work with declared dependencies and a body.
//! Tasks are registered once and may be executed by any number of runs;
//! the per-run state lives in [`TaskStatus`] tables owned by the scheduler.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::util::blocking;

type BodyFn = dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync;

/// The work a task performs.
///
/// Bodies are re-invocable: every run calls the closure again and awaits the
/// returned future. Synchronous work is adapted with [`TaskBody::from_fn`].
#[derive(Clone)]
pub struct TaskBody {
    run: Arc<BodyFn>,
    noop: bool,
}

impl TaskBody {
    /// A body driven by an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            run: Arc::new(move || f().boxed()),
            noop: false,
        }
    }

    /// A body driven by a synchronous closure.
    ///
    /// The closure runs on the blocking thread pool, so a body that sleeps or
    /// does file IO never holds up other ready tasks.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move || {
            let f = Arc::clone(&f);
            blocking(move || f())
        })
    }

    /// The placeholder body of an alias task that only groups dependencies.
    pub fn noop() -> Self {
        Self {
            run: Arc::new(|| futures::future::ready(Ok(())).boxed()),
            noop: true,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.noop
    }

    /// Start one execution of the body.
    pub fn invoke(&self) -> BoxFuture<'static, Result<()>> {
        (self.run)()
    }
}

impl Default for TaskBody {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBody")
            .field("noop", &self.noop)
            .finish_non_exhaustive()
    }
}

/// Status of a task within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started yet; dependencies may still be running or may have failed.
    Pending,
    /// The body is executing.
    Running,
    /// The body completed successfully.
    Done,
    /// The body returned an error.
    Errored,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Errored)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Errored => write!(f, "errored"),
        }
    }
}

/// A registered task.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique name, also the key under which the task is registered.
    pub name: String,
    /// Names of the tasks that must be done before this one starts, in declaration order.
    pub dependencies: Vec<String>,
    /// Run in mutual exclusion with every other task.
    pub blocking: bool,
    pub body: TaskBody,
}

impl Task {
    pub fn new(name: &str, dependencies: &[&str], body: TaskBody) -> Self {
        Self {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            blocking: false,
            body,
        }
    }

    /// An alias task: no work of its own, only dependencies.
    pub fn alias(name: &str, dependencies: &[&str]) -> Self {
        Self::new(name, dependencies, TaskBody::noop())
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn is_alias(&self) -> bool {
        self.body.is_noop()
    }
}

/// Name, dependencies and kind of a task, as carried by lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub dependencies: Vec<String>,
    pub blocking: bool,
    pub alias: bool,
}

impl From<&Task> for TaskInfo {
    fn from(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            dependencies: task.dependencies.clone(),
            blocking: task.blocking,
            alias: task.is_alias(),
        }
    }
}
