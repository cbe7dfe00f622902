//! Scheduler for dependency-ordered task execution.
//!
//! The Scheduler resolves the requested tasks into an execution plan, starts
//! every task whose dependencies are done, and waits for completions on a
//! channel. Readiness is recomputed once per completion. Task bodies run as
//! tokio tasks; only the control loop in [`Scheduler::run`] touches the status
//! table, so no lock guards the bookkeeping.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::mpsc;

use crate::core::dag::{ExecutionPlan, TaskGraph};
use crate::core::task::{Task, TaskBody, TaskInfo, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::events::{EventSender, RunSummary, TaskEvent};
use crate::{shiplog, shiplog_debug, shiplog_trace};

/// Report sent by a worker when a task body returns.
struct Completion {
    name: String,
    result: Result<()>,
    finished_at: Instant,
}

/// Dependency-ordered task runner.
///
/// # Example
///
/// ```ignore
/// use shipr::core::task::TaskBody;
/// use shipr::orchestration::{event_channel, Scheduler};
///
/// let mut scheduler = Scheduler::new();
/// scheduler.register("build", &[], TaskBody::from_fn(|| Ok(())), false);
/// scheduler.register("default", &["build"], TaskBody::noop(), false);
///
/// let (events, mut rx) = event_channel();
/// let summary = scheduler.run(&[], &events).await?;
/// assert!(summary.is_success());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    graph: TaskGraph,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a task. Dependencies are validated when a run starts.
    pub fn register(&mut self, name: &str, dependencies: &[&str], body: TaskBody, blocking: bool) {
        self.graph
            .register(Task::new(name, dependencies, body).blocking(blocking));
    }

    pub fn add_task(&mut self, task: Task) -> Option<Task> {
        self.graph.register(task)
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run the requested tasks and their dependencies.
    ///
    /// This is the main entry point. It:
    /// 1. Validates the reachable subgraph (unknown names, cycles)
    /// 2. Starts every ready task
    /// 3. Waits for a completion and records it
    /// 4. Repeats until nothing is running and nothing can start
    ///
    /// Events are sent on `events` as they happen; a dropped receiver is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] (after emitting [`TaskEvent::NotFound`])
    /// or [`Error::DependencyCycle`] before any task starts. Task failures do
    /// not produce an `Err`; they are reported in the returned [`RunSummary`].
    pub async fn run(&self, requested: &[String], events: &EventSender) -> Result<RunSummary> {
        let run_start = Instant::now();
        let plan = match self.graph.plan(requested) {
            Ok(plan) => plan,
            Err(Error::TaskNotFound(name)) => {
                shiplog!("Run aborted, task '{}' is not registered", name);
                let _ = events.send(TaskEvent::NotFound { name: name.clone() });
                return Err(Error::TaskNotFound(name));
            }
            Err(e) => {
                shiplog!("Run aborted: {}", e);
                return Err(e);
            }
        };
        shiplog!(
            "Run started requested={:?} tasks={}",
            plan.requested(),
            plan.len()
        );

        let mut status = plan.initial_status();
        let mut started: HashMap<String, Instant> = HashMap::new();
        let mut summary = RunSummary::default();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut running = 0usize;

        loop {
            running += self.dispatch_ready_tasks(&plan, &mut status, &mut started, &done_tx, events);

            if running == 0 {
                break;
            }

            // done_tx is held by this loop, so the channel cannot close while tasks run.
            let Some(completion) = done_rx.recv().await else {
                break;
            };
            running -= 1;
            self.handle_completion(&plan, completion, &mut status, &started, &mut summary, events);
        }

        summary.skipped = plan.skipped(&status);
        summary.elapsed = run_start.elapsed();
        shiplog!(
            "Run finished completed={} failed={} skipped={} elapsed={:?}",
            summary.completed.len(),
            summary.failed.len(),
            summary.skipped.len(),
            summary.elapsed
        );
        Ok(summary)
    }

    /// Start every task that is ready right now. Returns the number started.
    fn dispatch_ready_tasks(
        &self,
        plan: &ExecutionPlan,
        status: &mut HashMap<String, TaskStatus>,
        started: &mut HashMap<String, Instant>,
        done_tx: &mpsc::UnboundedSender<Completion>,
        events: &EventSender,
    ) -> usize {
        let batch = plan.next_batch(status);
        shiplog_trace!(
            "Readiness scan: {:?}",
            batch.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );

        for task in &batch {
            let at = Instant::now();
            status.insert(task.name.clone(), TaskStatus::Running);
            started.insert(task.name.clone(), at);
            shiplog_debug!("Task '{}' pending -> running", task.name);
            let _ = events.send(TaskEvent::Started {
                task: TaskInfo::from(*task),
                at,
            });

            let name = task.name.clone();
            let body = task.body.invoke();
            let tx = done_tx.clone();
            tokio::spawn(async move {
                let result = match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(Error::TaskJoin(format!("task '{}' panicked", name))),
                };
                let _ = tx.send(Completion {
                    name,
                    result,
                    finished_at: Instant::now(),
                });
            });
        }
        batch.len()
    }

    /// Record a finished body and emit its event.
    fn handle_completion(
        &self,
        plan: &ExecutionPlan,
        completion: Completion,
        status: &mut HashMap<String, TaskStatus>,
        started: &HashMap<String, Instant>,
        summary: &mut RunSummary,
        events: &EventSender,
    ) {
        let Completion {
            name,
            result,
            finished_at,
        } = completion;
        let Some(task) = plan.task(&name) else {
            return;
        };
        let at = Instant::now();
        let duration = started
            .get(&name)
            .map(|s| finished_at.saturating_duration_since(*s))
            .unwrap_or_default();

        match result {
            Ok(()) => {
                status.insert(name.clone(), TaskStatus::Done);
                shiplog_debug!("Task '{}' running -> done after {:?}", name, duration);
                summary.completed.push(name);
                let _ = events.send(TaskEvent::Finished {
                    task: TaskInfo::from(task),
                    at,
                    duration,
                });
            }
            Err(error) => {
                status.insert(name.clone(), TaskStatus::Errored);
                shiplog_debug!("Task '{}' running -> errored: {}", name, error);
                summary.failed.push(name);
                let _ = events.send(TaskEvent::Failed {
                    task: TaskInfo::from(task),
                    at,
                    duration,
                    error: Arc::new(error),
                });
            }
        }
    }
}
