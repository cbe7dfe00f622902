//! Task registry and execution plans.
//!
//! [`TaskGraph`] is the set of registered tasks, keyed by name. Dependencies
//! are plain names and are not checked at registration time, so a script may
//! reference a task it registers later. All validation happens in
//! [`TaskGraph::plan`], which resolves the subgraph reachable from the
//! requested names into an [`ExecutionPlan`] backed by a petgraph `DiGraph`.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::task::{Task, TaskStatus};
use crate::error::{Error, Result};
use crate::shiplog_warn;

/// Name of the task run when no task is requested.
pub const DEFAULT_TASK: &str = "default";

/// All registered tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: HashMap<String, Task>,
    /// Registration order, used to keep plans deterministic.
    order: Vec<String>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, replacing any task registered under the same name.
    ///
    /// Returns the replaced task. The replacement keeps the original
    /// registration position.
    pub fn register(&mut self, task: Task) -> Option<Task> {
        let name = task.name.clone();
        let previous = self.tasks.insert(name.clone(), task);
        if previous.is_some() {
            shiplog_warn!("Task '{}' registered twice, keeping the last definition", name);
        } else {
            self.order.push(name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Resolve the requested tasks and everything they depend on.
    ///
    /// An empty request means [`DEFAULT_TASK`].
    ///
    /// # Errors
    /// - [`Error::TaskNotFound`] naming the first unknown task met while
    ///   walking the requested names and their dependencies in declaration order.
    /// - [`Error::DependencyCycle`] when the reachable subgraph contains a cycle.
    pub fn plan(&self, requested: &[String]) -> Result<ExecutionPlan> {
        let requested: Vec<String> = if requested.is_empty() {
            vec![DEFAULT_TASK.to_string()]
        } else {
            requested.to_vec()
        };

        let closure = self.closure(&requested)?;

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for name in &closure {
            if let Some(task) = self.tasks.get(name) {
                index.insert(name.clone(), graph.add_node(task.clone()));
            }
        }
        for name in &closure {
            let to = index[name];
            for dep in &self.tasks[name].dependencies {
                // Edge points from the dependency to the task waiting on it.
                graph.update_edge(index[dep], to, ());
            }
        }

        let order = toposort(&graph, None).map_err(|_| Error::DependencyCycle(find_cycle(&graph)))?;

        Ok(ExecutionPlan {
            graph,
            index,
            order,
            requested,
        })
    }

    /// Names reachable from `requested`, in first-visit order.
    fn closure(&self, requested: &[String]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut visited = Vec::new();
        let mut stack: Vec<&str> = requested.iter().rev().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            let task = self
                .tasks
                .get(name)
                .ok_or_else(|| Error::TaskNotFound(name.to_string()))?;
            visited.push(name.to_string());
            stack.extend(task.dependencies.iter().rev().map(String::as_str));
        }
        Ok(visited)
    }
}

/// Extract one dependency cycle, as task names with the first name repeated at the end.
fn find_cycle(graph: &DiGraph<Task, ()>) -> Vec<String> {
    let component = tarjan_scc(graph).into_iter().find(|scc| {
        scc.len() > 1 || graph.find_edge(scc[0], scc[0]).is_some()
    });
    let Some(component) = component else {
        return Vec::new();
    };
    let members: HashSet<NodeIndex> = component.iter().copied().collect();

    // Walk edges inside the component until a node repeats.
    let mut path = vec![component[0]];
    loop {
        let current = path[path.len() - 1];
        let next = graph
            .neighbors_directed(current, Direction::Outgoing)
            .find(|n| members.contains(n));
        let Some(next) = next else { break };
        if let Some(pos) = path.iter().position(|n| *n == next) {
            path.drain(..pos);
            path.push(next);
            break;
        }
        path.push(next);
    }

    // Edges run dependency -> dependent; report in "depends on" direction.
    path.reverse();
    path.into_iter().map(|n| graph[n].name.clone()).collect()
}

/// A validated, acyclic subgraph ready to be executed.
///
/// The plan holds its own copy of each task so registering tasks while a run
/// is in flight does not affect that run.
pub struct ExecutionPlan {
    graph: DiGraph<Task, ()>,
    index: HashMap<String, NodeIndex>,
    /// Topological order of all nodes.
    order: Vec<NodeIndex>,
    requested: Vec<String>,
}

impl ExecutionPlan {
    /// Names that were asked for, after defaulting.
    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.graph[i])
    }

    /// Tasks in an order where every task follows its dependencies.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(move |&i| &self.graph[i])
    }

    /// Tasks that depend directly on `name`.
    pub fn dependents(&self, name: &str) -> Vec<&Task> {
        match self.index.get(name) {
            Some(&i) => self
                .graph
                .neighbors_directed(i, Direction::Outgoing)
                .map(|n| &self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// A fresh status table with every task pending.
    pub fn initial_status(&self) -> HashMap<String, TaskStatus> {
        self.index
            .keys()
            .map(|name| (name.clone(), TaskStatus::Pending))
            .collect()
    }

    /// Whether `task` may start given the current status table.
    ///
    /// A task is ready when it is pending, all of its dependencies are done,
    /// no blocking task is running, and, if the task is itself blocking,
    /// nothing else is running.
    pub fn is_ready(&self, task: &Task, status: &HashMap<String, TaskStatus>) -> bool {
        if status.get(&task.name) != Some(&TaskStatus::Pending) {
            return false;
        }
        let deps_done = task
            .dependencies
            .iter()
            .all(|dep| status.get(dep) == Some(&TaskStatus::Done));
        if !deps_done {
            return false;
        }

        let mut running = self
            .tasks()
            .filter(|t| status.get(&t.name) == Some(&TaskStatus::Running));
        if task.blocking {
            running.next().is_none()
        } else {
            !running.any(|t| t.blocking)
        }
    }

    /// Every task that is ready right now, regardless of the others.
    pub fn ready_tasks(&self, status: &HashMap<String, TaskStatus>) -> Vec<&Task> {
        self.tasks().filter(|t| self.is_ready(t, status)).collect()
    }

    /// The tasks to start together right now.
    ///
    /// Readiness is re-evaluated after each pick, so a batch never pairs a
    /// blocking task with anything else.
    pub fn next_batch(&self, status: &HashMap<String, TaskStatus>) -> Vec<&Task> {
        let mut simulated = status.clone();
        let mut batch = Vec::new();
        for task in self.tasks() {
            if self.is_ready(task, &simulated) {
                simulated.insert(task.name.clone(), TaskStatus::Running);
                batch.push(task);
            }
        }
        batch
    }

    /// Tasks left pending once nothing else can start.
    pub fn skipped(&self, status: &HashMap<String, TaskStatus>) -> Vec<String> {
        self.tasks()
            .filter(|t| status.get(&t.name) == Some(&TaskStatus::Pending))
            .map(|t| t.name.clone())
            .collect()
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("requested", &self.requested)
            .field("tasks", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}
