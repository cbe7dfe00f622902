//! Declarative deployment scripts.
//!
//! A shipfile is a TOML document with one table per environment and one per
//! task:
//!
//! ```toml
//! [environments.default]
//! workspace = "/tmp/app"
//!
//! [environments.production]
//! servers = ["deploy@web1", "deploy@web2"]
//! ignores = [".git", "node_modules"]
//!
//! [tasks.build]
//! steps = [{ local = "npm run build" }]
//!
//! [tasks.publish]
//! deps = ["build"]
//! blocking = true
//! steps = [
//!   { copy = "dist/", dest = "/srv/app" },
//!   { remote = "systemctl restart app", cwd = "/srv/app" },
//! ]
//!
//! [tasks.default]
//! deps = ["publish"]
//! ```
//!
//! A task without steps is an alias that only groups its dependencies.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::SHARED_SECTION;
use crate::core::task::{Task, TaskBody};
use crate::error::{Error, Result};
use crate::exec::local::LocalOptions;
use crate::remote::pool::{CopyOptions, Direction, RunOptions};
use crate::shipr::Shipr;
use crate::util::expand_tilde;
use crate::{shiplog, shiplog_debug};

/// File names looked for by [`Shipfile::discover`], in order.
pub const SHIPFILE_NAMES: [&str; 2] = ["shipfile.toml", "Shipfile.toml"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shipfile {
    #[serde(default)]
    pub environments: toml::Table,
    #[serde(default, deserialize_with = "deserialize_tasks")]
    pub tasks: BTreeMap<String, TaskSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub deps: Vec<String>,
    pub blocking: bool,
    pub steps: Vec<Step>,
}

/// A task as written, before its steps are told apart.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTask {
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    blocking: bool,
    #[serde(default)]
    steps: Vec<toml::Table>,
}

/// Parse every task, naming the task and step number when a step is malformed.
fn deserialize_tasks<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, TaskSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, RawTask>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, task)| {
            let steps = task
                .steps
                .into_iter()
                .enumerate()
                .map(|(i, table)| {
                    Step::from_table(table).map_err(|reason| {
                        D::Error::custom(format!("step {} of task '{}': {}", i + 1, name, reason))
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let spec = TaskSpec {
                deps: task.deps,
                blocking: task.blocking,
                steps,
            };
            Ok((name, spec))
        })
        .collect()
}

const STEP_KINDS: [&str; 4] = ["local", "remote", "copy", "log"];

/// One action of a task, run in order.
///
/// The kind is picked by which of `local`, `remote`, `copy` or `log` the
/// table carries; exactly one must be present.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Local(LocalStep),
    Remote(RemoteStep),
    Copy(CopyStep),
    Log(LogStep),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalStep {
    pub local: String,
    pub cwd: Option<String>,
    pub max_buffer: Option<usize>,
    /// Seconds before the command is killed.
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteStep {
    pub remote: String,
    pub cwd: Option<String>,
    pub max_buffer: Option<usize>,
    #[serde(default)]
    pub tty: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyStep {
    pub copy: String,
    pub dest: String,
    #[serde(default)]
    pub direction: Direction,
    pub ignores: Option<Vec<String>>,
    pub rsync: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogStep {
    pub log: String,
}

impl Step {
    fn from_table(table: toml::Table) -> std::result::Result<Self, String> {
        let kinds: Vec<&str> = STEP_KINDS
            .into_iter()
            .filter(|kind| table.contains_key(*kind))
            .collect();
        let value = toml::Value::Table(table);
        let step = match kinds.as_slice() {
            ["local"] => value.try_into().map(Step::Local),
            ["remote"] => value.try_into().map(Step::Remote),
            ["copy"] => value.try_into().map(Step::Copy),
            ["log"] => value.try_into().map(Step::Log),
            [] => {
                return Err("expected one of `local`, `remote`, `copy` or `log`".to_string());
            }
            many => return Err(format!("`{}` cannot share a step", many.join("` and `"))),
        };
        step.map_err(|e| e.message().to_string())
    }

    /// Whether the step needs the connection pool.
    pub fn is_remote(&self) -> bool {
        matches!(self, Step::Remote(_) | Step::Copy(_))
    }

    pub async fn run(&self, shipr: &Shipr) -> Result<()> {
        match self {
            Step::Local(step) => {
                let mut options = LocalOptions {
                    max_buffer: step.max_buffer,
                    timeout: step.timeout.map(std::time::Duration::from_secs),
                    ..Default::default()
                };
                if let Some(cwd) = &step.cwd {
                    let cwd = expand_tilde(cwd);
                    options.cwd = Some(match &shipr.context().cwd {
                        Some(base) if cwd.is_relative() => base.join(cwd),
                        _ => cwd,
                    });
                }
                shipr.local(&step.local, options).await?;
            }
            Step::Remote(step) => {
                let options = RunOptions {
                    cwd: step.cwd.clone(),
                    max_buffer: step.max_buffer,
                    tty: step.tty,
                };
                shipr.remote(&step.remote, options).await?;
            }
            Step::Copy(step) => {
                let options = CopyOptions {
                    direction: step.direction,
                    ignores: step.ignores.clone(),
                    rsync: step.rsync.clone(),
                };
                shipr.copy(&step.copy, &step.dest, options).await?;
            }
            Step::Log(step) => shipr.log(&step.log)?,
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Step::from_table(toml::Table::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

impl Shipfile {
    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        shiplog_debug!("Shipfile::load path={}", path.display());
        if !path.is_file() {
            return Err(Error::ShipfileNotFound(path.to_path_buf()));
        }
        let shipfile = Self::parse(&fs::read_to_string(path)?)?;
        shiplog!(
            "Loaded shipfile {} with {} task(s)",
            path.display(),
            shipfile.tasks.len()
        );
        Ok(shipfile)
    }

    /// Find a shipfile in `start` or the nearest ancestor that has one.
    pub fn discover(start: &Path) -> Result<PathBuf> {
        for dir in start.ancestors() {
            for name in SHIPFILE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
        Err(Error::ShipfileNotFound(start.join(SHIPFILE_NAMES[0])))
    }

    /// The environment tables as a configuration document.
    pub fn document(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.environments)?)
    }

    /// Whether any task talks to the remote hosts.
    pub fn needs_pool(&self) -> bool {
        self.tasks
            .values()
            .flat_map(|task| task.steps.iter())
            .any(Step::is_remote)
    }

    /// Resolve the configuration (when environments are declared) and register every task.
    ///
    /// A shipfile without environments only accepts the shared one.
    pub fn apply(&self, shipr: &Shipr) -> Result<()> {
        if !self.environments.is_empty() {
            shipr.init_config(&self.document()?)?;
        } else if shipr.environment() != SHARED_SECTION {
            return Err(Error::EnvironmentNotFound(shipr.environment().to_string()));
        }
        for (name, spec) in &self.tasks {
            let deps: Vec<&str> = spec.deps.iter().map(String::as_str).collect();
            let task = Task::new(name, &deps, step_body(shipr, name, &spec.steps))
                .blocking(spec.blocking);
            shipr.add_task(task);
        }
        Ok(())
    }
}

fn step_body(shipr: &Shipr, task: &str, steps: &[Step]) -> TaskBody {
    if steps.is_empty() {
        return TaskBody::noop();
    }
    let shipr = shipr.clone();
    let task: Arc<str> = task.into();
    let steps: Arc<[Step]> = steps.into();
    TaskBody::new(move || {
        let shipr = shipr.clone();
        let task = Arc::clone(&task);
        let steps = Arc::clone(&steps);
        async move {
            for (i, step) in steps.iter().enumerate() {
                step.run(&shipr).await.map_err(|e| {
                    Error::caused_by(format!("Step {} of '{}' failed", i + 1, task), e)
                })?;
            }
            Ok(())
        }
    })
}
