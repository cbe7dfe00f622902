//! The deployment host object.
//!
//! A [`Shipr`] is what a deployment script talks to: it resolves the
//! configuration, owns the connection pool, registers tasks and starts runs.
//! It is a cheap handle; clones share the same state, so task bodies capture
//! a clone to call [`Shipr::local`], [`Shipr::remote`] and [`Shipr::copy`].

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::config::Config;
use crate::core::task::{Task, TaskBody};
use crate::error::{Error, Result};
use crate::exec::local::{run_local, CommandOutput, LocalOptions};
use crate::exec::sink::ExecutionContext;
use crate::orchestration::{event_channel, RunSummary, Scheduler};
use crate::remote::pool::{ConnectionPool, CopyOptions, RemoteOutput, RunOptions};
use crate::remote::server::parse_servers;
use crate::remote::ssh::{SshOptions, SshPool};
use crate::reporter::Reporter;
use crate::{shiplog, shiplog_debug, shiplog_warn};

/// Fold a remote working directory into the command.
///
/// With a `cwd`, the command becomes `cd "<cwd>" && <command>` with double
/// quotes inside `cwd` escaped, and `cwd` is cleared from the options.
pub fn shape_remote_command(command: &str, mut options: RunOptions) -> (String, RunOptions) {
    match options.cwd.take() {
        Some(cwd) => (
            format!("cd \"{}\" && {}", cwd.replace('"', "\\\""), command),
            options,
        ),
        None => (command.to_string(), options),
    }
}

struct Inner {
    environment: String,
    context: ExecutionContext,
    config: RwLock<Option<Config>>,
    pool: RwLock<Option<Arc<dyn ConnectionPool>>>,
    scheduler: RwLock<Scheduler>,
}

#[derive(Clone)]
pub struct Shipr {
    inner: Arc<Inner>,
}

impl Shipr {
    pub fn new(environment: impl Into<String>, context: ExecutionContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                environment: environment.into(),
                context,
                config: RwLock::new(None),
                pool: RwLock::new(None),
                scheduler: RwLock::new(Scheduler::new()),
            }),
        }
    }

    pub fn environment(&self) -> &str {
        &self.inner.environment
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    /// Resolve `document` for this environment and make it the effective configuration.
    pub fn init_config(&self, document: &Value) -> Result<Config> {
        let config = Config::resolve(document, &self.inner.environment)?;
        shiplog!("Configuration initialized for environment '{}'", self.inner.environment);
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(config)
    }

    /// The effective configuration.
    pub fn config(&self) -> Result<Config> {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::ConfigNotInitialized)
    }

    /// Build the ssh connection pool from `servers`, `key` and `strict`.
    pub fn initialize(&self) -> Result<()> {
        let config = self.config()?;
        let servers = parse_servers(&config.servers()?)?;
        let options = SshOptions {
            key: config.key().map(str::to_string),
            strict: config.strict(),
        };
        let pool = SshPool::new(servers, options, self.inner.context.clone())?;
        self.set_pool(Arc::new(pool));
        Ok(())
    }

    /// Install a connection pool, replacing any previous one.
    pub fn set_pool(&self, pool: Arc<dyn ConnectionPool>) {
        let previous = self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pool);
        if previous.is_some() {
            shiplog_warn!("Connection pool replaced without being closed");
        }
    }

    fn pool(&self) -> Result<Arc<dyn ConnectionPool>> {
        self.inner
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::PoolNotInitialized)
    }

    /// Register a task. A task registered under an existing name replaces it.
    pub fn task(&self, name: &str, dependencies: &[&str], body: TaskBody) {
        self.add_task(Task::new(name, dependencies, body));
    }

    /// Register a task that runs with nothing else in flight.
    pub fn blocking_task(&self, name: &str, dependencies: &[&str], body: TaskBody) {
        self.add_task(Task::new(name, dependencies, body).blocking(true));
    }

    pub fn add_task(&self, task: Task) {
        shiplog_debug!(
            "Shipr::add_task name={} deps={:?} blocking={}",
            task.name,
            task.dependencies,
            task.blocking
        );
        self.inner
            .scheduler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_task(task);
    }

    /// Names of the registered tasks, in registration order.
    pub fn task_names(&self) -> Vec<String> {
        self.inner
            .scheduler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .graph()
            .names()
            .map(str::to_string)
            .collect()
    }

    /// Run a command on the local machine.
    pub async fn local(&self, command: &str, options: LocalOptions) -> Result<CommandOutput> {
        run_local(command, &options, &self.inner.context).await
    }

    /// Run a command on every server of the pool.
    pub async fn remote(&self, command: &str, options: RunOptions) -> Result<Vec<RemoteOutput>> {
        let pool = self.pool()?;
        let (command, options) = shape_remote_command(command, options);
        pool.run(command, options).await
    }

    /// Copy between the local machine and every server.
    ///
    /// Ignore patterns and sync-tool arguments the caller leaves unset come
    /// from the configuration.
    pub async fn copy(&self, src: &str, dest: &str, options: CopyOptions) -> Result<()> {
        let pool = self.pool()?;
        let config = self.inner.config.read().unwrap_or_else(PoisonError::into_inner).clone();
        let options = options.resolve(config.as_ref())?;
        pool.copy(src.to_string(), dest.to_string(), options).await
    }

    /// Write a progress message to the log sink.
    pub fn log(&self, message: &str) -> Result<()> {
        self.inner.context.log.write_line(message)?;
        Ok(())
    }

    /// Run the requested tasks, reporting progress on the log sink.
    ///
    /// An empty request runs `default`. Tasks registered while a run is in
    /// flight take effect from the next run.
    pub async fn start(&self, tasks: &[String]) -> Result<RunSummary> {
        let scheduler = self
            .inner
            .scheduler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let (events, rx) = event_channel();
        let reporter = tokio::spawn(Reporter::new(self.inner.context.log.clone()).consume(rx));

        let result = scheduler.run(tasks, &events).await;
        drop(events);
        let reported_failure = reporter
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?;
        if reported_failure {
            shiplog_warn!("Run in '{}' reported failures", self.inner.environment);
        }
        result
    }

    /// Close the connection pool, if one was initialized.
    pub async fn close(&self) -> Result<()> {
        let pool = self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pool {
            Some(pool) => pool.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Shipr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shipr")
            .field("environment", &self.inner.environment)
            .finish_non_exhaustive()
    }
}
