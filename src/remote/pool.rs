//! The remote transport seam.
//!
//! [`ConnectionPool`] is what task bodies reach the remote hosts through.
//! [`crate::remote::SshPool`] is the production implementation; tests plug
//! in recording pools.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::exec::local::CommandOutput;
use crate::remote::server::Server;

/// Options forwarded to [`ConnectionPool::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Remote working directory. The facade folds this into the command
    /// before it reaches the pool.
    pub cwd: Option<String>,
    /// Bound on captured bytes per stream and per host.
    pub max_buffer: Option<usize>,
    /// Request a pseudo terminal.
    pub tty: bool,
}

impl RunOptions {
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn max_buffer(mut self, bytes: usize) -> Self {
        self.max_buffer = Some(bytes);
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }
}

/// Which way a copy goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    #[default]
    LocalToRemote,
    RemoteToLocal,
}

/// Copy options as a caller writes them; unset lists fall back to the config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub ignores: Option<Vec<String>>,
    #[serde(default)]
    pub rsync: Option<Vec<String>>,
}

impl CopyOptions {
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn ignores(mut self, ignores: Vec<String>) -> Self {
        self.ignores = Some(ignores);
        self
    }

    pub fn rsync(mut self, args: Vec<String>) -> Self {
        self.rsync = Some(args);
        self
    }

    /// Fill unset lists from `ignores` and `rsync` in the config.
    ///
    /// An explicitly empty list stays empty.
    pub fn resolve(self, config: Option<&Config>) -> Result<SyncOptions> {
        let ignores = match self.ignores {
            Some(ignores) => ignores,
            None => config.map(Config::ignores).transpose()?.unwrap_or_default(),
        };
        let rsync = match self.rsync {
            Some(rsync) => rsync,
            None => config.map(Config::rsync).transpose()?.unwrap_or_default(),
        };
        Ok(SyncOptions {
            direction: self.direction,
            ignores,
            rsync,
        })
    }
}

/// Fully resolved options handed to [`ConnectionPool::copy`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub direction: Direction,
    pub ignores: Vec<String>,
    pub rsync: Vec<String>,
}

/// Output of a command on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub server: Server,
    pub output: CommandOutput,
}

/// A set of persistent connections to the configured servers.
///
/// Implementations run every command on every server and own the
/// serialization of commands over a single connection.
pub trait ConnectionPool: Send + Sync {
    /// Run `command` on every server.
    fn run(&self, command: String, options: RunOptions) -> BoxFuture<'_, Result<Vec<RemoteOutput>>>;

    /// Copy `src` to `dest` on every server, in the given direction.
    fn copy(&self, src: String, dest: String, options: SyncOptions) -> BoxFuture<'_, Result<()>>;

    /// Tear down persistent connections.
    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
