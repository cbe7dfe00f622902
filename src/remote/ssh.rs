//! OpenSSH-backed connection pool.
//!
//! Each server gets one multiplexed master connection (`ControlMaster=auto`)
//! whose socket lives in a per-pool directory, so every command after the
//! first reuses an authenticated session. File sync goes through rsync
//! tunnelled over the same ssh options.

use std::path::{Path, PathBuf};

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::exec::local::{run_streaming, StreamTarget, DEFAULT_MAX_BUFFER};
use crate::exec::sink::ExecutionContext;
use crate::remote::pool::{ConnectionPool, Direction, RemoteOutput, RunOptions, SyncOptions};
use crate::remote::server::Server;
use crate::util::{blocking, shell_escape};
use crate::{shiplog, shiplog_debug, shiplog_warn};

/// Seconds an idle master connection is kept open.
const CONTROL_PERSIST_SECS: u64 = 60;

/// Unix socket paths are capped at 104 bytes on macOS (108 on Linux), and
/// ssh expands `%C` to 40 hex characters.
const MAX_SOCKET_PATH: usize = 104;

/// `/tmp` when present: `$TMPDIR` on macOS alone is close to the socket limit.
fn control_dir_base() -> PathBuf {
    let tmp = Path::new("/tmp");
    if tmp.is_dir() {
        tmp.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// Connection settings shared by every server in a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshOptions {
    /// Identity file passed with `-i`.
    pub key: Option<String>,
    /// `StrictHostKeyChecking`; `None` leaves the user's ssh config in charge.
    pub strict: Option<bool>,
}

#[derive(Debug)]
pub struct SshPool {
    servers: Vec<Server>,
    options: SshOptions,
    ssh: PathBuf,
    rsync: Option<PathBuf>,
    control_dir: PathBuf,
    context: ExecutionContext,
}

impl SshPool {
    /// Build a pool for `servers`, locating `ssh` and `rsync` on the PATH.
    ///
    /// No connection is opened until the first command runs.
    pub fn new(servers: Vec<Server>, options: SshOptions, context: ExecutionContext) -> Result<Self> {
        let ssh = which::which("ssh")
            .map_err(|_| Error::Config("ssh binary not found in PATH".to_string()))?;
        let rsync = which::which("rsync").ok();
        if rsync.is_none() {
            shiplog_warn!("rsync not found in PATH, copy will be unavailable");
        }
        Self::with_binaries(servers, options, context, ssh, rsync)
    }

    /// Build a pool with explicit binaries.
    pub fn with_binaries(
        servers: Vec<Server>,
        options: SshOptions,
        context: ExecutionContext,
        ssh: impl Into<PathBuf>,
        rsync: Option<PathBuf>,
    ) -> Result<Self> {
        if servers.is_empty() {
            return Err(Error::ServersNotConfigured);
        }
        let control_dir = control_dir_base().join(format!("shipr-{}", short_id()));
        std::fs::create_dir_all(&control_dir)?;
        // `/` plus the expanded `%C`
        if control_dir.as_os_str().len() + 41 >= MAX_SOCKET_PATH {
            shiplog_warn!(
                "Control path {} is too long for a unix socket, multiplexing may fail",
                control_dir.display()
            );
        }

        shiplog!(
            "SshPool created for {} server(s), control dir {}",
            servers.len(),
            control_dir.display()
        );
        Ok(Self {
            servers,
            options,
            ssh: ssh.into(),
            rsync,
            control_dir,
            context,
        })
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    /// Connection options for `server`, without the destination.
    pub fn ssh_args(&self, server: &Server) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_dir.join("%C").display()),
            "-o".to_string(),
            format!("ControlPersist={}", CONTROL_PERSIST_SECS),
        ];
        if let Some(key) = &self.options.key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        if let Some(strict) = self.options.strict {
            args.push("-o".to_string());
            args.push(format!(
                "StrictHostKeyChecking={}",
                if strict { "yes" } else { "no" }
            ));
        }
        if let Some(port) = server.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args
    }

    /// Full rsync argument list for copying to or from `server`.
    pub fn rsync_args(&self, server: &Server, src: &str, dest: &str, options: &SyncOptions) -> Vec<String> {
        let mut args = vec!["-az".to_string()];
        for pattern in &options.ignores {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        args.extend(options.rsync.iter().cloned());

        let remote_shell = std::iter::once(self.ssh.display().to_string())
            .chain(self.ssh_args(server))
            .map(|arg| shell_escape(&arg))
            .collect::<Vec<_>>()
            .join(" ");
        args.push("-e".to_string());
        args.push(remote_shell);

        let remote = |path: &str| format!("{}:{}", server.destination(), path);
        match options.direction {
            Direction::LocalToRemote => {
                args.push(src.to_string());
                args.push(remote(dest));
            }
            Direction::RemoteToLocal => {
                args.push(remote(src));
                args.push(dest.to_string());
            }
        }
        args
    }

    fn stream_target(&self, server: &Server, max_buffer: Option<usize>) -> StreamTarget {
        StreamTarget {
            prefix: format!("@{} ", server.host),
            stdout: self.context.stdout.clone(),
            stderr: self.context.stderr.clone(),
            max_buffer: max_buffer.unwrap_or(DEFAULT_MAX_BUFFER),
        }
    }

    async fn run_on(&self, server: &Server, command: &str, options: &RunOptions) -> Result<RemoteOutput> {
        self.context
            .log
            .write_line(&format!("Running \"{}\" on host \"{}\".", command, server.host))?;

        let mut cmd = Command::new(&self.ssh);
        cmd.args(self.ssh_args(server));
        if options.tty {
            cmd.arg("-tt");
        }
        cmd.arg(server.destination()).arg(command);
        shiplog_debug!("SshPool::run server={} command={:?}", server, command);

        let target = self.stream_target(server, options.max_buffer);
        let output = run_streaming(cmd, command, &target).await?;
        Ok(RemoteOutput {
            server: server.clone(),
            output,
        })
    }

    async fn copy_to(&self, server: &Server, src: &str, dest: &str, options: &SyncOptions) -> Result<()> {
        let rsync = self
            .rsync
            .as_ref()
            .ok_or_else(|| Error::Config("rsync binary not found in PATH".to_string()))?;
        let args = self.rsync_args(server, src, dest, options);
        let display = format!("rsync {}", args.join(" "));
        self.context.log.write_line(&format!(
            "Copy \"{}\" to \"{}\" on host \"{}\".",
            src, dest, server.host
        ))?;
        shiplog_debug!("SshPool::copy server={} {}", server, display);

        let mut cmd = Command::new(rsync);
        cmd.args(&args);
        let target = self.stream_target(server, None);
        run_streaming(cmd, &display, &target).await?;
        Ok(())
    }

    async fn close_master(&self, server: &Server) {
        let mut cmd = Command::new(&self.ssh);
        cmd.args(self.ssh_args(server))
            .arg("-O")
            .arg("exit")
            .arg(server.destination())
            .kill_on_drop(true);
        match cmd.output().await {
            Ok(out) if out.status.success() => {
                shiplog_debug!("Closed master connection to {}", server)
            }
            // No master was ever opened for this server.
            Ok(_) => {}
            Err(e) => shiplog_warn!("Failed to close master connection to {}: {}", server, e),
        }
    }
}

impl ConnectionPool for SshPool {
    fn run(&self, command: String, options: RunOptions) -> BoxFuture<'_, Result<Vec<RemoteOutput>>> {
        async move {
            try_join_all(
                self.servers
                    .iter()
                    .map(|server| self.run_on(server, &command, &options)),
            )
            .await
        }
        .boxed()
    }

    fn copy(&self, src: String, dest: String, options: SyncOptions) -> BoxFuture<'_, Result<()>> {
        async move {
            try_join_all(
                self.servers
                    .iter()
                    .map(|server| self.copy_to(server, &src, &dest, &options)),
            )
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            futures::future::join_all(self.servers.iter().map(|server| self.close_master(server)))
                .await;
            let dir = self.control_dir.clone();
            blocking(move || match std::fs::remove_dir_all(&dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            })
            .await?;
            shiplog!("SshPool closed");
            Ok(())
        }
        .boxed()
    }
}
