//! Local command execution.
//!
//! Commands run through `sh -c`. Their stdout and stderr are streamed to the
//! context's sinks as they arrive, each line prefixed, and captured in full
//! for the returned [`CommandOutput`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::{CommandFailure, Error, Result};
use crate::exec::sink::{ExecutionContext, LineWrapper, OutputSink};
use crate::util::with_timeout;
use crate::{shiplog_debug, shiplog_trace};

/// Prefix put in front of every streamed line of local output.
pub const LINE_PREFIX: &str = "@ ";

/// Default bound on the captured output of one stream.
pub const DEFAULT_MAX_BUFFER: usize = 1000 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Options for a single local command.
#[derive(Debug, Clone, Default)]
pub struct LocalOptions {
    /// Working directory, overriding the context's.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables, on top of the context's.
    pub env: HashMap<String, String>,
    /// Bound on captured bytes per stream; defaults to [`DEFAULT_MAX_BUFFER`].
    pub max_buffer: Option<usize>,
    pub timeout: Option<Duration>,
}

impl LocalOptions {
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn max_buffer(mut self, bytes: usize) -> Self {
        self.max_buffer = Some(bytes);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured result of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` on the local machine.
///
/// # Errors
///
/// - [`Error::Command`] when the command exits non-zero; the captured output is attached.
/// - [`Error::OutputLimitExceeded`] when a stream exceeds the buffer bound; the child is killed.
/// - [`Error::Timeout`] when `options.timeout` elapses first.
pub async fn run_local(
    command: &str,
    options: &LocalOptions,
    ctx: &ExecutionContext,
) -> Result<CommandOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    if let Some(cwd) = options.cwd.as_ref().or(ctx.cwd.as_ref()) {
        cmd.current_dir(cwd);
    }
    cmd.envs(&ctx.env).envs(&options.env);

    ctx.log
        .write_line(&format!("Running \"{}\" on local.", command))?;
    shiplog_debug!("run_local command={:?}", command);
    let stream = StreamTarget {
        prefix: LINE_PREFIX.to_string(),
        stdout: ctx.stdout.clone(),
        stderr: ctx.stderr.clone(),
        max_buffer: options.max_buffer.unwrap_or(DEFAULT_MAX_BUFFER),
    };
    with_timeout(options.timeout, run_streaming(cmd, command, &stream)).await
}

/// Where a child's streams go and how much of them is kept.
#[derive(Debug, Clone)]
pub(crate) struct StreamTarget {
    pub prefix: String,
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
    pub max_buffer: usize,
}

/// Spawn `cmd`, stream both pipes through prefixing wrappers and wait for it.
///
/// `display` is the command line reported in errors.
pub(crate) async fn run_streaming(
    mut cmd: Command,
    display: &str,
    target: &StreamTarget,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let pumped = tokio::try_join!(
        pump(stdout, display, &target.prefix, target.stdout.as_ref(), target.max_buffer),
        pump(stderr, display, &target.prefix, target.stderr.as_ref(), target.max_buffer),
    );
    let (stdout, stderr) = match pumped {
        Ok(captured) => captured,
        Err(e) => {
            let _ = child.kill().await;
            return Err(e);
        }
    };

    let status = child.wait().await?;
    let stdout = String::from_utf8_lossy(&stdout).into_owned();
    let stderr = String::from_utf8_lossy(&stderr).into_owned();
    shiplog_debug!("Command {:?} exited with {:?}", display, status.code());

    if !status.success() {
        return Err(Error::Command(CommandFailure {
            command: display.to_string(),
            exit_code: status.code(),
            stdout,
            stderr,
        }));
    }
    Ok(CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

/// Copy one pipe into its sink a line at a time, keeping up to `limit` bytes.
async fn pump<R>(
    reader: Option<R>,
    display: &str,
    prefix: &str,
    sink: Option<&OutputSink>,
    limit: usize,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut wrapper = LineWrapper::new(prefix);
    let mut captured = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if captured.len() + n > limit {
            return Err(Error::OutputLimitExceeded {
                command: display.to_string(),
                limit,
            });
        }
        captured.extend_from_slice(&chunk[..n]);
        if let Some(sink) = sink {
            let lines = wrapper.wrap(&chunk[..n]);
            if !lines.is_empty() {
                sink.write_all(&lines)?;
            }
        }
        shiplog_trace!("{:?}: {} bytes", display, n);
    }
    if let Some(sink) = sink {
        let tail = wrapper.finish();
        if !tail.is_empty() {
            sink.write_all(&tail)?;
        }
    }
    Ok(captured)
}
