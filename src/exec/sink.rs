//! Output sinks and line prefixing.
//!
//! Sinks are passed explicitly through an [`ExecutionContext`] created once
//! per run; nothing in shipr writes to the process streams directly.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// A shareable writer that command output and reporter messages go to.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// A sink that discards everything.
    pub fn null() -> Self {
        Self::new(io::sink())
    }

    /// A sink backed by an in-memory buffer, plus a handle to read it back.
    pub fn memory() -> (Self, MemoryBuffer) {
        let buffer = MemoryBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Write and flush under one lock so concurrent writers never interleave within a call.
    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(bytes)?;
        writer.flush()
    }

    /// Write a message followed by a newline.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_all(&bytes)
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// In-memory writer whose contents can be read while it is shared.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn clear(&self) {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Write for MemoryBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Turns a byte stream into whole prefixed lines.
///
/// Chunks may split lines anywhere. An unterminated tail is held back until
/// its newline arrives or [`LineWrapper::finish`] is called, so every write to
/// a shared sink is one or more complete lines.
#[derive(Debug, Clone)]
pub struct LineWrapper {
    prefix: Vec<u8>,
    pending: Vec<u8>,
}

impl LineWrapper {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.as_bytes().to_vec(),
            pending: Vec::new(),
        }
    }

    /// Feed a chunk; returns the prefixed lines it completed.
    pub fn wrap(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let tail = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, tail);
        let mut out = Vec::with_capacity(complete.len() + self.prefix.len());
        for line in complete.split_inclusive(|&b| b == b'\n') {
            out.extend_from_slice(&self.prefix);
            out.extend_from_slice(line);
        }
        out
    }

    /// Emit the held-back tail, prefixed and without a newline added.
    pub fn finish(&mut self) -> Vec<u8> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let mut out = self.prefix.clone();
        out.append(&mut self.pending);
        out
    }
}

/// Sinks, working directory and environment shared by everything one run executes.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Receives streamed command stdout; `None` only captures it.
    pub stdout: Option<OutputSink>,
    /// Receives streamed command stderr; `None` only captures it.
    pub stderr: Option<OutputSink>,
    /// Receives progress messages from the reporter and `log` calls.
    pub log: OutputSink,
    /// Working directory for local commands.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables for local commands.
    pub env: HashMap<String, String>,
}

impl ExecutionContext {
    /// Stream to the terminal, log progress to stdout.
    pub fn terminal() -> Self {
        Self {
            stdout: Some(OutputSink::stdout()),
            stderr: Some(OutputSink::stderr()),
            log: OutputSink::stdout(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Explicit sinks, no working directory override.
    pub fn with_sinks(stdout: OutputSink, stderr: OutputSink, log: OutputSink) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
            log,
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}
