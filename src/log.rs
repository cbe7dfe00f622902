//! Diagnostic file logging for shipr.
//!
//! This is not the progress output a user watches during a deploy (that goes
//! through the reporter and the configured sinks). It records what the
//! scheduler, the command runners and the connection pool did, for later
//! inspection.
//!
//! Log levels:
//! - ERROR: A run could not be started or a sink could not be written
//! - WARN: Recoverable surprises (task re-registered, pool shutdown failed)
//! - INFO: Run boundaries, configuration and pool initialization
//! - DEBUG: Task state transitions, commands handed to shells
//! - TRACE: Streamed chunk sizes, readiness scans
//!
//! `--debug` or `SHIPR_DEBUG=1` raise the level to DEBUG.
//! `SHIPR_LOG=<level>` picks any level explicitly and wins over both.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_repr(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Pick the level from the `--debug` flag and the environment.
fn level_from_env(debug: bool) -> LogLevel {
    let explicit = std::env::var("SHIPR_LOG")
        .ok()
        .and_then(|v| v.parse::<LogLevel>().ok());
    let env_debug = std::env::var("SHIPR_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    match explicit {
        Some(level) => level,
        None if debug || env_debug => LogLevel::Debug,
        None => LogLevel::Info,
    }
}

/// Start logging to `~/.shipr/shipr.log`, truncating the previous run's log.
pub fn init_with_debug(debug: bool) {
    if let Some(dir) = dirs::home_dir().map(|h| h.join(".shipr")) {
        let _ = std::fs::create_dir_all(&dir);
        init_at(&dir.join("shipr.log"), level_from_env(debug));
    }
}

/// Start logging to `path` at `level`. Only the first call picks the file.
pub fn init_at(path: &Path, level: LogLevel) {
    let _ = std::fs::write(path, "");
    let _ = LOG_FILE.set(path.to_path_buf());
    set_level(level);
}

pub fn set_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::from_repr(LEVEL.load(Ordering::Relaxed))
}

/// Path of the log file, once logging has been initialized.
pub fn log_file() -> Option<&'static Path> {
    LOG_FILE.get().map(PathBuf::as_path)
}

/// Append `msg` to the log file when `level` is enabled.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > self::level() {
        return;
    }
    let Some(path) = LOG_FILE.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.label(), msg);
    }
}

/// Log at INFO.
#[macro_export]
macro_rules! shiplog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! shiplog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! shiplog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Log at DEBUG; dropped unless debug logging is on.
#[macro_export]
macro_rules! shiplog_debug {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! shiplog_trace {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
