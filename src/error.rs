use std::path::PathBuf;

use thiserror::Error;

/// Output captured from a command that did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// The command line as it was handed to the shell.
    pub command: String,
    /// Exit status, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "Command '{}' failed with exit code {}", self.command, code),
            None => write!(f, "Command '{}' was terminated by a signal", self.command),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Environment \"{0}\" not found in config")]
    EnvironmentNotFound(String),

    #[error("Servers not filled")]
    ServersNotConfigured,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration has not been initialized")]
    ConfigNotInitialized,

    #[error("Connection pool has not been initialized")]
    PoolNotInitialized,

    #[error("shipfile not found: {0}")]
    ShipfileNotFound(PathBuf),

    #[error("Invalid server: {0}")]
    InvalidServer(String),

    #[error("Task '{0}' is not registered")]
    TaskNotFound(String),

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("{0}")]
    Command(CommandFailure),

    #[error("Command '{command}' exceeded the output limit of {limit} bytes")]
    OutputLimitExceeded { command: String, limit: usize },

    #[error("{message}")]
    Task {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("Run failed: {}", failed.join(", "))]
    RunFailed { failed: Vec<String> },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// A failure raised by a task body.
    pub fn task(message: impl Into<String>) -> Self {
        Error::Task {
            message: message.into(),
            source: None,
        }
    }

    /// A task failure wrapping the error that caused it.
    pub fn caused_by(message: impl Into<String>, cause: Error) -> Self {
        Error::Task {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Output captured from the failing command, searched through nested causes.
    pub fn captured_output(&self) -> Option<&CommandFailure> {
        match self {
            Error::Command(failure) => Some(failure),
            Error::Task {
                source: Some(cause),
                ..
            } => cause.captured_output(),
            _ => None,
        }
    }

    /// Whether the error stems from a broken configuration rather than a failed task.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::EnvironmentNotFound(_)
                | Error::ServersNotConfigured
                | Error::Config(_)
                | Error::ConfigNotInitialized
                | Error::ShipfileNotFound(_)
                | Error::InvalidServer(_)
        )
    }

    /// Whether the error was raised while validating the task graph.
    pub fn is_graph(&self) -> bool {
        matches!(self, Error::TaskNotFound(_) | Error::DependencyCycle(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
