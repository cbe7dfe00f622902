//! Human-facing progress output.
//!
//! The [`Reporter`] consumes one run's [`TaskEvent`]s and writes progress
//! lines to the log sink. It is the only place errors are rendered for a
//! reader; every other layer attaches context and propagates.

use std::fmt::Write as _;
use std::time::Duration;

use crate::error::Error;
use crate::exec::sink::OutputSink;
use crate::orchestration::events::{EventReceiver, TaskEvent};
use crate::shiplog_error;

const UNITS: [(&str, f64); 6] = [
    ("h", 3_600e9),
    ("min", 60e9),
    ("s", 1e9),
    ("ms", 1e6),
    ("μs", 1e3),
    ("ns", 1.0),
];

/// Render a duration in its largest whole unit, e.g. `1.5 s` or `320 ms`.
pub fn pretty_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos() as f64;
    let (unit, scale) = UNITS
        .iter()
        .copied()
        .find(|(_, scale)| nanos >= *scale)
        .unwrap_or(("ns", 1.0));

    let rounded = format!("{:.2}", nanos / scale);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, unit)
}

/// Render an error for a reader.
///
/// The error's own message comes first. When a command failed, its captured
/// output follows; nested causes are listed last.
pub fn format_error(error: &Error) -> String {
    let mut out = error.to_string();

    if let Some(failure) = error.captured_output() {
        let is_top_level = matches!(error, Error::Command(_));
        if !is_top_level {
            let _ = write!(out, "\n{}", failure);
        }
        if !failure.stdout.trim().is_empty() {
            let _ = write!(out, "\nstdout:\n{}", failure.stdout.trim_end());
        }
        if !failure.stderr.trim().is_empty() {
            let _ = write!(out, "\nstderr:\n{}", failure.stderr.trim_end());
        }
    }

    let mut causes = Vec::new();
    let mut current = error;
    while let Error::Task {
        source: Some(cause),
        ..
    } = current
    {
        // A failed command is already rendered above.
        if !matches!(**cause, Error::Command(_)) {
            causes.push(cause.to_string());
        }
        current = &**cause;
    }
    if !causes.is_empty() {
        out.push_str("\nCaused by:");
        for (i, cause) in causes.iter().enumerate() {
            let _ = write!(out, "\n    {}: {}", i, cause);
        }
    }
    out
}

/// Writes lifecycle messages for one run.
#[derive(Debug, Clone)]
pub struct Reporter {
    sink: OutputSink,
}

impl Reporter {
    pub fn new(sink: OutputSink) -> Self {
        Self { sink }
    }

    /// The lines written for `event`.
    pub fn render(event: &TaskEvent) -> Vec<String> {
        match event {
            TaskEvent::Started { task, .. } => {
                if task.alias {
                    Vec::new()
                } else {
                    vec![format!("\nRunning '{}' task...", task.name)]
                }
            }
            TaskEvent::Finished { task, duration, .. } => {
                if task.alias {
                    vec![format!(
                        "Finished '{}' [ {} ]",
                        task.name,
                        task.dependencies.join(", ")
                    )]
                } else {
                    vec![format!(
                        "Finished '{}' after {}",
                        task.name,
                        pretty_duration(*duration)
                    )]
                }
            }
            TaskEvent::Failed {
                task,
                duration,
                error,
                ..
            } => vec![
                format!("'{}' errored after {}", task.name, pretty_duration(*duration)),
                format_error(error),
            ],
            TaskEvent::NotFound { name } => vec![
                format!("Task '{}' is not in your shipfile", name),
                "Please check the documentation for proper shipfile formatting".to_string(),
            ],
        }
    }

    /// Write the lines for one event.
    pub fn handle(&self, event: &TaskEvent) {
        for line in Self::render(event) {
            if let Err(e) = self.sink.write_line(&line) {
                shiplog_error!("Reporter failed to write to sink: {}", e);
            }
        }
    }

    /// Report every event until the run drops its sender.
    ///
    /// Returns whether a failure (an errored or unknown task) was observed.
    pub async fn consume(self, mut events: EventReceiver) -> bool {
        let mut failed = false;
        while let Some(event) = events.recv().await {
            failed |= event.is_failure();
            self.handle(&event);
        }
        failed
    }
}
