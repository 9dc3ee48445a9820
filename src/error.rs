use std::io;

use thiserror::Error;

/// Rejected configuration input. Raised synchronously by [`crate::run`] and by
/// the runtime setters on [`crate::run::Task`]; the previous valid value is
/// always preserved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrent must be a positive non-zero integer")]
    Concurrent,
    #[error("rate must be a positive number")]
    Rate,
    #[error("duration must be a positive duration")]
    Duration,
    /// Attempt to adjust the parameter of the scheduling mode that is not
    /// active, e.g. `rate` on a concurrency-bound run.
    #[error("{param} cannot be adjusted in {mode} mode")]
    Inactive {
        param: &'static str,
        mode: &'static str,
    },
}

/// Failure of a run in progress, delivered exactly once through
/// [`crate::run::Task::wait`]. Individual invocation failures are not errors;
/// they are recorded with `status: fail` and the run continues.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to write to the output sink: {0}")]
    Sink(#[from] io::Error),
    #[error("run was interrupted before completion")]
    Interrupted,
}

/// Failure while aggregating an event stream.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The stream held zero report events. A header alone does not count.
    #[error("no data provided")]
    NoData,
    /// Upstream I/O failure, propagated as-is and never retried.
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed event stream: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure while comparing two or more event streams.
#[derive(Debug, Error)]
pub enum DiffError {
    #[error("at least two streams are required for a diff")]
    TooFewStreams,
    #[error("streams is not an array or has object of readable streams")]
    NotReadable,
    #[error("options.output is not a writable stream")]
    OutputNotWritable,
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Io(io::Error),
}
