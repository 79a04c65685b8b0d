//! Error types used by tasks and by the connection layer.
//!
//! This module defines two main error enums:
//!
//! - [`TaskError`] : the terminal error of a task (runner failures, structural
//!   failures of parent tasks, cancellation by a fail-fast parent).
//! - [`ConnectionError`] : failures of the host/file/process backends used
//!   through the [`Context`](crate::Context) façade.
//!
//! Both types provide `as_label` for stable log/metric labels.

use std::path::PathBuf;

use thiserror::Error;

/// # Errors a task can terminate with.
///
/// `TaskError` is `Clone` because the same value is carried by the task's
/// [`TaskStatus`](crate::TaskStatus) and delivered through its `failed` and
/// `done` emitters.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Error returned by the task runner itself.
    #[error("{error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// A parent task whose runner returned without appending any child.
    #[error("task completed without children")]
    NoChildren,

    /// Child short-circuited by a fail-fast parent; its runner never executed.
    #[error("tasks cancelled by parent")]
    CancelledByParent,

    /// First error latched on the context façade during the runner.
    #[error("{operation}: {step}: {error}")]
    Context {
        /// Façade operation that was running (e.g. ``Link from a:x to b:y``).
        operation: String,
        /// Backend call that failed inside the operation.
        step: String,
        /// Message of the backend error.
        error: String,
    },

    /// The runner panicked.
    #[error("task panicked: {reason}")]
    Panicked {
        /// Panic payload rendered as text.
        reason: String,
    },

    /// The per-task log sink could not be opened.
    #[error("cannot open task log {path:?}: {error}")]
    LogSink {
        /// Path of the log file.
        path: PathBuf,
        /// Message of the I/O error.
        error: String,
    },
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    ///
    /// # Example
    /// ```
    /// use tasktree::TaskError;
    ///
    /// let err = TaskError::fail("boom");
    /// assert_eq!(err.to_string(), "boom");
    /// ```
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tasktree::TaskError;
    ///
    /// assert_eq!(TaskError::CancelledByParent.as_label(), "task_cancelled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::NoChildren => "task_no_children",
            TaskError::CancelledByParent => "task_cancelled",
            TaskError::Context { .. } => "task_context_failed",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::LogSink { .. } => "task_log_sink",
        }
    }

    /// True for the synthetic error assigned to children cancelled by their parent.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::CancelledByParent)
    }
}

impl From<ConnectionError> for TaskError {
    fn from(err: ConnectionError) -> Self {
        TaskError::fail(err.to_string())
    }
}

/// # Errors produced by the connection layer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The host name is not present in the configuration.
    #[error("wrong configuration \"{config}\": unknown host `{host}`")]
    UnknownHost {
        /// Name of the configuration the hosts were read from.
        config: String,
        /// Requested host name.
        host: String,
    },

    /// The host is configured but no transport is available for its kind.
    #[error("wrong configuration \"{config}\": cannot connect to host `{host}`: no {kind} transport registered")]
    TransportUnavailable {
        /// Name of the configuration the hosts were read from.
        config: String,
        /// Requested host name.
        host: String,
        /// Configured host kind.
        kind: &'static str,
    },

    /// The path does not exist on the host.
    #[error("{path}: no such file or directory")]
    NotFound {
        /// Virtual path rendered as `host:path`.
        path: String,
    },

    /// Generic I/O failure of a backend operation.
    #[error("{op} `{path}`: {source}")]
    Io {
        /// Backend operation name.
        op: &'static str,
        /// Virtual path rendered as `host:path`.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command could not be started.
    #[error("run `{command}`: start error: {source}")]
    Spawn {
        /// Command rendered as `host:path`.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on a started process failed.
    #[error("wait `{command}`: {source}")]
    Wait {
        /// Command rendered as `host:path`.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConnectionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::UnknownHost { .. } => "connection_unknown_host",
            ConnectionError::TransportUnavailable { .. } => "connection_transport_unavailable",
            ConnectionError::NotFound { .. } => "connection_not_found",
            ConnectionError::Io { .. } => "connection_io",
            ConnectionError::Spawn { .. } => "connection_spawn",
            ConnectionError::Wait { .. } => "connection_wait",
        }
    }

    /// True when the error reports a missing path.
    pub fn is_not_found(&self) -> bool {
        match self {
            ConnectionError::NotFound { .. } => true,
            ConnectionError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
