//! # Task status state machine.
//!
//! ```text
//! Scheduled ──► Running ──┬──► DoneOk
//!     │                   ├──► Failed(err)
//!     │                   └──► Cancelled
//!     └──────────────────────► Cancelled   (fail-fast parent, runner never ran)
//! ```
//!
//! Terminal states never change again.

use std::fmt;

use crate::error::TaskError;

/// Current state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskStatus {
    /// Created, not yet started.
    #[default]
    Scheduled,
    /// Runner executing.
    Running,
    /// Completed successfully.
    DoneOk,
    /// Completed with an error.
    Failed(TaskError),
    /// Short-circuited by a fail-fast parent.
    Cancelled,
}

impl TaskStatus {
    /// True for `DoneOk`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::DoneOk | TaskStatus::Failed(_) | TaskStatus::Cancelled
        )
    }

    /// True only for `Failed`.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed(_))
    }

    /// The error carried by a failed or cancelled status.
    pub fn error(&self) -> Option<TaskError> {
        match self {
            TaskStatus::Failed(err) => Some(err.clone()),
            TaskStatus::Cancelled => Some(TaskError::CancelledByParent),
            _ => None,
        }
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::DoneOk => "ok",
            TaskStatus::Failed(_) => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Scheduled => f.write_str("Scheduled"),
            TaskStatus::Running => f.write_str("Running"),
            TaskStatus::DoneOk => f.write_str("OK"),
            TaskStatus::Failed(err) => write!(f, "Err: {err}"),
            TaskStatus::Cancelled => f.write_str("Cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(TaskStatus::default().to_string(), "Scheduled");
        assert_eq!(TaskStatus::DoneOk.to_string(), "OK");
        assert_eq!(
            TaskStatus::Failed(TaskError::NoChildren).to_string(),
            "Err: task completed without children"
        );
        assert_eq!(TaskStatus::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_classification() {
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Cancelled.is_failure());
        assert_eq!(TaskStatus::Cancelled.error(), Some(TaskError::CancelledByParent));
        assert_eq!(TaskStatus::DoneOk.error(), None);
    }
}
