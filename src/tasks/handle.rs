//! # Capability contract of schedulable children.
//!
//! A parent only needs a handful of operations from its children: start them,
//! cancel them without running, observe their status and wait for completion.
//! [`Schedulable`] captures exactly that, so plain tasks, parents and bucket
//! tasks can be mixed in one child set. The common handle type is [`TaskRef`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;
use crate::tasks::parent::ParentTask;
use crate::tasks::status::TaskStatus;
use crate::tasks::task::Task;

/// # Something a parent can schedule.
#[async_trait]
pub trait Schedulable: Send + Sync + 'static {
    /// Unique identifier.
    fn id(&self) -> &str;

    /// Starts the task path (non-blocking).
    fn run(&self);

    /// Snapshot of the status.
    fn status(&self) -> TaskStatus;

    /// Changes the status (ignored once terminal).
    async fn set_status(&self, status: TaskStatus);

    /// Completes the task without (or after) running it.
    async fn set_completed(&self, result: Result<(), TaskError>);

    /// Waits for completion.
    async fn await_done(&self);

    /// The underlying task (identity, emitters).
    fn task(&self) -> &Task;
}

/// Shared handle to a schedulable child.
pub type TaskRef = Arc<dyn Schedulable>;

#[async_trait]
impl Schedulable for Task {
    fn id(&self) -> &str {
        Task::id(self)
    }

    fn run(&self) {
        Task::run(self)
    }

    fn status(&self) -> TaskStatus {
        Task::status(self)
    }

    async fn set_status(&self, status: TaskStatus) {
        Task::set_status(self, status).await
    }

    async fn set_completed(&self, result: Result<(), TaskError>) {
        Task::set_completed(self, result).await
    }

    async fn await_done(&self) {
        Task::await_done(self).await
    }

    fn task(&self) -> &Task {
        self
    }
}

#[async_trait]
impl Schedulable for ParentTask {
    fn id(&self) -> &str {
        self.task().id()
    }

    fn run(&self) {
        self.task().run()
    }

    fn status(&self) -> TaskStatus {
        self.task().status()
    }

    async fn set_status(&self, status: TaskStatus) {
        self.task().set_status(status).await
    }

    async fn set_completed(&self, result: Result<(), TaskError>) {
        self.task().set_completed(result).await
    }

    async fn await_done(&self) {
        self.task().await_done().await
    }

    fn task(&self) -> &Task {
        ParentTask::task(self)
    }
}

impl From<Task> for TaskRef {
    fn from(task: Task) -> Self {
        Arc::new(task)
    }
}

impl From<ParentTask> for TaskRef {
    fn from(parent: ParentTask) -> Self {
        Arc::new(parent)
    }
}
