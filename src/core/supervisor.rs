//! # Supervisor: the root object every task is created from.
//!
//! The [`Supervisor`] owns what tasks share: the [`EventHub`] serializing every
//! emitter, the [`Registry`] of live tasks, the [`Connections`] resolver, the
//! shared stdout sink and the [`Config`]. Tasks hold an `Arc<Supervisor>`,
//! so there is no process-wide state.
//!
//! ```text
//! SupervisorBuilder::build()
//!   └─► EventHub (processor task) ─┬─► Task emitters
//!                                  └─► custom emitters (Supervisor::emitter)
//!   └─► Registry      ◄── Task::new / set_completed
//!   └─► Connections   ◄── Context filesystem and process operations
//!   └─► stdout sink   ◄── task logs (ERROR/WARNING/INFO) and process output
//! ```
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use tasktree::{Config, Supervisor, TaskStatus};
//!
//! let sup = Supervisor::builder(Config::default()).build();
//! let task = sup.task("hello", |ctx| async move {
//!     ctx.log_info("hello");
//!     Ok(())
//! });
//! assert_eq!(sup.registry().len(), 1);
//! task.run();
//! task.await_done().await;
//! assert_eq!(task.status(), TaskStatus::DoneOk);
//! assert!(sup.registry().is_empty());
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::config::Config;
use crate::connection::{Connections, SharedWriter};
use crate::core::builder::SupervisorBuilder;
use crate::core::registry::Registry;
use crate::ctx::Context;
use crate::error::TaskError;
use crate::events::{Emitter, EventHub};
use crate::tasks::{FilesBucketTask, ParentTask, Task, TaskFile};

/// Shared state of a family of tasks.
pub struct Supervisor {
    cfg: Config,
    hub: EventHub,
    registry: Registry,
    connections: Connections,
    stdout: SharedWriter,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("cfg", &self.cfg)
            .field("registry", &self.registry)
            .field("connections", &self.connections)
            .finish()
    }
}

impl Supervisor {
    /// Starts building a supervisor over `cfg`.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        hub: EventHub,
        connections: Connections,
        stdout: SharedWriter,
    ) -> Self {
        Self {
            cfg,
            hub,
            registry: Registry::new(),
            connections,
            stdout,
        }
    }

    /// Creates a [`Task`]; see [`Task::new`].
    pub fn task<F, Fut>(self: &Arc<Self>, id: impl Into<String>, runner: F) -> Task
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Task::new(self, id, runner)
    }

    /// Creates a [`ParentTask`]; see [`ParentTask::new`].
    pub fn parent<F, Fut>(self: &Arc<Self>, id: impl Into<String>, runner: F) -> ParentTask
    where
        F: FnOnce(Context, ParentTask) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        ParentTask::new(self, id, runner)
    }

    /// Creates a files bucket; see [`FilesBucketTask::new`].
    pub fn files_bucket<F>(
        self: &Arc<Self>,
        id: impl Into<String>,
        factory: F,
        sources: Vec<Task>,
    ) -> Task
    where
        F: Fn(TaskFile) -> Task + Send + Sync + 'static,
    {
        FilesBucketTask::new(self, id, factory, sources)
    }

    /// Creates an emitter served by this supervisor's hub.
    pub fn emitter<T: Send + Sync + 'static>(&self, source: impl Into<Arc<str>>) -> Emitter<T> {
        Emitter::new(&self.hub, source)
    }

    /// Live tasks.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Host connections used by task contexts.
    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Shared stdout sink.
    pub fn stdout(&self) -> SharedWriter {
        Arc::clone(&self.stdout)
    }

    /// Event hub serializing every emitter of this supervisor.
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }
}
