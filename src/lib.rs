//! # tasktree
//!
//! **tasktree** runs trees of async tasks doing local and remote file and
//! process work. A task is an async function receiving a [`Context`]; tasks
//! compose into parents that bound how many children run at once and can
//! cancel the rest after the first failure.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - EventHub    (one processor task serializing every emitter)     │
//! │  - Registry    (live tasks, weak references)                      │
//! │  - Connections (host name ─► Connection)                          │
//! │  - stdout sink (shared by every task log)                         │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌──────────┐     ┌──────────────┐   ┌─────────────────┐
//!   │   Task   │     │  ParentTask  │   │ FilesBucketTask │
//!   │ runner   │     │ window + FIFO│   │ one child per   │
//!   │ (Context)│     │ + fail-fast  │   │ produced file   │
//!   └────┬─────┘     └──────┬───────┘   └────────┬────────┘
//!        │                  │ run_child          │ factory(file)
//!        │                  ▼                    ▼
//!        │            children (TaskRef)    children (Task)
//!        ▼
//!   emitters: status_changed, failed, succeeded, done, progress, file_produced
//! ```
//!
//! ### Task lifecycle
//! ```text
//! Scheduled ──run()──► Running ──runner──┬─► DoneOk
//!     │                                  ├─► Failed(err)   (error, latched error, panic)
//!     │                                  └─► Cancelled
//!     └── fail-fast parent ──────────────────► Cancelled   (runner never runs)
//!
//! on completion: succeeded | failed ─► done ─► close emitters ─► leave registry
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types                              |
//! |-------------------|----------------------------------------------------------|----------------------------------------|
//! | **Tasks**         | Async runners with status and completion events.         | [`Task`], [`TaskStatus`]               |
//! | **Trees**         | Bounded parallelism, FIFO admission, fail-fast.          | [`ParentTask`], [`Schedulable`]        |
//! | **Buckets**       | Dynamically growing child sets driven by produced files. | [`FilesBucketTask`], [`TaskFile`]      |
//! | **Events**        | Serialized pub/sub with back-pressure.                   | [`Emitter`], [`Listener`], [`EventHub`]|
//! | **Context**       | Latched-error file and process operations, task logs.    | [`Context`], [`LogLevel`]              |
//! | **Connections**   | Host-qualified paths and pluggable transports.           | [`VirtualPath`], [`Connection`]        |
//! | **Errors**        | Typed errors for tasks and connections.                  | [`TaskError`], [`ConnectionError`]     |
//! | **Configuration** | Log directory, verbosity, parallelism, hosts.            | [`Config`]                             |
//!
//! ## Example
//! ```rust
//! use tasktree::{Config, Supervisor, TaskStatus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let sup = Supervisor::builder(Config::default()).build();
//!
//!     let parent = sup.parent("build", {
//!         let sup = sup.clone();
//!         move |_ctx, parent| async move {
//!             for step in ["fetch", "compile", "publish"] {
//!                 let child = sup.task(step, |ctx| async move {
//!                     ctx.log_info(format!("{} done", ctx.id()));
//!                     Ok(())
//!                 });
//!                 parent.append_child(child.clone());
//!                 parent.run_child(child);
//!             }
//!             Ok(())
//!         }
//!     });
//!     parent.set_max_parallelism(1);
//!     parent.set_fail_fast();
//!     parent.run();
//!     parent.await_done().await;
//!
//!     assert_eq!(parent.status(), TaskStatus::DoneOk);
//!     assert!(!parent.has_failed());
//! }
//! ```

mod config;
mod connection;
mod core;
mod ctx;
mod error;
mod events;
mod tasks;
mod vpath;

// ---- Public re-exports ----

pub use config::{Config, HostConfig, HostKind};
pub use connection::{
    Connection, Connections, FileMeta, FileReader, FileWriter, LocalConnection, LocalProcess,
    Process, RunOptions, SharedWriter, shared_writer,
};
pub use core::{Registry, Supervisor, SupervisorBuilder};
pub use ctx::{Context, LogLevel};
pub use error::{ConnectionError, TaskError};
pub use events::{Emitter, Event, EventHub, ListenHandle, Listener};
pub use tasks::{
    BoxTaskFuture, FileTaskFactory, FilesBucketTask, ParentTask, Progress, Schedulable, Task,
    TaskFile, TaskRef, TaskStatus,
};
pub use vpath::{LOCALHOST, VirtualPath};
