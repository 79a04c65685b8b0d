//! # Tasks: the status machine, parents and files buckets.
//!
//! - [`Task`] runs one async runner and reports through six emitters;
//! - [`ParentTask`] schedules children with a bounded window and fail-fast policy;
//! - [`FilesBucketTask`] spawns one child per file produced by its sources;
//! - [`Schedulable`] / [`TaskRef`] is what a parent needs from a child.

pub(crate) mod bucket;
pub(crate) mod handle;
pub(crate) mod parent;
pub(crate) mod status;
pub(crate) mod task;

pub use bucket::{FileTaskFactory, FilesBucketTask};
pub use handle::{Schedulable, TaskRef};
pub use parent::ParentTask;
pub use status::TaskStatus;
pub use task::{BoxTaskFuture, Progress, Task, TaskFile};
