//! # Files bucket: a task that grows one child per produced file.
//!
//! The bucket starts its source tasks itself. Every file a source produces is
//! turned into a new child by the caller's factory, and the child is run at
//! once. The bucket completes when every source and every spawned child is done.
//!
//! ```text
//! bucket runner
//!   for each source:
//!     tracker unit ─► file_produced listener ─► (event) factory(file) ─► child.run()
//!                                                      └─► tracker unit: child.await_done()
//!                  ─► listener exhausted (source completed) ─► source.await_done()
//!     source.run()
//!   tracker.close() ─► tracker.wait()
//! ```
//!
//! Each child is added to the tracker before it starts, so the barrier can
//! never observe zero while a child is still pending.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::core::Supervisor;
use crate::tasks::task::{Task, TaskFile};
use crate::tasks::status::TaskStatus;

/// Factory building the child task of a produced file.
pub type FileTaskFactory = Arc<dyn Fn(TaskFile) -> Task + Send + Sync>;

/// Constructor namespace for bucket tasks.
#[derive(Debug, Clone, Copy)]
pub struct FilesBucketTask;

impl FilesBucketTask {
    /// Creates a bucket task over `sources`.
    ///
    /// # Panics
    /// When a source is not `Scheduled`: the bucket runs its sources itself.
    /// A source started after construction makes the bucket fail instead.
    pub fn new<F>(
        sup: &Arc<Supervisor>,
        id: impl Into<String>,
        factory: F,
        sources: Vec<Task>,
    ) -> Task
    where
        F: Fn(TaskFile) -> Task + Send + Sync + 'static,
    {
        for source in &sources {
            assert_schedulable(source);
        }
        let factory: FileTaskFactory = Arc::new(factory);

        Task::new(sup, id, move |ctx| async move {
            // all sources are checked before the first one starts
            for source in &sources {
                assert_schedulable(source);
            }
            let tracker = TaskTracker::new();

            for source in sources {
                let files = source.file_produced().await_any();
                let factory = Arc::clone(&factory);
                let children = tracker.clone();
                let bucket = ctx.id().to_string();
                let watched = source.clone();

                tracker.spawn(async move {
                    if let Some(mut files) = files {
                        while let Some(ev) = files.recv().await {
                            let child = factory(ev.payload.clone());
                            debug!(
                                bucket = %bucket,
                                source = %ev.source,
                                child = child.id(),
                                "file produced, child spawned"
                            );
                            let waited = child.clone();
                            children.spawn(async move { waited.await_done().await });
                            child.run();
                        }
                    }
                    watched.await_done().await;
                });
                source.run();
            }

            tracker.close();
            tracker.wait().await;
            Ok(())
        })
    }
}

fn assert_schedulable(source: &Task) {
    let status = source.status();
    if status != TaskStatus::Scheduled {
        panic!(
            "{status}: you cannot create a FilesBucketTask from already started tasks, \
             the bucket runs its sources itself"
        );
    }
}
