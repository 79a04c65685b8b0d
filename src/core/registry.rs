//! # Task registry: the live tasks of a supervisor.
//!
//! Tasks join the registry when created and leave it when they complete.
//! The registry only holds weak references, so it never keeps a task alive.
//!
//! ## Rules
//! - Ids are unique among live tasks; a duplicate id replaces the previous
//!   entry (logged at `warn`).
//! - `remove` only removes the exact task it is given, never a newer task that
//!   reused the id.
//! - Listings are sorted by id.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use crate::tasks::task::{Task, TaskInner};

/// Registry of live tasks.
#[derive(Default)]
pub struct Registry {
    tasks: Mutex<HashMap<Arc<str>, Weak<TaskInner>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `task`.
    pub fn add(&self, task: &Task) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let replaced = tasks.insert(task.id().into(), Arc::downgrade(&task.inner));
        if replaced.is_some_and(|old| old.strong_count() > 0) {
            warn!(task = task.id(), "duplicate task id, previous task unlisted");
        }
        debug!(task = task.id(), "task registered");
    }

    /// Removes `task` if it is still the one listed under its id.
    pub fn remove(&self, task: &Task) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let same = tasks
            .get(task.id())
            .is_some_and(|weak| weak.as_ptr() == Arc::as_ptr(&task.inner));
        if same {
            tasks.remove(task.id());
        }
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// True when no task is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live tasks, sorted by id. Entries of dropped tasks are pruned.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|_, weak| weak.strong_count() > 0);
        let mut live: Vec<Task> = tasks
            .values()
            .filter_map(Weak::upgrade)
            .map(|inner| Task { inner })
            .collect();
        drop(tasks);
        live.sort_by(|a, b| a.id().cmp(b.id()));
        live
    }

    /// Looks up a live task by id.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(Weak::upgrade)
            .map(|inner| Task { inner })
    }

    /// Writes one `<id>: <description> [<status>]` line per live task.
    pub fn write_listing(&self, w: &mut dyn Write) -> io::Result<()> {
        for task in self.list() {
            writeln!(w, "{}: {} [{}]", task.id(), task.description(), task.status())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::shared_writer;
    use crate::{Config, Supervisor, Task};

    fn supervisor() -> std::sync::Arc<Supervisor> {
        Supervisor::builder(Config::default())
            .with_stdout(shared_writer(std::io::sink()))
            .build()
    }

    #[tokio::test]
    async fn test_listing_is_sorted() {
        let sup = supervisor();
        let _b = Task::new(&sup, "B", |_| async { Ok(()) }).with_description("second");
        let _a = Task::new(&sup, "A", |_| async { Ok(()) }).with_description("first");

        let ids: Vec<String> = sup.registry().list().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        let mut out = Vec::new();
        sup.registry().write_listing(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "A: first [Scheduled]\nB: second [Scheduled]\n"
        );
    }

    #[tokio::test]
    async fn test_dropped_tasks_are_not_listed() {
        let sup = supervisor();
        let kept = Task::new(&sup, "KEPT", |_| async { Ok(()) });
        drop(Task::new(&sup, "DROPPED", |_| async { Ok(()) }));

        assert_eq!(sup.registry().len(), 1);
        assert!(sup.registry().get("DROPPED").is_none());
        assert!(sup.registry().get("KEPT").unwrap().ptr_eq(&kept));
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_newest() {
        let sup = supervisor();
        let old = Task::new(&sup, "SAME", |_| async { Ok(()) });
        let new = Task::new(&sup, "SAME", |_| async { Ok(()) });
        assert_eq!(sup.registry().len(), 1);

        // completing the replaced task must not unlist the new one
        old.set_completed(Ok(())).await;
        assert!(sup.registry().get("SAME").unwrap().ptr_eq(&new));

        new.set_completed(Ok(())).await;
        assert!(sup.registry().is_empty());
    }
}
