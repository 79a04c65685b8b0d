//! # Task: an async runner with a status state machine and six emitters.
//!
//! A [`Task`] wraps a caller-supplied runner `FnOnce(Context) -> Future`. Calling
//! [`Task::run`] spawns the task path on its own tokio task:
//!
//! ```text
//! run()
//!   └─► open log sink (<log_dir>/<id>.log)        ──fail──► set_completed(Err(LogSink))
//!   └─► INFO "START: <description>"
//!   └─► status = Running                           (status_changed)
//!   └─► runner(ctx)    panic ─► Err(Panicked)
//!   └─► Ok but ctx latched an error ─► Err(latched)
//!   └─► ERROR "<err>"  |  INFO "DONE"
//!   └─► close log sink
//!   └─► set_completed(result)
//!         ├─ Ok                   ─► succeeded, status = DoneOk
//!         ├─ Err(CancelledByParent) ─► failed,  status = Cancelled
//!         └─ Err(e)               ─► failed,    status = Failed(e)
//!         └─► done(Option<err>) ─► close all emitters ─► leave registry
//! ```
//!
//! ## Rules
//! - The runner is consumed by the first `run`; later calls are ignored.
//! - `run` on a completed task is ignored: a cancelled child never runs.
//! - Dropping the last handle of a task closes its emitters.
//! - `set_completed` takes effect at most once.
//! - Terminal statuses never change.
//! - `Task` is a cheap handle: clones are the same task.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::core::Supervisor;
use crate::ctx::{Context, TaskLog};
use crate::error::TaskError;
use crate::events::Emitter;
use crate::tasks::status::TaskStatus;
use crate::vpath::VirtualPath;

/// Boxed future returned by task runners.
pub type BoxTaskFuture = BoxFuture<'static, Result<(), TaskError>>;

pub(crate) type Runner = Box<dyn FnOnce(Context) -> BoxTaskFuture + Send>;

/// Payload of file-produced events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFile {
    /// Produced file.
    pub path: VirtualPath,
    /// Free-form metadata attached by the producer.
    pub meta: Option<String>,
}

impl TaskFile {
    /// A produced file without metadata.
    pub fn new(path: VirtualPath) -> Self {
        Self { path, meta: None }
    }

    /// Returns the same file with `meta` attached.
    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }
}

/// Payload of progress events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// What the task is doing.
    pub message: String,
    /// Completion percentage (0..=100), when known.
    pub percent: Option<u8>,
}

impl Progress {
    /// A progress message without percentage.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            percent: None,
        }
    }

    /// A progress message with percentage, clamped to 100.
    pub fn percent(message: impl Into<String>, percent: u8) -> Self {
        Self {
            message: message.into(),
            percent: Some(percent.min(100)),
        }
    }
}

pub(crate) struct TaskInner {
    id: Arc<str>,
    description: RwLock<String>,
    status: RwLock<TaskStatus>,

    status_changed: Emitter<TaskStatus>,
    failed: Emitter<TaskError>,
    succeeded: Emitter<()>,
    done: Emitter<Option<TaskError>>,
    progress: Emitter<Progress>,
    file_produced: Emitter<TaskFile>,

    runner: Mutex<Option<Runner>>,
    sup: Arc<Supervisor>,

    started_at: Mutex<Option<SystemTime>>,
    completed_at: Mutex<Option<SystemTime>>,
    completed: AtomicBool,
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        // releases the hub's listener sets of a task that never completed
        self.status_changed.close();
        self.failed.close();
        self.succeeded.close();
        self.done.close();
        self.progress.close();
        self.file_produced.close();
    }
}

/// Handle to a task.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Task {
    /// Creates a task in status `Scheduled` and adds it to the supervisor registry.
    ///
    /// # Example
    /// ```rust
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use tasktree::{Config, Supervisor, Task, TaskStatus};
    ///
    /// let sup = Supervisor::builder(Config::default()).build();
    /// let task = Task::new(&sup, "hello", |ctx| async move {
    ///     ctx.log_info("hello world");
    ///     Ok(())
    /// });
    /// task.run();
    /// task.await_done().await;
    /// assert_eq!(task.status(), TaskStatus::DoneOk);
    /// # }
    /// ```
    pub fn new<F, Fut>(sup: &Arc<Supervisor>, id: impl Into<String>, runner: F) -> Self
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self::with_runner(sup, id.into(), Box::new(move |ctx: Context| runner(ctx).boxed()))
    }

    pub(crate) fn with_runner(sup: &Arc<Supervisor>, id: String, runner: Runner) -> Self {
        let id: Arc<str> = id.into();
        let hub = sup.hub();
        let task = Self {
            inner: Arc::new(TaskInner {
                description: RwLock::new(id.to_string()),
                status: RwLock::new(TaskStatus::Scheduled),
                status_changed: Emitter::new(hub, Arc::clone(&id)),
                failed: Emitter::new(hub, Arc::clone(&id)),
                succeeded: Emitter::new(hub, Arc::clone(&id)),
                done: Emitter::new(hub, Arc::clone(&id)),
                progress: Emitter::new(hub, Arc::clone(&id)),
                file_produced: Emitter::new(hub, Arc::clone(&id)),
                runner: Mutex::new(Some(runner)),
                sup: Arc::clone(sup),
                started_at: Mutex::new(None),
                completed_at: Mutex::new(None),
                completed: AtomicBool::new(false),
                id,
            }),
        };
        sup.registry().add(&task);
        task
    }

    /// Unique identifier (also the source label of every emitted event).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Human-readable description (defaults to the id).
    pub fn description(&self) -> String {
        self.inner
            .description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the description.
    pub fn set_description(&self, description: impl Into<String>) {
        *self
            .inner
            .description
            .write()
            .unwrap_or_else(PoisonError::into_inner) = description.into();
    }

    /// Returns the same task with `description` set.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.set_description(description);
        self
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> TaskStatus {
        self.inner
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// When the task path started, if it did.
    pub fn started_at(&self) -> Option<SystemTime> {
        *self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// When the task completed, if it did.
    pub fn completed_at(&self) -> Option<SystemTime> {
        *self
            .inner
            .completed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Emits every status change.
    pub fn status_changed(&self) -> &Emitter<TaskStatus> {
        &self.inner.status_changed
    }

    /// Emits the error of a failed or cancelled task.
    pub fn failed(&self) -> &Emitter<TaskError> {
        &self.inner.failed
    }

    /// Emits once when the task succeeds.
    pub fn succeeded(&self) -> &Emitter<()> {
        &self.inner.succeeded
    }

    /// Emits once on completion, with the error if any.
    pub fn done(&self) -> &Emitter<Option<TaskError>> {
        &self.inner.done
    }

    /// Emits progress reports of the runner.
    pub fn progress(&self) -> &Emitter<Progress> {
        &self.inner.progress
    }

    /// Emits files produced by the runner.
    pub fn file_produced(&self) -> &Emitter<TaskFile> {
        &self.inner.file_produced
    }

    /// Supervisor the task belongs to.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.inner.sup
    }

    /// True when both handles refer to the same task.
    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Changes the status and emits `status_changed`.
    ///
    /// Ignored once the status is terminal, and when it does not change.
    pub async fn set_status(&self, status: TaskStatus) {
        {
            let mut current = self
                .inner
                .status
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if current.is_terminal() {
                warn!(
                    task = %self.inner.id,
                    from = current.as_label(),
                    to = status.as_label(),
                    "status change after completion ignored"
                );
                return;
            }
            if *current == status {
                return;
            }
            *current = status.clone();
        }
        self.inner.status_changed.invoke(status).await;
    }

    /// Starts the task path on a new tokio task.
    ///
    /// A second call is ignored, and so is a call on a task already completed
    /// (for example one cancelled by its parent).
    pub fn run(&self) {
        if self.inner.completed.load(Ordering::Acquire) {
            warn!(task = %self.inner.id, "task already completed, run ignored");
            return;
        }
        let runner = self
            .inner
            .runner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(runner) = runner else {
            warn!(task = %self.inner.id, "task already started, run ignored");
            return;
        };
        let task = self.clone();
        tokio::spawn(async move { task.execute(runner).await });
    }

    async fn execute(self, runner: Runner) {
        *self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());

        let sup = Arc::clone(&self.inner.sup);
        let cfg = sup.config();
        let log = match TaskLog::open(
            Arc::clone(&self.inner.id),
            cfg.verbosity,
            cfg.log_dir.as_deref(),
            sup.stdout(),
        )
        .await
        {
            Ok(log) => Arc::new(log),
            Err(err) => {
                warn!(task = %self.inner.id, error = %err, "cannot open task log");
                self.set_completed(Err(err)).await;
                return;
            }
        };

        let ctx = Context::new(self.clone(), Arc::clone(&log));
        ctx.log_info(format!("START: {}", self.description()));
        self.set_status(TaskStatus::Running).await;

        let body = {
            let ctx = ctx.clone();
            async move { runner(ctx).await }
        };
        let result = match AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok(())) => match ctx.err() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            Ok(Err(err)) => Err(err),
            Err(panic) => Err(TaskError::Panicked {
                reason: panic_reason(&*panic),
            }),
        };

        match &result {
            Ok(()) => ctx.log_info("DONE"),
            Err(err) => ctx.log_error(err),
        }
        log.close();

        self.set_completed(result).await;
    }

    /// Marks the task completed.
    ///
    /// Emits `succeeded` or `failed`, updates the status, emits `done`, closes
    /// all emitters and leaves the registry. Later calls are ignored.
    pub async fn set_completed(&self, result: Result<(), TaskError>) {
        if self.inner.completed.swap(true, Ordering::AcqRel) {
            warn!(task = %self.inner.id, "task already completed, set_completed ignored");
            return;
        }
        *self
            .inner
            .completed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());

        match &result {
            Ok(()) => {
                self.inner.succeeded.invoke(()).await;
                self.set_status(TaskStatus::DoneOk).await;
            }
            Err(err) if err.is_cancellation() => {
                self.inner.failed.invoke(err.clone()).await;
                self.set_status(TaskStatus::Cancelled).await;
            }
            Err(err) => {
                self.inner.failed.invoke(err.clone()).await;
                self.set_status(TaskStatus::Failed(err.clone())).await;
            }
        }
        self.inner.done.invoke(result.err()).await;

        self.inner.status_changed.close();
        self.inner.failed.close();
        self.inner.succeeded.close();
        self.inner.done.close();
        self.inner.progress.close();
        self.inner.file_produced.close();

        self.inner.sup.registry().remove(self);
        debug!(task = %self.inner.id, status = self.status().as_label(), "task completed");
    }

    /// Waits until the task completes; returns at once if it already did.
    pub async fn await_done(&self) {
        self.inner.done.await_one().await;
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use crate::connection::shared_writer;
    use std::io::{self, Write};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn supervisor(cfg: Config) -> (Arc<Supervisor>, Capture) {
        let out = Capture::default();
        let sup = Supervisor::builder(cfg)
            .with_stdout(shared_writer(out.clone()))
            .build();
        (sup, out)
    }

    #[tokio::test]
    async fn test_status_progression_ok() {
        let (sup, _) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |_| async { Ok(()) });
        assert_eq!(task.status(), TaskStatus::Scheduled);

        let mut changes = task.status_changed().await_any().unwrap();
        let mut succeeded = task.succeeded().await_any().unwrap();
        task.run();

        assert_eq!(changes.recv().await.unwrap().payload, TaskStatus::Running);
        assert_eq!(changes.recv().await.unwrap().payload, TaskStatus::DoneOk);
        assert!(changes.recv().await.is_none());
        assert!(succeeded.recv().await.is_some());

        task.await_done().await;
        assert_eq!(task.status(), TaskStatus::DoneOk);
        assert!(task.started_at().is_some());
        assert!(task.completed_at().is_some());
    }

    #[tokio::test]
    async fn test_failing_runner() {
        let (sup, _) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |_| async { Err(TaskError::fail("test error")) });
        let mut failed = task.failed().await_any().unwrap();
        let mut done = task.done().await_any().unwrap();
        task.run();

        assert_eq!(failed.recv().await.unwrap().payload, TaskError::fail("test error"));
        let done = done.recv().await.unwrap();
        assert_eq!(done.payload, Some(TaskError::fail("test error")));
        assert_eq!(&*done.source, "TEST");
        assert_eq!(task.status().to_string(), "Err: test error");
    }

    #[tokio::test]
    async fn test_latched_context_error_wins_over_ok() {
        let (sup, _) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |ctx| async move {
            ctx.fail(TaskError::fail("latched"));
            Ok(())
        });
        task.run();
        task.await_done().await;
        assert_eq!(task.status(), TaskStatus::Failed(TaskError::fail("latched")));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let (sup, _) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |_| async { panic!("boom") });
        task.run();
        task.await_done().await;
        assert_eq!(
            task.status(),
            TaskStatus::Failed(TaskError::Panicked {
                reason: "boom".into()
            })
        );
    }

    #[tokio::test]
    async fn test_stdout_log() {
        let (sup, out) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |ctx| async move {
            ctx.log_info("ciao");
            ctx.log_detail("only in file");
            ctx.log_debug("only in file");
            Ok(())
        })
        .with_description("A task for tests.");
        task.run();
        task.await_done().await;
        assert_eq!(
            out.text(),
            "INFO: TEST: START: A task for tests.\nINFO: TEST: ciao\nINFO: TEST: DONE\n"
        );
    }

    #[tokio::test]
    async fn test_file_log_has_every_level() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config {
            log_dir: Some(tmp.path().to_path_buf()),
            ..Config::default()
        };
        let (sup, _) = supervisor(cfg);
        let task = Task::new(&sup, "TEST", |ctx| async move {
            ctx.log_warning("w");
            ctx.log_detail("d");
            ctx.log_debug("g");
            Err(TaskError::fail("e"))
        });
        task.run();
        task.await_done().await;

        let file = std::fs::read_to_string(tmp.path().join("TEST.log")).unwrap();
        assert_eq!(
            file,
            "INFO: TEST: START: TEST\nWARNING: TEST: w\nDETAIL: TEST: d\nDEBUG: TEST: g\nERROR: TEST: e\n"
        );
    }

    #[tokio::test]
    async fn test_log_sink_failure() {
        let cfg = Config {
            log_dir: Some("/nonexistent/logs".into()),
            ..Config::default()
        };
        let (sup, _) = supervisor(cfg);
        let task = Task::new(&sup, "TEST", |_| async { Ok(()) });
        task.run();
        task.await_done().await;
        assert_eq!(task.status().error().unwrap().as_label(), "task_log_sink");
    }

    #[tokio::test]
    async fn test_completion_is_final() {
        let (sup, _) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |_| async { Ok(()) });
        task.set_completed(Err(TaskError::fail("first"))).await;
        task.set_completed(Ok(())).await;
        task.set_status(TaskStatus::Running).await;
        assert_eq!(task.status(), TaskStatus::Failed(TaskError::fail("first")));

        // runner still present, but done is already closed
        task.await_done().await;
        assert!(task.done().is_closed());
    }

    #[tokio::test]
    async fn test_run_after_cancellation_is_ignored() {
        let (sup, _) = supervisor(Config::default());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = Task::new(&sup, "TEST", move |_| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        task.set_completed(Err(TaskError::CancelledByParent)).await;
        task.run();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(!ran.load(Ordering::SeqCst));
        assert!(task.started_at().is_none());
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_dropped_task_closes_emitters() {
        let (sup, _) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |_| async { Ok(()) });
        let mut done = task.done().await_any().unwrap();
        let emitter = task.progress().clone();
        assert_eq!(emitter.count().await, 0);

        drop(task);
        assert!(done.recv().await.is_none());
        assert!(emitter.is_closed());
        assert!(sup.registry().is_empty());
    }

    #[tokio::test]
    async fn test_registry_membership() {
        let (sup, _) = supervisor(Config::default());
        let task = Task::new(&sup, "TEST", |_| async { Ok(()) });
        assert_eq!(sup.registry().len(), 1);

        task.run();
        task.run();
        task.await_done().await;
        assert!(sup.registry().is_empty());
    }
}
