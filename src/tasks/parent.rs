//! # Parent task: children admission, FIFO queue and fail-fast cancellation.
//!
//! A [`ParentTask`] is a [`Task`] whose runner appends children and schedules
//! them with [`ParentTask::run_child`]. The parent completes only after every
//! appended child is done, including children appended while it waits.
//!
//! ## Admission
//! ```text
//! run_child(child)
//!   ├─ no window (unlimited):
//!   │     fail-fast && failed ─► child cancelled (never runs)
//!   │     else                 ─► child.run()
//!   └─ window (Semaphore, n slots), under the waiting-queue lock:
//!         queue not empty      ─► push_back           (strict FIFO)
//!         try_acquire ok       ─► admit(child, slot)
//!         no slot              ─► push_back
//!
//! admit(child, slot):
//!   register done listener ─► run (or cancel when fail-fast && failed)
//!   on done: mark failed (fail-fast) ─► lock queue ─► pop_front
//!              ├─ Some(next) ─► admit(next, slot)   (slot handed over)
//!              └─ None       ─► release slot
//! ```
//!
//! ## Rules
//! - `run_child` never blocks; cancellations complete on a spawned tokio task.
//! - A freed slot goes to the oldest waiter; a new `run_child` never overtakes it.
//! - Appending the same child twice is a usage error (panic).
//! - Changing parallelism after a child was scheduled is a usage error (panic).
//! - A runner that appended no child fails with [`TaskError::NoChildren`].
//! - A panicking runner still waits for its children, then fails with
//!   [`TaskError::Panicked`].
//! - Child failures never change the parent's own status, only
//!   [`ParentTask::has_failed`].
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use tasktree::{Config, Supervisor, TaskStatus};
//!
//! let sup = Supervisor::builder(Config::default()).build();
//! let parent = sup.parent("PARENT", {
//!     let sup = sup.clone();
//!     move |_ctx, parent| async move {
//!         for i in 0..3 {
//!             let child = sup.task(format!("CHILD{i}"), |_| async { Ok(()) });
//!             parent.append_child(child.clone());
//!             parent.run_child(child);
//!         }
//!         Ok(())
//!     }
//! });
//! parent.set_max_parallelism(1);
//! parent.run();
//! parent.await_done().await;
//! assert_eq!(parent.status(), TaskStatus::DoneOk);
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::core::Supervisor;
use crate::ctx::Context;
use crate::error::TaskError;
use crate::tasks::handle::TaskRef;
use crate::tasks::status::TaskStatus;
use crate::tasks::task::{Runner, Task, panic_reason};

struct ParentInner {
    id: Arc<str>,
    children: Mutex<Vec<TaskRef>>,
    waiting: Mutex<VecDeque<TaskRef>>,
    window: Mutex<Option<Arc<Semaphore>>>,
    fail_fast: AtomicBool,
    failed: Mutex<bool>,
    started: AtomicBool,
}

impl ParentInner {
    fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Acquire)
    }

    fn mark_failed(&self) {
        *self.failed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Failed flag, also latched from any child already observed as failed.
    fn has_failed(&self) -> bool {
        if *self.failed.lock().unwrap_or_else(PoisonError::into_inner) {
            return true;
        }
        let any_failed = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|c| c.status().is_failure());
        if any_failed {
            self.mark_failed();
        }
        any_failed
    }

    fn should_cancel(&self) -> bool {
        self.fail_fast() && self.has_failed()
    }

    fn cancel(&self, child: TaskRef) {
        debug!(parent = %self.id, child = child.id(), "child cancelled by fail-fast parent");
        tokio::spawn(async move { child.set_completed(Err(TaskError::CancelledByParent)).await });
    }

    /// Runs `child` holding a window slot; the slot moves on when it is done.
    ///
    /// Called with the waiting queue locked (or with the queue owner's guarantee
    /// that no other admission can interleave).
    fn admit(self: &Arc<Self>, child: TaskRef, permit: OwnedSemaphorePermit) {
        let done = child.task().done().add_listener();
        let cancel = self.should_cancel();

        let parent = Arc::clone(self);
        let watched = Arc::clone(&child);
        tokio::spawn(async move {
            if let Some(mut done) = done {
                done.recv().await;
            }
            if parent.fail_fast() && watched.status().is_failure() {
                parent.mark_failed();
            }
            parent.hand_over(permit);
        });

        if cancel {
            self.cancel(child);
        } else {
            debug!(parent = %self.id, child = child.id(), "child admitted");
            child.run();
        }
    }

    /// Gives a freed slot to the oldest waiter, or releases it.
    fn hand_over(self: &Arc<Self>, permit: OwnedSemaphorePermit) {
        let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
        match waiting.pop_front() {
            Some(next) => self.admit(next, permit),
            None => drop(permit),
        }
        drop(waiting);
    }
}

/// A task that owns and schedules children.
///
/// Cheap to clone; clones are the same parent.
#[derive(Clone)]
pub struct ParentTask {
    task: Task,
    inner: Arc<ParentInner>,
}

impl fmt::Debug for ParentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentTask")
            .field("id", &self.task.id())
            .field("status", &self.task.status())
            .field("children", &self.children().len())
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl ParentTask {
    /// Creates a parent whose runner receives the context and the parent itself.
    ///
    /// The admission window starts from [`Config::max_parallelism`](crate::Config::max_parallelism).
    pub fn new<F, Fut>(sup: &Arc<Supervisor>, id: impl Into<String>, runner: F) -> Self
    where
        F: FnOnce(Context, ParentTask) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let id = id.into();
        let inner = Arc::new(ParentInner {
            id: id.as_str().into(),
            children: Mutex::new(Vec::new()),
            waiting: Mutex::new(VecDeque::new()),
            window: Mutex::new(
                sup.config()
                    .parallelism_limit()
                    .map(|n| Arc::new(Semaphore::new(n))),
            ),
            fail_fast: AtomicBool::new(false),
            failed: Mutex::new(false),
            started: AtomicBool::new(false),
        });

        let runner_inner = Arc::clone(&inner);
        let wrapped: Runner = Box::new(move |ctx: Context| {
            let parent = ParentTask {
                task: ctx.task().clone(),
                inner: runner_inner,
            };
            async move {
                let body = {
                    let parent = parent.clone();
                    async move { runner(ctx, parent).await }
                };
                // children still run after a runner panic: wait for them first
                let result = match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(TaskError::Panicked {
                        reason: panic_reason(&*panic),
                    }),
                };
                let children = parent.await_children().await;
                match result {
                    Err(err @ TaskError::Panicked { .. }) => Err(err),
                    result => children.and(result),
                }
            }
            .boxed()
        });

        Self {
            task: Task::with_runner(sup, id, wrapped),
            inner,
        }
    }

    /// The underlying task.
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Unique identifier.
    pub fn id(&self) -> &str {
        self.task.id()
    }

    /// Snapshot of the status.
    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Starts the parent's runner.
    pub fn run(&self) {
        self.task.run()
    }

    /// Waits until the parent (and so every child) is done.
    pub async fn await_done(&self) {
        self.task.await_done().await
    }

    /// Adds children to the set the parent waits for.
    ///
    /// # Panics
    /// When a child (or the same task behind another handle) was already appended.
    pub fn append_children<I>(&self, children: I)
    where
        I: IntoIterator,
        I::Item: Into<TaskRef>,
    {
        let mut set = self
            .inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for child in children {
            let child: TaskRef = child.into();
            if set.iter().any(|c| c.task().ptr_eq(child.task())) {
                panic!("task {} already appended", child.id());
            }
            set.push(child);
        }
    }

    /// Adds one child; see [`append_children`](Self::append_children).
    pub fn append_child(&self, child: impl Into<TaskRef>) {
        self.append_children([child.into()]);
    }

    /// Limits how many children run at once; `0` removes the limit.
    ///
    /// # Panics
    /// When a child was already scheduled with [`run_child`](Self::run_child).
    pub fn set_max_parallelism(&self, n: usize) {
        if self.inner.started.load(Ordering::Acquire) {
            panic!("cannot change parallelism: a child task has already been started");
        }
        self.inner
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .inner
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = (n > 0).then(|| Arc::new(Semaphore::new(n)));
    }

    /// After the first child failure, children not yet started are cancelled.
    pub fn set_fail_fast(&self) {
        self.inner.fail_fast.store(true, Ordering::Release);
    }

    /// True when fail-fast is set and a child has failed.
    pub fn has_failed(&self) -> bool {
        self.inner.fail_fast() && self.inner.has_failed()
    }

    /// Snapshot of the appended children.
    pub fn children(&self) -> Vec<TaskRef> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of children queued for a window slot.
    pub fn waiting(&self) -> usize {
        self.inner
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Schedules `child`: runs it now, queues it, or cancels it (fail-fast).
    ///
    /// Never blocks.
    pub fn run_child(&self, child: impl Into<TaskRef>) {
        let child: TaskRef = child.into();
        self.inner.started.store(true, Ordering::Release);

        let window = self
            .inner
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(window) = window else {
            if self.inner.should_cancel() {
                self.inner.cancel(child);
                return;
            }
            if self.inner.fail_fast() {
                let done = child.task().done().add_listener();
                let parent = Arc::clone(&self.inner);
                let watched = Arc::clone(&child);
                tokio::spawn(async move {
                    if let Some(mut done) = done {
                        done.recv().await;
                    }
                    if watched.status().is_failure() {
                        parent.mark_failed();
                    }
                });
            }
            child.run();
            return;
        };

        let mut waiting = self
            .inner
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !waiting.is_empty() {
            debug!(parent = %self.inner.id, child = child.id(), "child queued behind waiters");
            waiting.push_back(child);
            return;
        }
        match window.try_acquire_owned() {
            Ok(permit) => self.inner.admit(child, permit),
            Err(_) => {
                debug!(parent = %self.inner.id, child = child.id(), "window full, child queued");
                waiting.push_back(child);
            }
        }
        drop(waiting);
    }

    /// Waits for every appended child, including ones appended meanwhile.
    async fn await_children(&self) -> Result<(), TaskError> {
        let mut awaited = 0;
        loop {
            let pending: Vec<TaskRef> = {
                let children = self
                    .inner
                    .children
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                children[awaited..].to_vec()
            };
            if pending.is_empty() {
                break;
            }
            for child in &pending {
                child.await_done().await;
            }
            awaited += pending.len();
        }
        if awaited == 0 {
            return Err(TaskError::NoChildren);
        }
        Ok(())
    }
}
