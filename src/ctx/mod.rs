//! # Context: what a task runner works with.
//!
//! A [`Context`] is handed to every runner. It offers file and process
//! operations on any configured host, leveled logging to the task sinks, and
//! publication of the task's progress and produced files.
//!
//! ## Error latching
//! The first failing operation latches its error; every later operation is a
//! no-op returning an empty value. When the runner returns `Ok(())` while an
//! error is latched, the task fails with that error. Latched errors render as
//! `<operation>: <step>: <cause>`:
//!
//! ```text
//! Exists `drum:.`: connections.resolve: wrong configuration "default": unknown host `drum`
//! ```
//!
//! ## Example
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use tasktree::{Config, Supervisor, TaskStatus, VirtualPath};
//!
//! let sup = Supervisor::builder(Config::default()).build();
//! let dir = std::env::temp_dir().join(format!("tasktree-doc-{}", std::process::id()));
//! let root = VirtualPath::local(dir.to_string_lossy());
//!
//! let task = sup.task("write", move |ctx| async move {
//!     ctx.mk_dir(&root).await;
//!     ctx.write_string(&root.join("a.txt"), "ciao\n").await;
//!     assert_eq!(ctx.read_string(&root.join("a.txt")).await, "ciao\n");
//!     ctx.rm_dir(&root).await;
//!     Ok(())
//! });
//! task.run();
//! task.await_done().await;
//! assert_eq!(task.status(), TaskStatus::DoneOk);
//! # }
//! ```

mod log;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::connection::{
    Connection, FileMeta, FileReader, FileWriter, Process, RunOptions, shared_writer,
};
use crate::error::{ConnectionError, TaskError};
use crate::tasks::{Progress, Task, TaskFile};
use crate::vpath::VirtualPath;

pub use log::LogLevel;
pub(crate) use log::{LogWriter, TaskLog};

struct ContextInner {
    task: Task,
    log: Arc<TaskLog>,
    err: Mutex<Option<TaskError>>,
}

/// Façade over connections, logs and task events for one task run.
///
/// Cheap to clone; clones share the latched error.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("task", &self.inner.task.id())
            .field("err", &self.err())
            .finish()
    }
}

impl Context {
    pub(crate) fn new(task: Task, log: Arc<TaskLog>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                task,
                log,
                err: Mutex::new(None),
            }),
        }
    }

    /// Id of the task this context runs.
    pub fn id(&self) -> &str {
        self.inner.task.id()
    }

    /// The task this context runs.
    pub fn task(&self) -> &Task {
        &self.inner.task
    }

    /// The first latched error, if any.
    pub fn err(&self) -> Option<TaskError> {
        self.inner
            .err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True once an error is latched.
    pub fn failed(&self) -> bool {
        self.inner
            .err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Latches `err` unless an error is already latched.
    pub fn fail(&self, err: TaskError) {
        let mut slot = self.inner.err.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            debug!(task = self.id(), error = %err, "context error latched");
            *slot = Some(err);
        }
    }

    fn latch(&self, operation: &str, step: &str, err: impl fmt::Display) {
        self.fail(TaskError::Context {
            operation: operation.to_string(),
            step: step.to_string(),
            error: err.to_string(),
        });
    }

    /// Starts an operation: `None` if an error is already latched.
    fn begin(&self, operation: impl FnOnce() -> String) -> Option<String> {
        if self.failed() {
            return None;
        }
        let operation = operation();
        self.log_detail(format!("\u{27f6} {operation}"));
        Some(operation)
    }

    fn resolve(&self, operation: &str, host: &str) -> Option<Arc<dyn Connection>> {
        match self.inner.task.supervisor().connections().resolve(host) {
            Ok(conn) => Some(conn),
            Err(err) => {
                self.latch(operation, "connections.resolve", err);
                None
            }
        }
    }

    async fn stat_inner(
        &self,
        operation: &str,
        path: &VirtualPath,
    ) -> Option<Result<FileMeta, ConnectionError>> {
        let conn = self.resolve(operation, path.host())?;
        Some(conn.stat(path).await)
    }

    /// True when `path` exists.
    pub async fn exists(&self, path: &VirtualPath) -> bool {
        let Some(op) = self.begin(|| format!("Exists `{path}`")) else {
            return false;
        };
        match self.stat_inner(&op, path).await {
            Some(Ok(_)) => true,
            Some(Err(err)) if err.is_not_found() => false,
            Some(Err(err)) => {
                self.latch(&op, "conn.stat", err);
                false
            }
            None => false,
        }
    }

    /// True when `path` exists and is not a directory.
    pub async fn is_file(&self, path: &VirtualPath) -> bool {
        let Some(op) = self.begin(|| format!("IsFile `{path}`")) else {
            return false;
        };
        match self.stat_inner(&op, path).await {
            Some(Ok(meta)) => !meta.is_dir,
            Some(Err(err)) if err.is_not_found() => false,
            Some(Err(err)) => {
                self.latch(&op, "conn.stat", err);
                false
            }
            None => false,
        }
    }

    /// Metadata of `path`.
    pub async fn stat(&self, path: &VirtualPath) -> Option<FileMeta> {
        let op = self.begin(|| format!("Stat `{path}`"))?;
        match self.stat_inner(&op, path).await? {
            Ok(meta) => Some(meta),
            Err(err) => {
                self.latch(&op, "conn.stat", err);
                None
            }
        }
    }

    /// Entries of `dir`, sorted.
    pub async fn read_dir(&self, dir: &VirtualPath) -> Vec<VirtualPath> {
        let Some(op) = self.begin(|| format!("ReadDir `{dir}`")) else {
            return Vec::new();
        };
        let Some(conn) = self.resolve(&op, dir.host()) else {
            return Vec::new();
        };
        match conn.read_dir(dir).await {
            Ok(files) => files,
            Err(err) => {
                self.latch(&op, "conn.read_dir", err);
                Vec::new()
            }
        }
    }

    /// Content of `file` as UTF-8 text.
    pub async fn read_string(&self, file: &VirtualPath) -> String {
        let Some(op) = self.begin(|| format!("ReadString from `{file}`")) else {
            return String::new();
        };
        let Some(conn) = self.resolve(&op, file.host()) else {
            return String::new();
        };
        match conn.read(file).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    self.latch(&op, "String::from_utf8", err);
                    String::new()
                }
            },
            Err(err) => {
                self.latch(&op, "conn.read", err);
                String::new()
            }
        }
    }

    /// Creates or truncates `file` with `content`.
    pub async fn write_string(&self, file: &VirtualPath, content: &str) {
        let Some(op) = self.begin(|| format!("WriteString to `{file}`")) else {
            return;
        };
        let Some(conn) = self.resolve(&op, file.host()) else {
            return;
        };
        if let Err(err) = conn.write(file, content.as_bytes()).await {
            self.latch(&op, "conn.write", err);
        }
    }

    /// Opens `file` for streaming reads.
    pub async fn open_reader(&self, file: &VirtualPath) -> Option<FileReader> {
        let op = self.begin(|| format!("OpenReader from `{file}`"))?;
        let conn = self.resolve(&op, file.host())?;
        match conn.open_reader(file).await {
            Ok(reader) => Some(reader),
            Err(err) => {
                self.latch(&op, "conn.open_reader", err);
                None
            }
        }
    }

    /// Creates or truncates `file` and returns a handle to write to.
    ///
    /// The content is complete only after the handle is shut down
    /// (`AsyncWriteExt::shutdown`).
    pub async fn open_writer(&self, file: &VirtualPath) -> Option<FileWriter> {
        let op = self.begin(|| format!("OpenWriter to `{file}`"))?;
        let conn = self.resolve(&op, file.host())?;
        match conn.open_writer(file).await {
            Ok(writer) => Some(writer),
            Err(err) => {
                self.latch(&op, "conn.open_writer", err);
                None
            }
        }
    }

    /// Streams `from` into `to`, possibly across hosts.
    pub async fn copy(&self, from: &VirtualPath, to: &VirtualPath) {
        let Some(op) = self.begin(|| format!("Copy from `{from}` to `{to}`")) else {
            return;
        };
        let Some(from_conn) = self.resolve(&op, from.host()) else {
            return;
        };
        let Some(to_conn) = self.resolve(&op, to.host()) else {
            return;
        };
        let mut reader = match from_conn.open_reader(from).await {
            Ok(reader) => reader,
            Err(err) => {
                self.latch(&op, "from_conn.open_reader", err);
                return;
            }
        };
        let mut writer = match to_conn.open_writer(to).await {
            Ok(writer) => writer,
            Err(err) => {
                self.latch(&op, "to_conn.open_writer", err);
                return;
            }
        };
        if let Err(err) = tokio::io::copy(&mut reader, &mut writer).await {
            self.latch(&op, "io::copy", err);
            return;
        }
        if let Err(err) = writer.shutdown().await {
            self.latch(&op, "writer.shutdown", err);
        }
    }

    /// Copies `from` to `to`, then removes `from`.
    pub async fn move_file(&self, from: &VirtualPath, to: &VirtualPath) {
        self.copy(from, to).await;
        self.rm_file(from).await;
    }

    /// Creates a symbolic link at `to` pointing to `from` (on the host of `from`).
    pub async fn link(&self, from: &VirtualPath, to: &VirtualPath) {
        let Some(op) = self.begin(|| format!("Link from {from} to {to}")) else {
            return;
        };
        let Some(conn) = self.resolve(&op, from.host()) else {
            return;
        };
        if let Err(err) = conn.link(from, to).await {
            self.latch(&op, "conn.link", err);
        }
    }

    /// Creates `dir` and its missing parents.
    pub async fn mk_dir(&self, dir: &VirtualPath) {
        let Some(op) = self.begin(|| format!("MkDir {dir}")) else {
            return;
        };
        let Some(conn) = self.resolve(&op, dir.host()) else {
            return;
        };
        if let Err(err) = conn.mk_dir(dir).await {
            self.latch(&op, "conn.mk_dir", err);
        }
    }

    /// Removes `dir` recursively.
    pub async fn rm_dir(&self, dir: &VirtualPath) {
        let Some(op) = self.begin(|| format!("RmDir {dir}")) else {
            return;
        };
        let Some(conn) = self.resolve(&op, dir.host()) else {
            return;
        };
        if let Err(err) = conn.rm_dir(dir).await {
            self.latch(&op, "conn.rm_dir", err);
        }
    }

    /// Removes a single file.
    pub async fn rm_file(&self, file: &VirtualPath) {
        let Some(op) = self.begin(|| format!("RmFile {file}")) else {
            return;
        };
        let Some(conn) = self.resolve(&op, file.host()) else {
            return;
        };
        if let Err(err) = conn.rm_file(file).await {
            self.latch(&op, "conn.rm_file", err);
        }
    }

    /// Starts `command` on its host and returns the process.
    pub async fn run(
        &self,
        command: &VirtualPath,
        args: &[&str],
        opts: RunOptions,
    ) -> Option<Box<dyn Process>> {
        let op = self.begin(|| format!("Run {command} {}", args.join(" ")))?;
        let conn = self.resolve(&op, command.host())?;
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match conn.run(command, &args, opts).await {
            Ok(proc) => Some(proc),
            Err(err) => {
                self.latch(&op, "conn.run", err);
                None
            }
        }
    }

    /// Runs `command` to completion with its output routed to the task sinks.
    ///
    /// stdout goes to the task file and the shared stdout, stderr to the task
    /// file only, unless `opts` already routes them. A non-zero exit code
    /// latches an error.
    pub async fn exec(&self, command: &VirtualPath, args: &[&str], mut opts: RunOptions) {
        if self.failed() {
            return;
        }
        self.log_info(format!("START {command} {}", args.join(" ")));
        if opts.stdout.is_none() {
            opts.stdout = Some(shared_writer(LogWriter::out(Arc::clone(&self.inner.log))));
        }
        if opts.stderr.is_none() {
            opts.stderr = Some(shared_writer(LogWriter::err(Arc::clone(&self.inner.log))));
        }
        let Some(mut proc) = self.run(command, args, opts).await else {
            return;
        };
        let op = format!("Exec {command}");
        match proc.wait().await {
            Ok(0) => self.log_info(format!("COMPLETED OK {command}")),
            Ok(code) => self.latch(&op, "process.wait", format!("exit status {code}")),
            Err(err) => self.latch(&op, "process.wait", err),
        }
    }

    /// Logs at `ERROR` (file and stdout).
    pub fn log_error(&self, msg: impl fmt::Display) {
        self.log(LogLevel::Error, msg);
    }

    /// Logs at `WARNING` (file and stdout).
    pub fn log_warning(&self, msg: impl fmt::Display) {
        self.log(LogLevel::Warning, msg);
    }

    /// Logs at `INFO` (file and stdout).
    pub fn log_info(&self, msg: impl fmt::Display) {
        self.log(LogLevel::Info, msg);
    }

    /// Logs at `DETAIL` (file only).
    pub fn log_detail(&self, msg: impl fmt::Display) {
        self.log(LogLevel::Detail, msg);
    }

    /// Logs at `DEBUG` (file only).
    pub fn log_debug(&self, msg: impl fmt::Display) {
        self.log(LogLevel::Debug, msg);
    }

    /// Logs `msg` at `level`, subject to the configured verbosity.
    pub fn log(&self, level: LogLevel, msg: impl fmt::Display) {
        self.inner.log.line(level, format_args!("{msg}"));
    }

    /// Writes raw text to the task file and the shared stdout.
    pub fn out_print(&self, text: impl AsRef<str>) {
        self.inner.log.raw(true, text.as_ref().as_bytes());
    }

    /// Writes raw text to the task file only.
    pub fn err_print(&self, text: impl AsRef<str>) {
        self.inner.log.raw(false, text.as_ref().as_bytes());
    }

    /// Emits a progress event on the task.
    pub async fn report_progress(&self, progress: Progress) {
        self.inner.task.progress().invoke(progress).await;
    }

    /// Emits a file-produced event on the task.
    pub async fn produce_file(&self, file: TaskFile) {
        self.inner.task.file_produced().invoke(file).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Supervisor, TaskStatus};

    async fn run_in_task<F, Fut>(f: F) -> Task
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let sup = Supervisor::builder(Config::default())
            .with_stdout(shared_writer(std::io::sink()))
            .build();
        let task = Task::new(&sup, "TEST", f);
        task.run();
        task.await_done().await;
        task
    }

    #[tokio::test]
    async fn test_file_operations() {
        let tmp = tempfile::tempdir().unwrap();
        let root = VirtualPath::local(tmp.path().to_string_lossy());

        let task = run_in_task(move |ctx| async move {
            let dir = root.join("new-dir");
            assert!(!ctx.exists(&dir).await);
            ctx.mk_dir(&dir).await;
            assert!(ctx.exists(&dir).await);
            assert!(!ctx.is_file(&dir).await);

            ctx.write_string(&dir.join("file1.txt"), "ciao\n").await;
            assert!(ctx.is_file(&dir.join("file1.txt")).await);
            ctx.copy(&dir.join("file1.txt"), &dir.join("file2.txt")).await;
            ctx.move_file(&dir.join("file2.txt"), &dir.join("file3.txt")).await;
            assert!(!ctx.exists(&dir.join("file2.txt")).await);
            assert_eq!(ctx.read_string(&dir.join("file3.txt")).await, "ciao\n");

            let names: Vec<_> = ctx.read_dir(&dir).await.iter().map(|p| p.file_name()).collect();
            assert_eq!(names, vec!["file1.txt", "file3.txt"]);
            assert_eq!(ctx.stat(&dir.join("file1.txt")).await.unwrap().len, 5);

            ctx.rm_file(&dir.join("file1.txt")).await;
            ctx.rm_dir(&dir).await;
            assert!(!ctx.exists(&dir).await);
            assert!(ctx.err().is_none());
            Ok(())
        })
        .await;
        assert_eq!(task.status(), TaskStatus::DoneOk);
    }

    #[tokio::test]
    async fn test_streaming_write_and_copy() {
        use tokio::io::AsyncReadExt;

        let tmp = tempfile::tempdir().unwrap();
        let root = VirtualPath::local(tmp.path().to_string_lossy());

        let task = run_in_task(move |ctx| async move {
            let src = root.join("big.txt");
            let mut w = ctx.open_writer(&src).await.unwrap();
            for i in 0..1000 {
                w.write_all(format!("row {i}\n").as_bytes()).await.unwrap();
            }
            w.shutdown().await.unwrap();

            let dst = root.join("copy.txt");
            ctx.copy(&src, &dst).await;
            let mut copied = String::new();
            ctx.open_reader(&dst)
                .await
                .unwrap()
                .read_to_string(&mut copied)
                .await
                .unwrap();
            assert_eq!(copied.lines().count(), 1000);
            assert!(copied.ends_with("row 999\n"));

            ctx.copy(&root.join("missing.txt"), &dst).await;
            Ok(())
        })
        .await;
        let err = task.status().error().unwrap().to_string();
        assert!(err.starts_with("Copy from `localhost:"), "{err}");
        assert!(err.contains("from_conn.open_reader"), "{err}");
    }

    #[tokio::test]
    async fn test_unknown_host_latches() {
        let task = run_in_task(|ctx| async move {
            assert!(!ctx.exists(&"drum:.".parse().unwrap()).await);
            // later operations are no-ops
            ctx.mk_dir(&VirtualPath::local("/nonexistent/never")).await;
            Ok(())
        })
        .await;
        assert_eq!(
            task.status().to_string(),
            "Err: Exists `drum:.`: connections.resolve: wrong configuration \"default\": unknown host `drum`"
        );
    }

    #[tokio::test]
    async fn test_link_error_message() {
        let task = run_in_task(|ctx| async move {
            let bad: VirtualPath = "peppa:./bad".parse().unwrap();
            ctx.link(&bad, &bad).await;
            Ok(())
        })
        .await;
        assert_eq!(
            task.status().error().unwrap().to_string(),
            "Link from peppa:./bad to peppa:./bad: connections.resolve: wrong configuration \"default\": unknown host `peppa`"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_non_zero_exit() {
        let task = run_in_task(|ctx| async move {
            let sh = VirtualPath::local("/bin/sh");
            ctx.exec(&sh, &["-c", "exit 0"], RunOptions::default()).await;
            assert!(ctx.err().is_none());
            ctx.exec(&sh, &["-c", "echo out; exit 2"], RunOptions::default()).await;
            Ok(())
        })
        .await;
        assert_eq!(
            task.status().error().unwrap().to_string(),
            "Exec localhost:/bin/sh: process.wait: exit status 2"
        );
    }

    #[tokio::test]
    async fn test_events_from_context() {
        let sup = Supervisor::builder(Config::default())
            .with_stdout(shared_writer(std::io::sink()))
            .build();
        let task = Task::new(&sup, "TEST", |ctx| async move {
            ctx.report_progress(Progress::percent("half", 50)).await;
            ctx.produce_file(TaskFile::new(VirtualPath::local("/tmp/out.nc"))).await;
            Ok(())
        });
        let mut progress = task.progress().await_any().unwrap();
        let mut files = task.file_produced().await_any().unwrap();
        task.run();

        assert_eq!(progress.recv().await.unwrap().payload.percent, Some(50));
        assert_eq!(files.recv().await.unwrap().payload.path.to_string(), "localhost:/tmp/out.nc");
        task.await_done().await;
        assert!(files.recv().await.is_none());
    }
}
