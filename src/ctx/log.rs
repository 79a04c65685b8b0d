//! # Task-facing log sinks.
//!
//! Every running task writes to two sinks:
//! - its own file `<log_dir>/<task id>.log` (when a log directory is configured),
//!   receiving every level up to the configured verbosity;
//! - the supervisor's shared stdout, receiving only `ERROR`, `WARNING` and `INFO`.
//!
//! Lines have the shape `<LEVEL>: <task id>: <message>`.

use std::fmt;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::connection::SharedWriter;
use crate::error::TaskError;

/// Importance of a log message, from most to least important.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Failures.
    Error,
    /// Anomalies that do not fail the task.
    Warning,
    /// Progress of the task (shown on stdout).
    Info,
    /// Operations performed by the context.
    Detail,
    /// Anything else.
    Debug,
}

impl LogLevel {
    /// Upper-case name, as written in log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Detail => "DETAIL",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// True for levels that are echoed on the shared stdout.
    pub fn is_console(&self) -> bool {
        *self <= LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sinks of one task run.
pub(crate) struct TaskLog {
    id: Arc<str>,
    verbosity: LogLevel,
    file: Mutex<Option<LineWriter<File>>>,
    stdout: SharedWriter,
    sink_failed: AtomicBool,
}

impl TaskLog {
    /// Opens (truncating) `<log_dir>/<id>.log` when `log_dir` is set.
    pub(crate) async fn open(
        id: Arc<str>,
        verbosity: LogLevel,
        log_dir: Option<&Path>,
        stdout: SharedWriter,
    ) -> Result<Self, TaskError> {
        let file = match log_dir {
            Some(dir) => {
                let path = dir.join(format!("{id}.log"));
                let file = tokio::fs::File::create(&path)
                    .await
                    .map_err(|e| TaskError::LogSink {
                        path: path.clone(),
                        error: e.to_string(),
                    })?;
                Some(LineWriter::new(file.into_std().await))
            }
            None => None,
        };
        Ok(Self {
            id,
            verbosity,
            file: Mutex::new(file),
            stdout,
            sink_failed: AtomicBool::new(false),
        })
    }

    /// Writes one formatted line if `level` passes the verbosity filter.
    pub(crate) fn line(&self, level: LogLevel, msg: fmt::Arguments<'_>) {
        if level > self.verbosity {
            return;
        }
        let line = format!("{}: {}: {}\n", level.as_str(), self.id, msg);
        self.raw(level.is_console(), line.as_bytes());
    }

    /// Writes raw bytes to the file, and to stdout when `console` is set.
    pub(crate) fn raw(&self, console: bool, bytes: &[u8]) {
        if let Some(file) = self.file.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            if let Err(err) = file.write_all(bytes) {
                self.sink_error("file", &err);
            }
        }
        if console {
            let mut out = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = out.write_all(bytes).and_then(|()| out.flush()) {
                self.sink_error("stdout", &err);
            }
        }
    }

    /// Reports the first write failure; later ones are dropped silently.
    fn sink_error(&self, sink: &'static str, err: &io::Error) {
        if !self.sink_failed.swap(true, Ordering::AcqRel) {
            warn!(task = %self.id, sink, error = %err, "task log sink write failed");
        }
    }

    /// Flushes and closes the file sink; later writes go to stdout only.
    pub(crate) fn close(&self) {
        if let Some(mut file) = self.file.lock().unwrap_or_else(|e| e.into_inner()).take() {
            if let Err(err) = file.flush() {
                self.sink_error("file", &err);
            }
        }
    }
}

/// `Write` adapter routing process output into a [`TaskLog`].
pub(crate) struct LogWriter {
    log: Arc<TaskLog>,
    console: bool,
}

impl LogWriter {
    /// Output echoed on stdout (process stdout).
    pub(crate) fn out(log: Arc<TaskLog>) -> Self {
        Self { log, console: true }
    }

    /// Output kept in the task file only (process stderr).
    pub(crate) fn err(log: Arc<TaskLog>) -> Self {
        Self {
            log,
            console: false,
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.raw(self.console, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::shared_writer;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_level_order() {
        assert!(LogLevel::Error < LogLevel::Warning);
        assert!(LogLevel::Info < LogLevel::Detail);
        assert!(LogLevel::Warning.is_console());
        assert!(!LogLevel::Debug.is_console());
        assert_eq!(LogLevel::Detail.to_string(), "DETAIL");
    }

    #[tokio::test]
    async fn test_file_and_console_split() {
        let tmp = tempfile::tempdir().unwrap();
        let out = Capture::default();
        let log = TaskLog::open("TEST".into(), LogLevel::Detail, Some(tmp.path()), shared_writer(out.clone()))
            .await
            .unwrap();

        log.line(LogLevel::Info, format_args!("ciao"));
        log.line(LogLevel::Detail, format_args!("detail"));
        log.line(LogLevel::Debug, format_args!("dropped"));
        log.raw(false, b"raw err\n");
        log.close();

        let console = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert_eq!(console, "INFO: TEST: ciao\n");

        let file = std::fs::read_to_string(tmp.path().join("TEST.log")).unwrap();
        assert_eq!(file, "INFO: TEST: ciao\nDETAIL: TEST: detail\nraw err\n");
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_broken_stdout_keeps_file_sink() {
        let tmp = tempfile::tempdir().unwrap();
        let log = TaskLog::open("TEST".into(), LogLevel::Debug, Some(tmp.path()), shared_writer(Broken))
            .await
            .unwrap();
        assert!(!log.sink_failed.load(Ordering::Acquire));

        log.line(LogLevel::Info, format_args!("one"));
        log.line(LogLevel::Error, format_args!("two"));
        log.close();

        assert!(log.sink_failed.load(Ordering::Acquire));
        let file = std::fs::read_to_string(tmp.path().join("TEST.log")).unwrap();
        assert_eq!(file, "INFO: TEST: one\nERROR: TEST: two\n");
    }

    #[tokio::test]
    async fn test_open_missing_dir_fails() {
        let err = TaskLog::open(
            "TEST".into(),
            LogLevel::Debug,
            Some(Path::new("/nonexistent/dir")),
            shared_writer(io::sink()),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.as_label(), "task_log_sink");
    }
}
