//! # Hosts, files and processes behind a uniform async contract.
//!
//! The [`Context`](crate::Context) façade never touches the filesystem or
//! spawns processes directly: it resolves the host of each
//! [`VirtualPath`] to a [`Connection`] through the [`Connections`] resolver
//! and calls the backend from there.
//!
//! ## Resolution
//! ```text
//! resolve(host)
//!   ├─ cached / registered connection ──► reuse
//!   ├─ configured Local host          ──► LocalConnection (cached)
//!   ├─ configured Ssh host            ──► TransportUnavailable (register one)
//!   └─ not configured                 ──► UnknownHost
//! ```
//!
//! Remote transports are plugged in with
//! [`SupervisorBuilder::with_connection`](crate::SupervisorBuilder::with_connection).

mod local;

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::config::{HostConfig, HostKind};
use crate::error::ConnectionError;
use crate::vpath::VirtualPath;

pub use local::{LocalConnection, LocalProcess};

/// Writer shared between tasks, processes and the supervisor.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Wraps a writer into a [`SharedWriter`].
pub fn shared_writer(w: impl Write + Send + 'static) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(w)))
}

/// Streaming reader of a file.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming writer of a file; `shutdown` flushes and closes it.
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Metadata of a file or directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileMeta {
    /// True for directories.
    pub is_dir: bool,
    /// Size in bytes.
    pub len: u64,
    /// Last modification time, when the backend knows it.
    pub modified: Option<SystemTime>,
}

/// Options of [`Connection::run`].
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Working directory of the process.
    pub cwd: Option<VirtualPath>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Receives the process stdout (discarded when `None`).
    pub stdout: Option<SharedWriter>,
    /// Receives the process stderr (discarded when `None`).
    pub stderr: Option<SharedWriter>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// # A started process.
#[async_trait]
pub trait Process: Send {
    /// Waits for the process to exit and for its output to be forwarded.
    ///
    /// Returns the exit code (`-1` when terminated by a signal).
    async fn wait(&mut self) -> Result<i32, ConnectionError>;

    /// Kills the process.
    async fn kill(&mut self) -> Result<(), ConnectionError>;
}

/// # Access to the files and processes of one host.
///
/// All paths passed to a connection belong to its host; the host part of the
/// [`VirtualPath`] is used only for rendering and for building returned paths.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Name of the host as configured.
    fn host_name(&self) -> &str;

    /// Metadata of `path`; missing paths fail with an error for which
    /// [`ConnectionError::is_not_found`] is true.
    async fn stat(&self, path: &VirtualPath) -> Result<FileMeta, ConnectionError>;

    /// Entries of `dir`, sorted by path.
    async fn read_dir(&self, dir: &VirtualPath) -> Result<Vec<VirtualPath>, ConnectionError>;

    /// Whole content of `file`.
    async fn read(&self, file: &VirtualPath) -> Result<Vec<u8>, ConnectionError>;

    /// Creates or truncates `file` with `content`.
    async fn write(&self, file: &VirtualPath, content: &[u8]) -> Result<(), ConnectionError>;

    /// Opens `file` for streaming reads.
    async fn open_reader(&self, file: &VirtualPath) -> Result<FileReader, ConnectionError>;

    /// Creates or truncates `file` for streaming writes.
    ///
    /// Data is durable only after the writer is shut down.
    async fn open_writer(&self, file: &VirtualPath) -> Result<FileWriter, ConnectionError>;

    /// Creates `dir` and any missing parent.
    async fn mk_dir(&self, dir: &VirtualPath) -> Result<(), ConnectionError>;

    /// Removes `dir` recursively.
    async fn rm_dir(&self, dir: &VirtualPath) -> Result<(), ConnectionError>;

    /// Removes a single file.
    async fn rm_file(&self, file: &VirtualPath) -> Result<(), ConnectionError>;

    /// Creates a symbolic link at `target` pointing to `source`.
    async fn link(&self, source: &VirtualPath, target: &VirtualPath) -> Result<(), ConnectionError>;

    /// Starts `command` with `args`.
    async fn run(
        &self,
        command: &VirtualPath,
        args: &[String],
        opts: RunOptions,
    ) -> Result<Box<dyn Process>, ConnectionError>;
}

/// Resolves host names to connections, caching them.
pub struct Connections {
    config_name: String,
    hosts: HashMap<String, HostConfig>,
    cache: Mutex<HashMap<String, Arc<dyn Connection>>>,
}

impl fmt::Debug for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connections")
            .field("config_name", &self.config_name)
            .field("hosts", &self.hosts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Connections {
    /// Creates a resolver over the configured `hosts`.
    pub fn new(config_name: impl Into<String>, hosts: HashMap<String, HostConfig>) -> Self {
        Self {
            config_name: config_name.into(),
            hosts,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `conn` under `name`, replacing any previous connection.
    pub fn register(&self, name: impl Into<String>, conn: Arc<dyn Connection>) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(name.into(), conn);
    }

    /// Returns the connection for `host`.
    pub fn resolve(&self, host: &str) -> Result<Arc<dyn Connection>, ConnectionError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = cache.get(host) {
            return Ok(Arc::clone(conn));
        }

        let Some(cfg) = self.hosts.get(host) else {
            return Err(ConnectionError::UnknownHost {
                config: self.config_name.clone(),
                host: host.to_string(),
            });
        };

        match cfg.kind {
            HostKind::Local => {
                debug!(host, "opening local connection");
                let conn: Arc<dyn Connection> = Arc::new(LocalConnection::new(host));
                cache.insert(host.to_string(), Arc::clone(&conn));
                Ok(conn)
            }
            kind @ HostKind::Ssh => Err(ConnectionError::TransportUnavailable {
                config: self.config_name.clone(),
                host: host.to_string(),
                kind: kind.as_str(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn connections() -> Connections {
        let cfg = Config::default().with_host("drihm", HostConfig::ssh("localhost", 2222, "andrea"));
        Connections::new("test-hosts", cfg.hosts)
    }

    #[test]
    fn test_resolve_localhost_is_cached() {
        let conns = connections();
        let a = conns.resolve("localhost").unwrap();
        let b = conns.resolve("localhost").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.host_name(), "localhost");
    }

    #[test]
    fn test_resolve_unknown_host() {
        let err = connections().resolve("peppa").err().unwrap();
        assert_eq!(
            err.to_string(),
            "wrong configuration \"test-hosts\": unknown host `peppa`"
        );
    }

    #[test]
    fn test_resolve_ssh_needs_registration() {
        let conns = connections();
        let err = conns.resolve("drihm").err().unwrap();
        assert_eq!(err.as_label(), "connection_transport_unavailable");

        conns.register("drihm", Arc::new(LocalConnection::new("drihm")));
        assert_eq!(conns.resolve("drihm").unwrap().host_name(), "drihm");
    }
}
