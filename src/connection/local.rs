//! Connection to the local machine, on `tokio::fs` and `tokio::process`.

use std::io::{self, Write};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, BufWriter};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{Connection, FileMeta, FileReader, FileWriter, Process, RunOptions, SharedWriter};
use crate::error::ConnectionError;
use crate::vpath::VirtualPath;

/// Files and processes of the machine running the supervisor.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    host: String,
}

impl LocalConnection {
    /// Creates a local connection answering to `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new(crate::vpath::LOCALHOST)
    }
}

fn io_err(op: &'static str, path: &VirtualPath, source: io::Error) -> ConnectionError {
    if source.kind() == io::ErrorKind::NotFound {
        return ConnectionError::NotFound {
            path: path.to_string(),
        };
    }
    ConnectionError::Io {
        op,
        path: path.to_string(),
        source,
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn host_name(&self) -> &str {
        &self.host
    }

    async fn stat(&self, path: &VirtualPath) -> Result<FileMeta, ConnectionError> {
        let meta = tokio::fs::metadata(path.path())
            .await
            .map_err(|e| io_err("stat", path, e))?;
        Ok(FileMeta {
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    async fn read_dir(&self, dir: &VirtualPath) -> Result<Vec<VirtualPath>, ConnectionError> {
        let mut entries = tokio::fs::read_dir(dir.path())
            .await
            .map_err(|e| io_err("read_dir", dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err("read_dir", dir, e))?
        {
            files.push(dir.join(entry.file_name().to_string_lossy()));
        }
        files.sort();
        Ok(files)
    }

    async fn read(&self, file: &VirtualPath) -> Result<Vec<u8>, ConnectionError> {
        tokio::fs::read(file.path())
            .await
            .map_err(|e| io_err("read", file, e))
    }

    async fn write(&self, file: &VirtualPath, content: &[u8]) -> Result<(), ConnectionError> {
        tokio::fs::write(file.path(), content)
            .await
            .map_err(|e| io_err("write", file, e))
    }

    async fn open_reader(&self, file: &VirtualPath) -> Result<FileReader, ConnectionError> {
        let f = tokio::fs::File::open(file.path())
            .await
            .map_err(|e| io_err("open_reader", file, e))?;
        Ok(Box::new(f))
    }

    async fn open_writer(&self, file: &VirtualPath) -> Result<FileWriter, ConnectionError> {
        let f = tokio::fs::File::create(file.path())
            .await
            .map_err(|e| io_err("open_writer", file, e))?;
        Ok(Box::new(BufWriter::new(f)))
    }

    async fn mk_dir(&self, dir: &VirtualPath) -> Result<(), ConnectionError> {
        tokio::fs::create_dir_all(dir.path())
            .await
            .map_err(|e| io_err("mk_dir", dir, e))
    }

    async fn rm_dir(&self, dir: &VirtualPath) -> Result<(), ConnectionError> {
        tokio::fs::remove_dir_all(dir.path())
            .await
            .map_err(|e| io_err("rm_dir", dir, e))
    }

    async fn rm_file(&self, file: &VirtualPath) -> Result<(), ConnectionError> {
        tokio::fs::remove_file(file.path())
            .await
            .map_err(|e| io_err("rm_file", file, e))
    }

    #[cfg(unix)]
    async fn link(&self, source: &VirtualPath, target: &VirtualPath) -> Result<(), ConnectionError> {
        tokio::fs::symlink(source.path(), target.path())
            .await
            .map_err(|e| io_err("link", target, e))
    }

    #[cfg(not(unix))]
    async fn link(&self, _source: &VirtualPath, target: &VirtualPath) -> Result<(), ConnectionError> {
        Err(io_err("link", target, io::Error::from(io::ErrorKind::Unsupported)))
    }

    async fn run(
        &self,
        command: &VirtualPath,
        args: &[String],
        opts: RunOptions,
    ) -> Result<Box<dyn Process>, ConnectionError> {
        let mut cmd = Command::new(command.path());
        cmd.args(args)
            .envs(opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(if opts.stdout.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(if opts.stderr.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd.path());
        }

        let mut child = cmd.spawn().map_err(|source| ConnectionError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let mut forwards = Vec::new();
        if let (Some(out), Some(w)) = (child.stdout.take(), opts.stdout) {
            forwards.push(forward(out, w));
        }
        if let (Some(err), Some(w)) = (child.stderr.take(), opts.stderr) {
            forwards.push(forward(err, w));
        }

        Ok(Box::new(LocalProcess {
            command: command.to_string(),
            child,
            forwards,
        }))
    }
}

/// Copies a process stream into a shared writer until EOF.
fn forward<R>(mut reader: R, out: SharedWriter) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut w = out.lock().unwrap_or_else(|e| e.into_inner());
                    let _ = w.write_all(&buf[..n]);
                }
            }
        }
        let mut w = out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = w.flush();
    })
}

/// A process started by [`LocalConnection::run`].
#[derive(Debug)]
pub struct LocalProcess {
    command: String,
    child: Child,
    forwards: Vec<JoinHandle<()>>,
}

#[async_trait]
impl Process for LocalProcess {
    async fn wait(&mut self) -> Result<i32, ConnectionError> {
        let status = self.child.wait().await.map_err(|source| ConnectionError::Wait {
            command: self.command.clone(),
            source,
        })?;
        for forward in self.forwards.drain(..) {
            let _ = forward.await;
        }
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&mut self) -> Result<(), ConnectionError> {
        self.child.kill().await.map_err(|source| ConnectionError::Wait {
            command: self.command.clone(),
            source,
        })
    }
}
