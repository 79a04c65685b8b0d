//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the [`Supervisor`](crate::Supervisor).
//!
//! Config is used in three ways:
//! 1. **Supervisor creation**: `Supervisor::builder(config).build()`
//! 2. **Task defaults**: new parents start from [`Config::parallelism_limit`],
//!    task contexts filter logs with [`Config::verbosity`]
//! 3. **Host resolution**: [`Connections`](crate::Connections) reads [`Config::hosts`]
//!
//! ## Sentinel values
//! - `max_parallelism = 0` → unlimited (no admission window)
//! - `log_dir = None` → no per-task log files, only the shared stdout sink
//! - `listener_capacity = 0` → clamped to 1

use std::collections::HashMap;
use std::path::PathBuf;

use crate::ctx::LogLevel;

/// Kind of transport used to reach a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKind {
    /// Processes and files on the local machine.
    Local,
    /// Processes and files on a remote machine reached through SSH.
    Ssh,
}

impl HostKind {
    /// Returns a short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HostKind::Local => "local",
            HostKind::Ssh => "ssh",
        }
    }
}

/// A configured host on which tasks read/write files and run processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostConfig {
    /// Transport kind.
    pub kind: HostKind,
    /// Network address (SSH hosts only).
    pub address: Option<String>,
    /// TCP port (SSH hosts only).
    pub port: Option<u16>,
    /// User to authenticate as (SSH hosts only).
    pub user: Option<String>,
    /// Private key path (SSH hosts only).
    pub key: Option<PathBuf>,
}

impl HostConfig {
    /// A host that runs on the local machine.
    pub fn local() -> Self {
        Self {
            kind: HostKind::Local,
            address: None,
            port: None,
            user: None,
            key: None,
        }
    }

    /// A remote SSH host.
    pub fn ssh(address: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            kind: HostKind::Ssh,
            address: Some(address.into()),
            port: Some(port),
            user: Some(user.into()),
            key: None,
        }
    }

    /// Returns a new host config with the given private key.
    pub fn with_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Global configuration for the supervisor runtime.
///
/// ## Field semantics
/// - `log_dir`: directory for `<task id>.log` files (`None` = no files)
/// - `verbosity`: most verbose level written by task contexts
/// - `max_parallelism`: default admission window of new parents (`0` = unlimited)
/// - `listener_capacity`: per-listener delivery queue size (min 1)
/// - `hosts`: host name → host configuration
/// - `config_name`: label of the host configuration, shown in resolution errors
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory where per-task log files are created.
    pub log_dir: Option<PathBuf>,

    /// Messages more verbose than this level are dropped.
    pub verbosity: LogLevel,

    /// Default maximum number of children a new parent runs concurrently.
    ///
    /// - `0` = unlimited (no admission window)
    /// - `n > 0` = at most `n` children run simultaneously
    pub max_parallelism: usize,

    /// Capacity of each listener's delivery queue.
    ///
    /// `1` makes `invoke` wait until every listener has taken the previous event.
    pub listener_capacity: usize,

    /// Configured hosts by name.
    pub hosts: HashMap<String, HostConfig>,

    /// Label of the host configuration (for error messages).
    pub config_name: String,
}

impl Config {
    /// Returns the default parallelism limit as an `Option`.
    ///
    /// - `None` → unlimited
    /// - `Some(n)` → at most `n` concurrent children
    #[inline]
    pub fn parallelism_limit(&self) -> Option<usize> {
        if self.max_parallelism == 0 {
            None
        } else {
            Some(self.max_parallelism)
        }
    }

    /// Returns the listener capacity clamped to a minimum of 1.
    #[inline]
    pub fn listener_capacity_clamped(&self) -> usize {
        self.listener_capacity.max(1)
    }

    /// Returns a config with `name` added to (or replaced in) the hosts.
    pub fn with_host(mut self, name: impl Into<String>, host: HostConfig) -> Self {
        self.hosts.insert(name.into(), host);
        self
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `log_dir = None`
    /// - `verbosity = LogLevel::Debug` (everything)
    /// - `max_parallelism = 0` (unlimited)
    /// - `listener_capacity = 1`
    /// - `hosts = { "localhost": Local }`
    /// - `config_name = "default"`
    fn default() -> Self {
        let mut hosts = HashMap::new();
        hosts.insert("localhost".to_string(), HostConfig::local());
        Self {
            log_dir: None,
            verbosity: LogLevel::Debug,
            max_parallelism: 0,
            listener_capacity: 1,
            hosts,
            config_name: "default".to_string(),
        }
    }
}
