use std::sync::Arc;

use crate::config::Config;
use crate::connection::{Connection, Connections, SharedWriter, shared_writer};
use crate::events::EventHub;

use super::supervisor::Supervisor;

/// Builder for constructing a [`Supervisor`] with optional sinks and connections.
pub struct SupervisorBuilder {
    cfg: Config,
    stdout: Option<SharedWriter>,
    connections: Vec<(String, Arc<dyn Connection>)>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            stdout: None,
            connections: Vec::new(),
        }
    }

    /// Replaces the shared stdout sink (the process stdout by default).
    pub fn with_stdout(mut self, stdout: SharedWriter) -> Self {
        self.stdout = Some(stdout);
        self
    }

    /// Registers a connection under a host name.
    ///
    /// Takes precedence over the configured host of the same name; this is
    /// how transports other than the local one are plugged in.
    pub fn with_connection(mut self, host: impl Into<String>, conn: Arc<dyn Connection>) -> Self {
        self.connections.push((host.into(), conn));
        self
    }

    /// Builds the supervisor and spawns its event hub.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<Supervisor> {
        let hub = EventHub::with_capacity(self.cfg.listener_capacity_clamped());
        let connections = Connections::new(self.cfg.config_name.clone(), self.cfg.hosts.clone());
        for (host, conn) in self.connections {
            connections.register(host, conn);
        }
        let stdout = self
            .stdout
            .unwrap_or_else(|| shared_writer(std::io::stdout()));

        Arc::new(Supervisor::new_internal(self.cfg, hub, connections, stdout))
    }
}
