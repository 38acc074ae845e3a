//! # Agent
//!
//! Owns the long-lived pieces: one registry, one dispatcher, the server and the
//! log tail. The dispatcher outlives restarts, so a restart drops connections
//! but keeps the provider and the log toggle.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hostreflect::TypeProvider;
use tracing::info;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::inspect::IntrospectionProvider;
use crate::logtail::LogTail;
use crate::logtail::LogToggle;
use crate::registry::Registry;
use crate::server;
use crate::server::ServerHandle;
use crate::server::ServerOptions;

pub struct Agent {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    log_toggle: LogToggle,
    server: Option<ServerHandle>,
    log_tail: Option<LogTail>,
}

impl Agent {
    pub fn new(config: Config, types: Arc<dyn TypeProvider>) -> Self {
        let log_toggle = LogToggle::new(config.stream_logs);
        let provider = IntrospectionProvider::new(types, log_toggle.clone());
        let registry = Arc::new(Registry::new(Arc::new(provider)));
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(registry)),
            log_toggle,
            server: None,
            log_tail: None,
        }
    }

    /// Starts serving. A running instance is stopped first.
    pub async fn start(&mut self) -> io::Result<SocketAddr> {
        if self.is_running() {
            self.stop().await?;
        }

        let options = ServerOptions {
            bind_attempts: self.config.bind_attempts.max(1),
            bind_backoff: self.config.bind_backoff(),
            queue_depth: self.config.queue_depth,
        };
        let server = server::start(self.config.listen_addr(), self.dispatcher.clone(), options).await?;
        let addr = server.local_addr();
        self.server = Some(server);

        if let Some(command) = self.config.log_command() {
            self.log_tail = Some(LogTail::start(
                command,
                self.config.clear_command(),
                self.dispatcher.clone(),
                self.log_toggle.clone(),
            )?);
        }

        info!(%addr, "agent started");
        Ok(addr)
    }

    /// Stops then starts again on the configured address.
    pub async fn restart(&mut self) -> io::Result<SocketAddr> {
        self.stop().await?;
        self.start().await
    }

    pub async fn stop(&mut self) -> io::Result<()> {
        if let Some(tail) = self.log_tail.take() {
            tail.stop();
        }
        let result = match self.server.take() {
            Some(server) => server.stop().await,
            None => Ok(()),
        };
        self.dispatcher.registry().close_all().await;
        result
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Rebinds the configured port on the next start, e.g. after an ephemeral bind.
    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }
}
