//! `ColloquyServer` builder and server loop.
//!
//! This is the entry point for running a Colloquy server. It ties together
//! all the layers: transport → protocol → room registry → store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use colloquy_protocol::JsonCodec;
use colloquy_room::{Generator, RoomTimings, SessionRegistry, UsageRecorder};
use colloquy_store::{SessionLog, SqliteLog};
use colloquy_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ColloquyError, Database, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) registry: SessionRegistry,
    pub(crate) codec: JsonCodec,
    pub(crate) outbound_capacity: usize,
    pub(crate) idle_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
}

/// Builder for configuring and starting a Colloquy server.
///
/// # Example
///
/// ```rust,ignore
/// use colloquy::prelude::*;
///
/// let server = ColloquyServer::builder()
///     .bind("0.0.0.0:8080")
///     .database(Database::File("colloquy.db".into()))
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct ColloquyServerBuilder {
    config: ServerConfig,
    log: Option<Arc<dyn SessionLog>>,
    generator: Option<Arc<dyn Generator>>,
    usage: Option<Arc<dyn UsageRecorder>>,
}

impl ColloquyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            log: None,
            generator: None,
            usage: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn database(mut self, database: Database) -> Self {
        self.config.database = database;
        self
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn timings(mut self, timings: RoomTimings) -> Self {
        self.config.timings = timings;
        self
    }

    /// Uses an already opened session log instead of `database`.
    pub fn session_log(mut self, log: Arc<dyn SessionLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Enables rooms with `server` turn authority.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn usage_recorder(mut self, usage: Arc<dyn UsageRecorder>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Opens the store, binds the listener, and returns the server.
    pub async fn build(self) -> Result<ColloquyServer, ColloquyError> {
        let log: Arc<dyn SessionLog> = match self.log {
            Some(log) => log,
            None => match &self.config.database {
                Database::InMemory => Arc::new(SqliteLog::open_in_memory()?),
                Database::File(path) => Arc::new(SqliteLog::open(path)?),
            },
        };

        let mut registry = SessionRegistry::new(log).with_timings(self.config.timings);
        if let Some(generator) = self.generator {
            registry = registry.with_generator(generator);
        }
        if let Some(usage) = self.usage {
            registry = registry.with_usage_recorder(usage);
        }

        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let state = Arc::new(ServerState {
            registry,
            codec: JsonCodec,
            outbound_capacity: self.config.outbound_capacity.max(1),
            idle_timeout: self.config.idle_timeout,
            handshake_timeout: self.config.handshake_timeout,
        });

        Ok(ColloquyServer { transport, state })
    }
}

impl Default for ColloquyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Colloquy server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct ColloquyServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl ColloquyServer {
    /// Creates a new builder.
    pub fn builder() -> ColloquyServerBuilder {
        ColloquyServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry of active rooms.
    pub fn registry(&self) -> &SessionRegistry {
        &self.state.registry
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), ColloquyError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then ends every room.
    ///
    /// Each accepted socket gets its own task, handshake included, so a
    /// fault or stall in one connection never reaches the others or the loop.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ColloquyError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "Colloquy server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(incoming) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(incoming, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                () = &mut shutdown => break,
            }
        }

        self.state.registry.shutdown_all("server shutting down").await;
        tracing::info!("Colloquy server stopped");
        Ok(())
    }
}
