//! Server-wide configuration.

use std::path::PathBuf;
use std::time::Duration;

use colloquy_room::RoomTimings;

/// Where session records and message logs are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Database {
    /// Lost when the process exits.
    #[default]
    InMemory,
    /// A SQLite file, created on first use.
    File(PathBuf),
}

/// Configuration for a [`ColloquyServer`](crate::ColloquyServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database: Database,
    /// Per-connection outbound queue size. Events for a connection whose
    /// queue is full are dropped for that connection only.
    pub outbound_capacity: usize,
    /// A socket that sends nothing for this long is closed.
    pub idle_timeout: Duration,
    /// Time a new socket gets to complete the WebSocket upgrade.
    pub handshake_timeout: Duration,
    pub timings: RoomTimings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database: Database::InMemory,
            outbound_capacity: 256,
            idle_timeout: Duration::from_secs(120),
            handshake_timeout: Duration::from_secs(10),
            timings: RoomTimings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.database, Database::InMemory);
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.timings.start_grace, Duration::from_secs(3));
    }
}
