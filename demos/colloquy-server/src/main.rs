//! Colloquy server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory store, host-produced turns only
//! colloquy-server --bind 0.0.0.0:8080
//!
//! # Durable store, and rooms may ask the server to produce turns
//! colloquy-server --db colloquy.db --scripted-turns
//! ```

mod scripted;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colloquy::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::scripted::ScriptedGenerator;

/// Colloquy session server
#[derive(Parser, Debug)]
#[command(name = "colloquy-server")]
#[command(about = "Real-time session orchestration server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// SQLite database file. Sessions are kept in memory when omitted.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Outbound queue size per connection
    #[arg(long, default_value = "256")]
    outbound_capacity: usize,

    /// Seconds of silence before a socket is closed
    #[arg(long, default_value = "120")]
    idle_timeout_secs: u64,

    /// Seconds a new socket gets to finish the WebSocket upgrade
    #[arg(long, default_value = "10")]
    handshake_timeout_secs: u64,

    /// Milliseconds a begun session waits before going active
    #[arg(long, default_value = "3000")]
    start_grace_ms: u64,

    /// Seconds a room with no connections survives
    #[arg(long, default_value = "30")]
    empty_room_grace_secs: u64,

    /// Milliseconds between server-produced turns
    #[arg(long, default_value = "1000")]
    turn_delay_ms: u64,

    /// Allow `server` turn authority, answered by a canned script
    #[arg(long)]
    scripted_turns: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind.clone(),
            database: match &self.db {
                Some(path) => Database::File(path.clone()),
                None => Database::InMemory,
            },
            outbound_capacity: self.outbound_capacity,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            timings: RoomTimings::default()
                .with_start_grace(Duration::from_millis(self.start_grace_ms))
                .with_empty_room_grace(Duration::from_secs(self.empty_room_grace_secs))
                .with_turn_delay(Duration::from_millis(self.turn_delay_ms)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Colloquy server starting");
    if args.db.is_none() {
        tracing::warn!("No --db given, sessions will not survive a restart");
    }

    let mut builder = ColloquyServer::builder().config(args.server_config());
    if args.scripted_turns {
        builder = builder.generator(Arc::new(ScriptedGenerator::default()));
    }
    let server = builder.build().await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
