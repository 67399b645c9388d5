//! Schema versioning.
//!
//! Migrations are applied in order and recorded in `schema_migrations`, so
//! reopening an existing database only runs what is new.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Sessions and message log",
    sql: r#"
        CREATE TABLE IF NOT EXISTS sessions (
            pin TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            host_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            setup_data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            ended_at TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_pin TEXT NOT NULL,
            session_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            kind TEXT NOT NULL,
            sender TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (session_pin) REFERENCES sessions(pin) ON DELETE CASCADE,
            UNIQUE(session_pin, sequence)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_host ON sessions(host_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence);
    "#,
}];

fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

pub(crate) fn current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn record_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Applies every migration newer than the recorded schema version.
#[instrument(skip(conn))]
pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let from = current_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        conn.execute_batch(migration.sql)?;
        record_migration(conn, migration)?;
    }

    let to = current_version(conn)?;
    if to > from {
        info!(from, to, "database schema updated");
    }
    Ok(())
}
