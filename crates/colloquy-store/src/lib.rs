//! Persistence adapter for Colloquy.
//!
//! Two tables back every room:
//!
//! - `sessions`: one row per pin (`session_id`, `host_id`, `status`,
//!   `setup_data`, `created_at`, `ended_at`), written with create-or-update
//!   semantics.
//! - `messages`: the append-only transcript, ordered by a per-pin
//!   `sequence` that the store assigns and tagged with the `session_id`
//!   that wrote it.
//!
//! A pin can be reused once its room has ended. Each room instance gets a
//! fresh `session_id`; the row under a pin always describes the latest
//! instance, and reads of the log only return that instance's messages.
//!
//! The [`SessionLog`] trait is the seam rooms write through. It is
//! synchronous; callers on the async runtime run it on the blocking pool.

mod error;
mod messages;
mod migrations;
mod parse;
mod sessions;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use colloquy_protocol::{ParticipantId, SessionPin, SessionStatus, StoredMessage};
use rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

pub use error::{Result, StoreError};
pub use messages::NewMessage;
pub use sessions::SessionRecord;

use messages::MessageStore;
use sessions::SessionStore;

/// Durable storage for session records and their message logs.
pub trait SessionLog: Send + Sync + 'static {
    /// Creates the session record, or updates it if the pin already exists.
    ///
    /// A record with a new `session_id` takes the pin over from an older one.
    fn upsert_session(&self, record: &SessionRecord) -> Result<()>;

    /// Updates the status of `session_id`. A no-op once a newer session owns
    /// the pin.
    fn set_status(&self, pin: &SessionPin, session_id: Uuid, status: SessionStatus) -> Result<()>;

    /// Marks the session ended and stamps `ended_at`. A no-op once a newer
    /// session owns the pin.
    fn end_session(&self, pin: &SessionPin, session_id: Uuid, ended_at: DateTime<Utc>)
    -> Result<()>;

    /// Appends a message and returns it with its assigned sequence.
    fn append_message(&self, message: &NewMessage) -> Result<StoredMessage>;

    /// The log of the session currently recorded under `pin`, oldest first.
    fn messages(&self, pin: &SessionPin) -> Result<Vec<StoredMessage>>;

    fn message_count(&self, pin: &SessionPin) -> Result<u64>;

    fn session(&self, pin: &SessionPin) -> Result<Option<SessionRecord>>;

    /// Sessions hosted by `host_id`, newest first.
    fn list_sessions(&self, host_id: ParticipantId) -> Result<Vec<SessionRecord>>;
}

/// A [`SessionLog`] backed by a single SQLite connection.
pub struct SqliteLog {
    conn: Mutex<Connection>,
}

impl SqliteLog {
    /// Opens or creates the database at `path` and applies migrations.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<u32> {
        migrations::current_version(&*self.lock()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SessionLog for SqliteLog {
    fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        SessionStore::new(&*self.lock()?).upsert(record)
    }

    fn set_status(&self, pin: &SessionPin, session_id: Uuid, status: SessionStatus) -> Result<()> {
        SessionStore::new(&*self.lock()?).set_status(pin, session_id, status)
    }

    fn end_session(
        &self,
        pin: &SessionPin,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        SessionStore::new(&*self.lock()?).end(pin, session_id, ended_at)
    }

    fn append_message(&self, message: &NewMessage) -> Result<StoredMessage> {
        MessageStore::new(&*self.lock()?).append(message)
    }

    fn messages(&self, pin: &SessionPin) -> Result<Vec<StoredMessage>> {
        MessageStore::new(&*self.lock()?).list(pin)
    }

    fn message_count(&self, pin: &SessionPin) -> Result<u64> {
        MessageStore::new(&*self.lock()?).count(pin)
    }

    fn session(&self, pin: &SessionPin) -> Result<Option<SessionRecord>> {
        SessionStore::new(&*self.lock()?).find(pin)
    }

    fn list_sessions(&self, host_id: ParticipantId) -> Result<Vec<SessionRecord>> {
        SessionStore::new(&*self.lock()?).list_for_host(host_id)
    }
}
