//! Append-only message log.

use chrono::{DateTime, Utc};
use colloquy_protocol::{MessageKind, MessageMetadata, SessionPin, StoredMessage};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use crate::error::Result;
use crate::parse::{parse_datetime, parse_json, parse_name};

/// A log entry before the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_pin: SessionPin,
    pub session_id: Uuid,
    pub kind: MessageKind,
    pub sender: String,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(
        session_pin: SessionPin,
        session_id: Uuid,
        kind: MessageKind,
        sender: impl Into<String>,
        content: impl Into<String>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            session_pin,
            session_id,
            kind,
            sender: sender.into(),
            content: content.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

pub(crate) struct MessageStore<'a> {
    conn: &'a Connection,
}

impl<'a> MessageStore<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Appends `message` with the next sequence number for its pin.
    ///
    /// The sequence is computed inside the INSERT and keeps counting across
    /// sessions that reuse the pin, so sequences never collide.
    pub(crate) fn append(&self, message: &NewMessage) -> Result<StoredMessage> {
        let sequence: i64 = self.conn.query_row(
            "INSERT INTO messages
                (session_pin, session_id, sequence, kind, sender, content, metadata, created_at)
             SELECT ?1, ?2, COALESCE(MAX(sequence), 0) + 1, ?3, ?4, ?5, ?6, ?7
             FROM messages WHERE session_pin = ?1
             RETURNING sequence",
            params![
                message.session_pin.as_str(),
                message.session_id.to_string(),
                message.kind.as_str(),
                message.sender,
                message.content,
                serde_json::to_string(&message.metadata)?,
                message.created_at.to_rfc3339(),
            ],
            |row| row.get(0),
        )?;

        Ok(StoredMessage {
            session_pin: message.session_pin.clone(),
            sequence: sequence as u64,
            kind: message.kind,
            sender: message.sender.clone(),
            content: message.content.clone(),
            metadata: message.metadata.clone(),
            created_at: message.created_at,
        })
    }

    /// The log of the session currently recorded under `pin`, oldest first.
    pub(crate) fn list(&self, pin: &SessionPin) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.session_pin, m.sequence, m.kind, m.sender, m.content, m.metadata, m.created_at
             FROM messages m JOIN sessions s
               ON s.pin = m.session_pin AND s.session_id = m.session_id
             WHERE m.session_pin = ?1
             ORDER BY m.sequence ASC",
        )?;
        let messages = stmt
            .query_map(params![pin.as_str()], Self::map_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub(crate) fn count(&self, pin: &SessionPin) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM messages m JOIN sessions s
               ON s.pin = m.session_pin AND s.session_id = m.session_id
             WHERE m.session_pin = ?1",
            params![pin.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn map_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
        Ok(StoredMessage {
            session_pin: SessionPin::new(row.get::<_, String>(0)?),
            sequence: row.get::<_, i64>(1)? as u64,
            kind: parse_name::<MessageKind>(2, &row.get::<_, String>(2)?)?,
            sender: row.get(3)?,
            content: row.get(4)?,
            metadata: parse_json(5, &row.get::<_, String>(5)?)?,
            created_at: parse_datetime(6, &row.get::<_, String>(6)?)?,
        })
    }
}
