//! Session record storage.

use chrono::{DateTime, Utc};
use colloquy_protocol::{ParticipantId, SessionPin, SessionStatus, SetupData};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::parse::{
    OptionalExt, parse_datetime, parse_datetime_opt, parse_json, parse_name, parse_uuid,
};

/// The durable shape of a room.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub pin: SessionPin,
    /// Identifies one room instance among all rooms that used this pin.
    pub session_id: Uuid,
    pub host_id: ParticipantId,
    pub status: SessionStatus,
    pub setup: SetupData,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// A fresh `waiting` record for a new session, stamped now.
    pub fn new(pin: SessionPin, host_id: ParticipantId, setup: SetupData) -> Self {
        Self {
            pin,
            session_id: Uuid::new_v4(),
            host_id,
            status: SessionStatus::Waiting,
            setup,
            created_at: Utc::now(),
            ended_at: None,
        }
    }
}

pub(crate) struct SessionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SessionStore<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Creates the record or, if the pin already exists, overwrites it.
    ///
    /// Rewriting the same session keeps the row. A different session takes
    /// the pin over only if it was created no earlier than the stored one,
    /// so a late write from an ended room cannot reclaim a reused pin.
    pub(crate) fn upsert(&self, record: &SessionRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (pin, session_id, host_id, status, setup_data, created_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(pin) DO UPDATE SET
                session_id = excluded.session_id,
                host_id = excluded.host_id,
                status = excluded.status,
                setup_data = excluded.setup_data,
                created_at = excluded.created_at,
                ended_at = excluded.ended_at
             WHERE sessions.session_id = excluded.session_id
                OR sessions.created_at <= excluded.created_at",
            params![
                record.pin.as_str(),
                record.session_id.to_string(),
                record.host_id.0 as i64,
                record.status.as_str(),
                serde_json::to_string(&record.setup)?,
                record.created_at.to_rfc3339(),
                record.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn set_status(
        &self,
        pin: &SessionPin,
        session_id: Uuid,
        status: SessionStatus,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?3 WHERE pin = ?1 AND session_id = ?2",
            params![pin.as_str(), session_id.to_string(), status.as_str()],
        )?;
        self.check_updated(pin, session_id, changed)
    }

    pub(crate) fn end(
        &self,
        pin: &SessionPin,
        session_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?3, ended_at = ?4 WHERE pin = ?1 AND session_id = ?2",
            params![
                pin.as_str(),
                session_id.to_string(),
                SessionStatus::Ended.as_str(),
                ended_at.to_rfc3339()
            ],
        )?;
        self.check_updated(pin, session_id, changed)
    }

    /// An update that matched nothing is only an error if the pin is unknown.
    /// Otherwise a newer session owns the pin and the write is stale.
    fn check_updated(&self, pin: &SessionPin, session_id: Uuid, changed: usize) -> Result<()> {
        if changed > 0 {
            return Ok(());
        }
        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT session_id FROM sessions WHERE pin = ?1",
                params![pin.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            Some(owner) => {
                tracing::debug!(%pin, %session_id, %owner, "stale session write ignored");
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(pin.to_string())),
        }
    }

    pub(crate) fn find(&self, pin: &SessionPin) -> Result<Option<SessionRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT pin, session_id, host_id, status, setup_data, created_at, ended_at
                 FROM sessions WHERE pin = ?1",
                params![pin.as_str()],
                Self::map_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Every session hosted by `host_id`, newest first.
    pub(crate) fn list_for_host(&self, host_id: ParticipantId) -> Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT pin, session_id, host_id, status, setup_data, created_at, ended_at
             FROM sessions WHERE host_id = ?1
             ORDER BY created_at DESC",
        )?;
        let records = stmt
            .query_map(params![host_id.0 as i64], Self::map_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn map_record(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
        Ok(SessionRecord {
            pin: SessionPin::new(row.get::<_, String>(0)?),
            session_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
            host_id: ParticipantId(row.get::<_, i64>(2)? as u64),
            status: parse_name(3, &row.get::<_, String>(3)?)?,
            setup: parse_json(4, &row.get::<_, String>(4)?)?,
            created_at: parse_datetime(5, &row.get::<_, String>(5)?)?,
            ended_at: parse_datetime_opt(6, row.get(6)?)?,
        })
    }
}
