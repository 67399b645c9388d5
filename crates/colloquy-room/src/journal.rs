//! Per-room write-behind journal.
//!
//! A room never waits for the database. It hands every write to its
//! journal, a separate task that applies them to the [`SessionLog`] in
//! order on the blocking pool. A failed write stays at the front of the
//! backlog and is retried before the next one, so order is preserved and
//! nothing is skipped.
//!
//! Replay requests travel through the same queue. A replay therefore sees
//! every write the room issued before asking for it.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use colloquy_protocol::{SessionPin, SessionStatus, StoredMessage};
use colloquy_store::{NewMessage, SessionLog, SessionRecord, StoreError};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// One durable write.
#[derive(Debug, Clone)]
enum JournalOp {
    UpsertSession(SessionRecord),
    SetStatus(SessionStatus),
    EndSession(DateTime<Utc>),
    Append(NewMessage),
}

impl JournalOp {
    fn name(&self) -> &'static str {
        match self {
            Self::UpsertSession(_) => "upsert_session",
            Self::SetStatus(_) => "set_status",
            Self::EndSession(_) => "end_session",
            Self::Append(_) => "append_message",
        }
    }

    fn apply(&self, log: &dyn SessionLog, pin: &SessionPin, session_id: Uuid) -> Result<(), StoreError> {
        match self {
            Self::UpsertSession(record) => log.upsert_session(record),
            Self::SetStatus(status) => log.set_status(pin, session_id, *status),
            Self::EndSession(at) => log.end_session(pin, session_id, *at),
            Self::Append(message) => log.append_message(message).map(|_| ()),
        }
    }
}

type ReplayReply = oneshot::Sender<Result<Vec<StoredMessage>, StoreError>>;

enum JournalCommand {
    Write(JournalOp),
    Replay(ReplayReply),
}

/// Handle to a room's journal task. Dropping it lets the task drain and exit.
#[derive(Debug, Clone)]
pub(crate) struct Journal {
    sender: mpsc::UnboundedSender<JournalCommand>,
}

impl std::fmt::Debug for JournalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write(op) => write!(f, "Write({})", op.name()),
            Self::Replay(_) => f.write_str("Replay"),
        }
    }
}

impl Journal {
    pub(crate) fn spawn(pin: SessionPin, session_id: Uuid, log: Arc<dyn SessionLog>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = JournalTask {
            pin,
            session_id,
            log,
            backlog: VecDeque::new(),
            receiver,
        };
        tokio::spawn(task.run());
        Self { sender }
    }

    pub(crate) fn upsert_session(&self, record: SessionRecord) {
        self.write(JournalOp::UpsertSession(record));
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.write(JournalOp::SetStatus(status));
    }

    pub(crate) fn end_session(&self, at: DateTime<Utc>) {
        self.write(JournalOp::EndSession(at));
    }

    pub(crate) fn append(&self, message: NewMessage) {
        self.write(JournalOp::Append(message));
    }

    /// Asks for the durable log once every earlier write has been applied.
    pub(crate) fn replay(&self) -> oneshot::Receiver<Result<Vec<StoredMessage>, StoreError>> {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(JournalCommand::Replay(reply)).is_err() {
            tracing::error!(alarm = true, "journal task gone, replay dropped");
        }
        rx
    }

    fn write(&self, op: JournalOp) {
        if let Err(mpsc::error::SendError(cmd)) = self.sender.send(JournalCommand::Write(op)) {
            tracing::error!(alarm = true, ?cmd, "journal task gone, write lost");
        }
    }
}

struct JournalTask {
    pin: SessionPin,
    session_id: Uuid,
    log: Arc<dyn SessionLog>,
    backlog: VecDeque<JournalOp>,
    receiver: mpsc::UnboundedReceiver<JournalCommand>,
}

impl JournalTask {
    async fn run(mut self) {
        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                JournalCommand::Write(op) => {
                    self.backlog.push_back(op);
                    self.flush().await;
                }
                JournalCommand::Replay(reply) => {
                    self.flush().await;
                    if !self.backlog.is_empty() {
                        tracing::warn!(
                            pin = %self.pin,
                            pending = self.backlog.len(),
                            "replaying with unflushed writes"
                        );
                    }
                    let _ = reply.send(self.read_log().await);
                }
            }
        }

        // The room is gone: one last attempt for anything still pending.
        self.flush().await;
        if !self.backlog.is_empty() {
            tracing::error!(
                pin = %self.pin,
                lost = self.backlog.len(),
                alarm = true,
                "journal closed with unflushed writes"
            );
        }
    }

    /// Applies the backlog front to back, stopping at the first failure.
    async fn flush(&mut self) {
        while let Some(op) = self.backlog.front().cloned() {
            let log = Arc::clone(&self.log);
            let pin = self.pin.clone();
            let session_id = self.session_id;
            let name = op.name();

            let result =
                tokio::task::spawn_blocking(move || op.apply(log.as_ref(), &pin, session_id)).await;
            match result {
                Ok(Ok(())) => {
                    self.backlog.pop_front();
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        pin = %self.pin,
                        op = name,
                        pending = self.backlog.len(),
                        error = %e,
                        alarm = true,
                        "persistence write failed, will retry"
                    );
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        pin = %self.pin,
                        op = name,
                        error = %e,
                        alarm = true,
                        "persistence task panicked, will retry"
                    );
                    return;
                }
            }
        }
    }

    async fn read_log(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let log = Arc::clone(&self.log);
        let pin = self.pin.clone();
        match tokio::task::spawn_blocking(move || log.messages(&pin)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Poisoned),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use colloquy_protocol::{MessageKind, MessageMetadata, ParticipantId, SetupData};
    use colloquy_store::SqliteLog;

    use super::*;

    fn pin() -> SessionPin {
        SessionPin::new("AB12-CD34")
    }

    fn record() -> SessionRecord {
        SessionRecord::new(pin(), ParticipantId(1), SetupData::default())
    }

    fn chat(record: &SessionRecord, content: &str) -> NewMessage {
        NewMessage::new(
            pin(),
            record.session_id,
            MessageKind::Chat,
            "Ada",
            content,
            MessageMetadata::default(),
        )
    }

    /// Fails the first `failures` appends, then delegates.
    struct FlakyLog {
        inner: SqliteLog,
        failures: AtomicUsize,
    }

    impl SessionLog for FlakyLog {
        fn upsert_session(&self, record: &SessionRecord) -> colloquy_store::Result<()> {
            self.inner.upsert_session(record)
        }
        fn set_status(
            &self,
            pin: &SessionPin,
            session_id: Uuid,
            status: SessionStatus,
        ) -> colloquy_store::Result<()> {
            self.inner.set_status(pin, session_id, status)
        }
        fn end_session(
            &self,
            pin: &SessionPin,
            session_id: Uuid,
            at: DateTime<Utc>,
        ) -> colloquy_store::Result<()> {
            self.inner.end_session(pin, session_id, at)
        }
        fn append_message(&self, message: &NewMessage) -> colloquy_store::Result<StoredMessage> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::SessionNotFound("simulated outage".into()));
            }
            self.inner.append_message(message)
        }
        fn messages(&self, pin: &SessionPin) -> colloquy_store::Result<Vec<StoredMessage>> {
            self.inner.messages(pin)
        }
        fn message_count(&self, pin: &SessionPin) -> colloquy_store::Result<u64> {
            self.inner.message_count(pin)
        }
        fn session(&self, pin: &SessionPin) -> colloquy_store::Result<Option<SessionRecord>> {
            self.inner.session(pin)
        }
        fn list_sessions(&self, host_id: ParticipantId) -> colloquy_store::Result<Vec<SessionRecord>> {
            self.inner.list_sessions(host_id)
        }
    }

    #[tokio::test]
    async fn test_replay_sees_every_earlier_write_in_order() {
        let log: Arc<dyn SessionLog> = Arc::new(SqliteLog::open_in_memory().unwrap());
        let record = record();
        let journal = Journal::spawn(pin(), record.session_id, Arc::clone(&log));

        journal.upsert_session(record.clone());
        for n in 0..5 {
            journal.append(chat(&record, &format!("hello {n}")));
        }
        let messages = journal.replay().await.unwrap().unwrap();

        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello 0", "hello 1", "hello 2", "hello 3", "hello 4"]);
        let sequences: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_before_the_next_one() {
        let flaky = Arc::new(FlakyLog {
            inner: SqliteLog::open_in_memory().unwrap(),
            failures: AtomicUsize::new(1),
        });
        let record = record();
        let journal = Journal::spawn(pin(), record.session_id, flaky.clone());

        journal.upsert_session(record.clone());
        journal.append(chat(&record, "first"));
        // The first append failed and waits in the backlog; this write
        // retries it before appending "second".
        journal.append(chat(&record, "second"));

        let messages = journal.replay().await.unwrap().unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_dropped_journal_drains_pending_writes() {
        let log = Arc::new(SqliteLog::open_in_memory().unwrap());
        let record = record();
        let journal = Journal::spawn(pin(), record.session_id, log.clone());
        journal.upsert_session(record);
        journal.end_session(Utc::now());
        drop(journal);

        let mut status = None;
        for _ in 0..50 {
            status = log.session(&pin()).unwrap().map(|r| r.status);
            if status == Some(SessionStatus::Ended) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, Some(SessionStatus::Ended));
    }
}
