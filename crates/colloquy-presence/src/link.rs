//! The room's side of a participant's socket.
//!
//! A room never touches a socket directly. Each connection task owns its
//! socket and drains a bounded queue of [`Outbound`] items; the room holds
//! the sending half inside a [`Link`]. Events stay typed until the
//! connection task encodes them with its codec.
//!
//! Beside the queue runs a shutdown signal. A room that must close a
//! connection whose queue is full raises it instead; the receiver yields
//! the notice ahead of anything still queued.

use std::sync::Arc;

use colloquy_protocol::ServerEvent;
use colloquy_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot, watch};

/// An event shared by every recipient of one broadcast.
pub type SharedEvent = Arc<ServerEvent>;

/// One item in a connection's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    /// Write this event.
    Event(SharedEvent),

    /// An event that is still being produced. The writer waits for it
    /// before writing anything queued behind it, so a viewer's backlog
    /// lands ahead of live events even though it is read off the room task.
    /// A dropped sender is skipped.
    Pending(oneshot::Receiver<ServerEvent>),

    /// Write this event, then close the socket.
    Close(SharedEvent),
}

type ShutdownSignal = Option<SharedEvent>;

/// Creates an outbound queue holding at most `capacity` items.
pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(None);
    (
        OutboundSender {
            queue: queue_tx,
            shutdown: Arc::new(shutdown_tx),
        },
        OutboundReceiver {
            queue: queue_rx,
            shutdown: shutdown_rx,
        },
    )
}

/// The sending half of an outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    queue: mpsc::Sender<Outbound>,
    shutdown: Arc<watch::Sender<ShutdownSignal>>,
}

impl OutboundSender {
    /// Queues an item, waiting for room if the queue is full.
    pub async fn send(&self, item: Outbound) -> Result<(), DeliveryFailure> {
        self.queue
            .send(item)
            .await
            .map_err(|_| DeliveryFailure::Closed)
    }

    /// Queues an item without waiting.
    pub fn try_send(&self, item: Outbound) -> Result<(), DeliveryFailure> {
        self.queue.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Asks the connection to write `notice` and close, skipping the queue.
    pub fn shut_down(&self, notice: SharedEvent) {
        self.shutdown.send_replace(Some(notice));
    }

    /// Resolves once [`shut_down`](Self::shut_down) has been called.
    pub async fn shutdown_requested(&self) {
        let mut signal = self.shutdown.subscribe();
        if signal.wait_for(Option::is_some).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The receiving half of an outbound queue, drained by the connection task.
#[derive(Debug)]
pub struct OutboundReceiver {
    queue: mpsc::Receiver<Outbound>,
    shutdown: watch::Receiver<ShutdownSignal>,
}

impl OutboundReceiver {
    /// The next item to write. A requested shutdown comes first, as a
    /// [`Outbound::Close`]. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Outbound> {
        tokio::select! {
            biased;
            Some(notice) = shutdown_notice(&mut self.shutdown) => Some(Outbound::Close(notice)),
            item = self.queue.recv() => item,
        }
    }

    /// Like [`recv`](Self::recv), without waiting.
    pub fn try_recv(&mut self) -> Result<Outbound, mpsc::error::TryRecvError> {
        if let Some(notice) = self.shutdown.borrow().clone() {
            return Ok(Outbound::Close(notice));
        }
        self.queue.try_recv()
    }
}

async fn shutdown_notice(signal: &mut watch::Receiver<ShutdownSignal>) -> Option<SharedEvent> {
    signal
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|notice| notice.clone())
}

/// Why a single delivery did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The recipient's queue is at capacity (a slow client).
    Full,
    /// The connection task is gone.
    Closed,
}

/// A live connection attached to a participant.
#[derive(Debug, Clone)]
pub struct Link {
    conn_id: ConnectionId,
    sender: OutboundSender,
}

impl Link {
    pub fn new(conn_id: ConnectionId, sender: OutboundSender) -> Self {
        Self { conn_id, sender }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queues an item without waiting.
    pub fn try_deliver(&self, item: Outbound) -> Result<(), DeliveryFailure> {
        self.sender.try_send(item)
    }

    /// Queues a final notice and asks the writer to close the socket.
    ///
    /// A full queue gets the notice through the shutdown signal instead, so
    /// the connection closes even if it never drains.
    pub fn close(self, notice: SharedEvent) {
        match self.try_deliver(Outbound::Close(Arc::clone(&notice))) {
            Ok(()) => {}
            Err(DeliveryFailure::Full) => {
                tracing::debug!(conn_id = %self.conn_id, "queue full, signalling shutdown");
                self.sender.shut_down(notice);
            }
            Err(DeliveryFailure::Closed) => {
                tracing::debug!(conn_id = %self.conn_id, "connection already gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(count: usize) -> SharedEvent {
        Arc::new(ServerEvent::ParticipantCount { count })
    }

    #[tokio::test]
    async fn test_try_deliver_full_queue_reports_full() {
        let (tx, mut rx) = outbound_channel(1);
        let link = Link::new(ConnectionId::new(1), tx);

        assert_eq!(link.try_deliver(Outbound::Event(event(1))), Ok(()));
        assert_eq!(
            link.try_deliver(Outbound::Event(event(2))),
            Err(DeliveryFailure::Full)
        );

        let Some(Outbound::Event(first)) = rx.recv().await else {
            panic!("expected an event");
        };
        assert_eq!(*first, ServerEvent::ParticipantCount { count: 1 });
    }

    #[tokio::test]
    async fn test_try_deliver_dropped_receiver_reports_closed() {
        let (tx, rx) = outbound_channel(4);
        drop(rx);
        let link = Link::new(ConnectionId::new(2), tx);
        assert_eq!(
            link.try_deliver(Outbound::Event(event(0))),
            Err(DeliveryFailure::Closed)
        );
    }

    #[tokio::test]
    async fn test_close_queues_close_item() {
        let (tx, mut rx) = outbound_channel(4);
        let notice = Arc::new(ServerEvent::SessionEnded {
            reason: "ended by host".into(),
        });
        Link::new(ConnectionId::new(3), tx).close(notice);

        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close(ev)) if matches!(&*ev, ServerEvent::SessionEnded { .. })
        ));
        assert!(rx.recv().await.is_none(), "link sender dropped after close");
    }

    #[tokio::test]
    async fn test_close_full_queue_skips_ahead_with_notice() {
        let (tx, mut rx) = outbound_channel(1);
        let link = Link::new(ConnectionId::new(4), tx.clone());
        link.try_deliver(Outbound::Event(event(1))).unwrap();

        link.close(Arc::new(ServerEvent::SessionEnded {
            reason: "ended by host".into(),
        }));

        let first = rx.recv().await;
        assert!(matches!(
            first,
            Some(Outbound::Close(ev)) if matches!(&*ev, ServerEvent::SessionEnded { .. })
        ));
        tokio::time::timeout(std::time::Duration::from_secs(1), tx.shutdown_requested())
            .await
            .expect("shutdown is visible to other senders");
    }
}
