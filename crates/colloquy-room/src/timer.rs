//! Cancellable one-shot timers owned by a room actor.
//!
//! A room keeps its timers as fields and polls them from its `select!`
//! loop. A disarmed timer pends forever, so the loop needs no special case
//! for "no timer running":
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = self.receiver.recv() => { /* handle commands */ }
//!         () = self.start_timer.fired() => { /* grace elapsed */ }
//!     }
//! }
//! ```

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{self, Sleep};

#[derive(Debug, Default)]
pub(crate) struct RoomTimer {
    deadline: Option<Pin<Box<Sleep>>>,
}

impl RoomTimer {
    /// (Re)arms the timer to fire once, `after` from now.
    pub(crate) fn arm(&mut self, after: Duration) {
        self.deadline = Some(Box::pin(time::sleep(after)));
    }

    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the armed deadline passes, then disarms.
    /// Pends forever while disarmed.
    pub(crate) async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
