//! Cancellable one-shot timers delivered into the service input loop.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    ScanTimeout,
    ReconnectRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owned, nullable timer handle.
///
/// At most one timer is armed per slot. A fire is honoured only if its
/// generation matches the armed one; the slot is cleared in the same step.
pub struct TimerSlot {
    kind: TimerKind,
    sender: mpsc::UnboundedSender<TimerFired>,
    armed: Option<Armed>,
    next_generation: u64,
}

impl TimerSlot {
    pub fn new(kind: TimerKind, sender: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            kind,
            sender,
            armed: None,
            next_generation: 0,
        }
    }

    /// Arms the slot, replacing (and aborting) any previously armed timer.
    pub fn arm(&mut self, delay: Duration) {
        self.cancel();

        let generation = self.next_generation;
        self.next_generation += 1;

        let kind = self.kind;
        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(TimerFired { kind, generation });
        });

        self.armed = Some(Armed { generation, handle });
    }

    /// Aborts and clears the armed timer. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.handle.abort();
                debug!(kind = ?self.kind, generation = armed.generation, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Consumes a fire. Returns `true` if it belongs to the armed timer,
    /// in which case the slot is now empty.
    pub fn fire(&mut self, generation: u64) -> bool {
        let current = self
            .armed
            .as_ref()
            .is_some_and(|armed| armed.generation == generation);
        if current {
            self.armed = None;
        } else {
            debug!(kind = ?self.kind, generation, "Ignoring stale timer");
        }
        current
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
