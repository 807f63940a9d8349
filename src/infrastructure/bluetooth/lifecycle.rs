//! Host application foreground / background notifications.

use crate::domain::models::AppStateChange;
use crate::infrastructure::bluetooth::subscription::{ListenerSet, Subscription};
use tokio::sync::mpsc;
use tracing::debug;

/// Fan-out point for app-state transitions. Clones share the same listeners.
#[derive(Clone, Default)]
pub struct LifecycleBridge {
    listeners: ListenerSet<AppStateChange>,
}

impl LifecycleBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: mpsc::UnboundedSender<AppStateChange>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Reports a transition. Returns how many listeners received it.
    pub fn set_active(&self, is_active: bool) -> usize {
        debug!("App state changed. Is active: {}", is_active);
        self.listeners.broadcast(AppStateChange { is_active })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
