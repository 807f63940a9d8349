//! Listener registration with disposable handles.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Handle returned by every listener registration.
///
/// Disposing removes the listener. `dispose` is idempotent and also runs on drop,
/// so an owner going away always unregisters what it registered.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn dispose(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    pub fn is_active(&self) -> bool {
        self.dispose.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

struct Registry<T> {
    next_id: u64,
    listeners: Vec<(u64, mpsc::UnboundedSender<T>)>,
}

/// A set of channel listeners that can be broadcast to.
pub struct ListenerSet<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }
}

fn lock<T>(inner: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: mpsc::UnboundedSender<T>) -> Subscription {
        let id = {
            let mut registry = lock(&self.inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, listener));
            id
        };

        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            lock(&inner).listeners.retain(|(listener_id, _)| *listener_id != id);
        })
    }

    /// Sends `value` to every live listener, pruning closed ones.
    /// Returns the number of listeners reached.
    pub fn broadcast(&self, value: T) -> usize {
        let mut registry = lock(&self.inner);
        registry
            .listeners
            .retain(|(_, listener)| listener.send(value.clone()).is_ok());
        registry.listeners.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
