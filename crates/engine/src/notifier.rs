//! Change notification
//!
//! Listeners are told the store name after every commit that wrote at
//! least one document. Delivery is synchronous and fire-and-forget: a
//! listener has no way to fail or delay the write it is told about.

use parking_lot::RwLock;
use std::sync::Arc;

/// Receives change notifications
pub trait ChangeListener: Send + Sync {
    /// Called after a commit that changed `store_name`
    fn on_change(&self, store_name: &str);
}

impl<F> ChangeListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_change(&self, store_name: &str) {
        self(store_name)
    }
}

/// Registered listeners for one store
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl ChangeNotifier {
    /// Notifier with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Tell every listener that `store_name` changed
    pub fn notify(&self, store_name: &str) {
        // snapshot so a listener may subscribe without deadlocking
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_change(store_name);
        }
    }
}
