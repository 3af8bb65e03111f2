//! Network reachability monitor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::info;

type Handler = Arc<dyn Fn(bool) + Send + Sync>;

struct Shared {
    state: watch::Sender<bool>,
    handlers: Mutex<HashMap<u64, Handler>>,
    next_id: AtomicU64,
}

/// Online/offline flag with change notification.
///
/// Handlers run synchronously on the thread that calls
/// [`Connectivity::set_online`], outside the handler lock.
#[derive(Clone)]
pub struct Connectivity {
    shared: Arc<Shared>,
}

impl Connectivity {
    /// Create a monitor starting in the given state.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            shared: Arc::new(Shared {
                state,
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current connectivity state.
    pub fn is_online(&self) -> bool {
        *self.shared.state.borrow()
    }

    /// Record a reachability change. Handlers fire only on transitions.
    pub fn set_online(&self, online: bool) {
        let previous = self.shared.state.send_replace(online);
        if previous == online {
            return;
        }
        info!("Connectivity changed: {}", if online { "online" } else { "offline" });

        let handlers: Vec<Handler> = self
            .shared
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler(online);
        }
    }

    /// Register a transition handler; it stays attached while the returned
    /// subscription is alive.
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(handler));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Receiver for async consumers.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shared.state.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Handle returned by [`Connectivity::on_change`]; detaches on drop.
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Detach the handler now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .handlers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&self.id);
        }
    }
}
