//! Subscriber lists shared by devices and beam paths.
//!
//! Every entity that publishes change notifications owns a [`Subscribers`] list.
//! Handlers are plain callbacks (`Arc<dyn Fn(&E) + Send + Sync>`), in the same shape as
//! the change listeners attached to instrument parameters.
//!
//! # Delivery
//!
//! [`Subscribers::publish`] copies the current handler list before invoking anything, so
//! handlers may subscribe or unsubscribe (themselves or others) while a notification is
//! being delivered. A handler removed mid-delivery is skipped for the remainder of that
//! delivery; a handler added mid-delivery first hears the next notification.
//!
//! # Handles
//!
//! Handles are drawn from one process-wide counter, so a handle is never valid on more
//! than one list. Passing a handle to a list that did not issue it is a no-op.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Callback invoked for every published event.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Opaque handle returned by `subscribe`, used to cancel the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Entry<E> {
    id: SubscriptionId,
    active: AtomicBool,
    handler: Handler<E>,
}

/// Thread-safe list of subscribers for events of type `E`.
pub struct Subscribers<E> {
    entries: RwLock<Vec<Arc<Entry<E>>>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

impl<E> Subscribers<E> {
    /// Create an empty subscriber list.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler and return its handle.
    pub fn subscribe(&self, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Arc::new(Entry {
            id,
            active: AtomicBool::new(true),
            handler,
        }));
        id
    }

    /// Remove a handler. Unknown or already removed handles are ignored.
    ///
    /// Returns whether a live subscription was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        match entries.iter().position(|entry| entry.id == id) {
            Some(idx) => {
                let entry = entries.remove(idx);
                entry.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every handler registered when delivery starts.
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Arc<Entry<E>>> = self.entries.read().clone();
        for entry in snapshot {
            if entry.active.load(Ordering::SeqCst) {
                (entry.handler)(event);
            }
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` refers to a live subscription.
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.read().iter().any(|entry| entry.id == id)
    }
}
