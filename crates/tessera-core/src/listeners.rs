//! Observer registry with individually removable callbacks.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct RegistryInner<T> {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Callback<T>>>,
}

impl<T> RegistryInner<T> {
    fn listeners(&self) -> MutexGuard<'_, BTreeMap<u64, Callback<T>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A set of callbacks notified with a shared value.
///
/// Cloning yields another handle to the same set. Callbacks run in
/// registration order, outside the registry lock, so a callback may register
/// or remove listeners. A panicking callback is logged and skipped.
pub struct ListenerRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for ListenerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(BTreeMap::new()),
            }),
        }
    }
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Keep the returned [`Subscription`] to remove it.
    pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners().insert(id, Arc::new(listener));

        let registry: Weak<RegistryInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.listeners().remove(&id);
            }
        })
    }

    /// Invoke every registered callback with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<(u64, Callback<T>)> = self
            .inner
            .listeners()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!(listener = id, "listener panicked during notification");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.listeners().clear();
    }
}

impl<T> fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.inner.listeners().len())
            .finish()
    }
}

/// Handle for a registered listener.
///
/// Dropping the handle leaves the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[must_use = "dropping a Subscription keeps the listener registered forever"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// Remove the listener. Safe to call after the registry is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
