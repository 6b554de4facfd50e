//! Callback registry with per-callback panic isolation.
//!
//! Callbacks run synchronously on the notifying thread, after the registry lock
//! has been released, in registration order. A callback that panics is logged
//! and skipped; the remaining callbacks still run and the panic never reaches
//! the caller of `notify`.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Shared callback handle.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entries<T> {
    next_id: u64,
    list: Vec<(u64, Callback<T>)>,
}

/// Ordered set of subscribers for one report stream.
pub struct SubscriberSet<T> {
    label: &'static str,
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T: 'static> SubscriberSet<T> {
    /// `label` names the stream in log output.
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                list: Vec::new(),
            })),
        }
    }

    /// Register a callback. Keep the returned handle to detach it later.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.insert(Arc::new(callback));
        let weak: Weak<Mutex<Entries<T>>> = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = weak.upgrade() {
                entries.lock().list.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Register a callback under a raw id, for sources that detach by id.
    pub fn insert(&self, callback: Callback<T>) -> u64 {
        let mut entries = self.entries.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.list.push((id, callback));
        id
    }

    /// Remove the callback registered under `id`. Returns whether it existed.
    pub fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.list.len();
        entries.list.retain(|(entry_id, _)| *entry_id != id);
        entries.list.len() != before
    }

    /// Deliver `value` to every subscriber. Returns how many returned normally.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .lock()
            .list
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        let mut delivered = 0;
        for callback in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    tracing::error!(
                        stream = self.label,
                        panic = %panic_message(payload.as_ref()),
                        "subscriber panicked; continuing delivery"
                    );
                }
            }
        }
        delivered
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().list.clear();
    }
}

/// Detach handle returned by every `on_*` / `subscribe` call.
///
/// Dropping the handle leaves the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the callback. Calling this after the source is gone is a no-op.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
