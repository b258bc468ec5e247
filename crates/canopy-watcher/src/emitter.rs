//! Listener registry with scoped subscriptions
//!
//! Control signals between native handles, the registry and path watchers
//! are delivered synchronously through an [`Emitter`]. Every registration
//! returns a [`Subscription`] whose release runs exactly once, either on an
//! explicit [`Subscription::dispose`] or when the guard is dropped.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T: ?Sized> {
    next_id: u64,
    entries: BTreeMap<u64, Listener<T>>,
}

/// A set of listeners for one kind of signal
pub struct Emitter<T: ?Sized> {
    inner: Arc<Mutex<Listeners<T>>>,
}

impl<T: ?Sized + 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned guard is released.
    pub fn on(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut listeners = self.inner.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.insert(id, Arc::new(listener));
            id
        };

        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                // Dropped outside the lock: a listener may own other subscriptions
                let removed = inner.lock().entries.remove(&id);
                drop(removed);
            }
        })
    }

    /// Call every listener in registration order.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// unsubscribe (on this or any other emitter) while being called. A
    /// listener removed during an emit may still see that one emit.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self.inner.lock().entries.values().cloned().collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Drop every listener. Outstanding guards become no-ops.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut self.inner.lock().entries);
        drop(removed);
    }
}

impl<T: ?Sized + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Guard for a registered listener
///
/// The release action runs exactly once: on [`dispose`](Self::dispose) or on
/// drop, whichever comes first.
#[must_use = "dropping a Subscription unregisters the listener immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn dispose(mut self) {
        self.run();
    }

    /// Keep the listener registered for the lifetime of the emitter
    pub fn forget(mut self) {
        self.release = None;
    }

    fn run(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_listeners_in_order() {
        let emitter: Emitter<u32> = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let _a = emitter.on(move |v| s1.lock().push(("a", *v)));
        let s2 = seen.clone();
        let _b = emitter.on(move |v| s2.lock().push(("b", *v)));

        emitter.emit(&7);
        assert_eq!(*seen.lock(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let emitter: Emitter<()> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let sub = emitter.on(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(&());
        drop(sub);
        emitter.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_release_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.forget();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_emit() {
        let emitter: Emitter<()> = Emitter::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let s = slot.clone();
        let sub = emitter.on(move |_| {
            let taken = s.lock().take();
            drop(taken);
        });
        *slot.lock() = Some(sub);

        emitter.emit(&());
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_guard_outliving_emitter_is_harmless() {
        let emitter: Emitter<str> = Emitter::new();
        let sub = emitter.on(|_| {});
        drop(emitter);
        drop(sub);
    }

    #[test]
    fn test_clear_drops_all_listeners() {
        let emitter: Emitter<()> = Emitter::new();
        let _a = emitter.on(|_| {});
        let _b = emitter.on(|_| {});
        emitter.clear();
        assert_eq!(emitter.listener_count(), 0);
    }
}
