//! Listener registration with subscription handles.
//!
//! One fabric backs the cache's per-key listeners, the lifecycle sources, and
//! engine state subscribers. Registration returns a [`Subscription`] handle;
//! closing the handle (or dropping it) detaches the callback. Callback panics
//! are caught and logged, they never corrupt the emitting component.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

struct Slot<A> {
    id: Uuid,
    callback: Arc<dyn Fn(&A) + Send + Sync>,
}

/// A set of callbacks invoked in registration order on every emit.
pub struct ListenerSet<A> {
    slots: Arc<RwLock<Vec<Slot<A>>>>,
}

impl<A> Clone for ListenerSet<A> {
    fn clone(&self) -> Self {
        Self { slots: self.slots.clone() }
    }
}

impl<A: 'static> Default for ListenerSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> ListenerSet<A> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a callback. The returned handle detaches it on `close` (or
    /// drop); detaching twice is a no-op.
    pub fn subscribe(&self, callback: impl Fn(&A) + Send + Sync + 'static) -> Subscription {
        let id = Uuid::new_v4();
        self.slots.write().push(Slot {
            id,
            callback: Arc::new(callback),
        });

        let slots = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots.write().retain(|slot| slot.id != id);
            }
        })
    }

    /// Invoke every registered callback with `arg`.
    pub fn emit(&self, arg: &A) {
        let callbacks: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|slot| slot.callback.clone())
            .collect();

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(arg))).is_err() {
                warn!("listener callback panicked; detaching fault from emitter");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Drop every registered callback. Outstanding handles become no-ops.
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

/// Handle owning one listener registration.
pub struct Subscription {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// Detach the listener. Idempotent.
    pub fn close(&self) {
        if let Some(detach) = self.detach.lock().take() {
            detach();
        }
    }

    /// Chain a hook to run after this subscription closes.
    pub(crate) fn on_close(self, hook: impl FnOnce() + Send + 'static) -> Subscription {
        Subscription::new(move || {
            self.close();
            hook();
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_emit_close() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let sub = set.subscribe({
            let seen = seen.clone();
            move |v| {
                seen.fetch_add(*v as usize, Ordering::SeqCst);
            }
        });

        set.emit(&2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(set.len(), 1);

        sub.close();
        set.emit(&2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn test_drop_detaches() {
        let set: ListenerSet<()> = ListenerSet::new();
        {
            let _sub = set.subscribe(|_| {});
            assert_eq!(set.len(), 1);
        }
        assert!(set.is_empty());
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let set: ListenerSet<()> = ListenerSet::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let _bad = set.subscribe(|_| panic!("boom"));
        let _good = set.subscribe({
            let seen = seen.clone();
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        set.emit(&());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_close_hook_runs() {
        let set: ListenerSet<()> = ListenerSet::new();
        let closed = Arc::new(AtomicUsize::new(0));

        let sub = set.subscribe(|_| {}).on_close({
            let closed = closed.clone();
            move || {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        });

        sub.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }
}
