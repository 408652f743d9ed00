//! Event bindings and dispatch.
//!
//! Channels and the client's global channel each hold an [`EventDispatcher`].
//! A binding attaches a callback to a single event name, or to every event
//! (catch-all). Binding ids are unique across the dispatcher, so
//! [`EventDispatcher::unbind`] removes exactly the one entry it was given.
//!
//! Within a dispatcher, catch-all bindings run before named ones — the same
//! order the client applies between the global channel and a named channel.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub use crate::protocol::PulseEvent;

/// Stable identifier of one binding
pub type BindingId = u64;

/// Hook invoked when an event arrives with no named bindings
pub type FailThroughFn = Arc<dyn Fn(&str, &PulseEvent) + Send + Sync + 'static>;

type BindingFn = Arc<dyn Fn(&PulseEvent) + Send + Sync + 'static>;

struct Binding {
    id: BindingId,
    callback: BindingFn,
}

/// All bindings of one dispatcher, keyed by event name plus the catch-all
/// list. Kept behind a single lock so emit sees a consistent snapshot.
#[derive(Default)]
struct BindingTable {
    named: HashMap<String, Vec<Binding>>,
    catch_all: Vec<Binding>,
}

impl BindingTable {
    /// Remove the binding with the given id, wherever it lives. Prunes the
    /// name entry when it empties. Returns whether anything was removed.
    fn remove(&mut self, id: BindingId) -> bool {
        let catch_all_len = self.catch_all.len();
        self.catch_all.retain(|b| b.id != id);
        if self.catch_all.len() != catch_all_len {
            return true;
        }

        let mut removed = false;
        self.named.retain(|_, bindings| {
            if !removed {
                let len = bindings.len();
                bindings.retain(|b| b.id != id);
                removed = len != bindings.len();
            }
            !bindings.is_empty()
        });
        removed
    }

    fn len(&self) -> usize {
        self.catch_all.len() + self.named.values().map(Vec::len).sum::<usize>()
    }
}

/// Dispatches events to bound callbacks.
///
/// Cheap to clone; clones share the same binding table.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    table: RwLock<BindingTable>,
    next_id: AtomicU64,
    fail_through: RwLock<Option<FailThroughFn>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher whose fail-through hook fires for events that
    /// reach no named binding.
    pub fn with_fail_through(
        fail_through: impl Fn(&str, &PulseEvent) + Send + Sync + 'static,
    ) -> Self {
        let dispatcher = Self::new();
        *dispatcher.inner.fail_through.write() = Some(Arc::new(fail_through));
        dispatcher
    }

    /// Bind a callback to one event name
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&PulseEvent) + Send + Sync + 'static,
    ) -> BindingId {
        let name = event_name.into();
        debug!("Binding callback for event: {}", name);

        let binding = self.new_binding(callback);
        let id = binding.id;
        self.inner
            .table
            .write()
            .named
            .entry(name)
            .or_default()
            .push(binding);
        id
    }

    /// Bind a callback to every event
    pub fn bind_all(&self, callback: impl Fn(&PulseEvent) + Send + Sync + 'static) -> BindingId {
        let binding = self.new_binding(callback);
        let id = binding.id;
        self.inner.table.write().catch_all.push(binding);
        id
    }

    /// Remove exactly the binding with this id. Returns whether it existed.
    pub fn unbind(&self, binding_id: BindingId) -> bool {
        self.inner.table.write().remove(binding_id)
    }

    /// Remove every binding
    pub fn unbind_all(&self) {
        let mut table = self.inner.table.write();
        table.named.clear();
        table.catch_all.clear();
    }

    /// Deliver an event: catch-all bindings first, then the bindings for its
    /// name. When no named binding exists, the fail-through hook fires.
    pub fn emit(&self, event: &PulseEvent) {
        let (callbacks, any_named) = {
            let table = self.inner.table.read();
            let named = table.named.get(&event.event);

            let mut run: Vec<BindingFn> =
                Vec::with_capacity(table.catch_all.len() + named.map_or(0, Vec::len));
            run.extend(table.catch_all.iter().map(|b| b.callback.clone()));
            if let Some(named) = named {
                run.extend(named.iter().map(|b| b.callback.clone()));
            }

            (run, named.is_some())
        };

        // Callbacks run outside the lock; a panicking callback must not take
        // the dispatcher down with it
        for callback in callbacks {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event);
            }));
            if outcome.is_err() {
                warn!("Binding for '{}' panicked", event.event);
            }
        }

        if !any_named {
            if let Some(ref fail_through) = *self.inner.fail_through.read() {
                fail_through(&event.event, event);
            }
        }
    }

    /// Total number of live bindings
    pub fn binding_count(&self) -> usize {
        self.inner.table.read().len()
    }

    fn new_binding(&self, callback: impl Fn(&PulseEvent) + Send + Sync + 'static) -> Binding {
        Binding {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            callback: Arc::new(callback),
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("binding_count", &self.binding_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_bind_and_emit() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        dispatcher.bind("test-event", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(&PulseEvent::new("test-event"));
        dispatcher.emit(&PulseEvent::new("other-event"));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_catch_all_runs_before_named() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_clone = order.clone();
        dispatcher.bind("event", move |_| order_clone.lock().push("named"));
        let order_clone = order.clone();
        dispatcher.bind_all(move |_| order_clone.lock().push("catch-all"));

        dispatcher.emit(&PulseEvent::new("event"));

        assert_eq!(order.lock().as_slice(), &["catch-all", "named"]);
    }

    #[test]
    fn test_binding_ids_are_unique() {
        let dispatcher = EventDispatcher::new();
        let id1 = dispatcher.bind("a", |_| {});
        let id2 = dispatcher.bind("a", |_| {});
        let id3 = dispatcher.bind_all(|_| {});

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_eq!(dispatcher.binding_count(), 3);
    }

    #[test]
    fn test_unbind_removes_exactly_one() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        let id = dispatcher.bind("event", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        let counter_clone = counter.clone();
        dispatcher.bind("event", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(dispatcher.unbind(id));
        assert!(!dispatcher.unbind(id));

        dispatcher.emit(&PulseEvent::new("event"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.binding_count(), 1);
    }

    #[test]
    fn test_unbind_catch_all_by_id() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let id = dispatcher.bind_all(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(&PulseEvent::new("a"));
        assert!(dispatcher.unbind(id));
        dispatcher.emit(&PulseEvent::new("b"));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbind_all() {
        let dispatcher = EventDispatcher::new();
        dispatcher.bind("a", |_| {});
        dispatcher.bind("b", |_| {});
        dispatcher.bind_all(|_| {});

        dispatcher.unbind_all();
        assert_eq!(dispatcher.binding_count(), 0);
    }

    #[test]
    fn test_fail_through_only_without_named_bindings() {
        let missed = Arc::new(Mutex::new(Vec::new()));
        let missed_clone = missed.clone();

        let dispatcher = EventDispatcher::with_fail_through(move |name, _| {
            missed_clone.lock().push(name.to_string());
        });
        dispatcher.bind("known", |_| {});
        // A catch-all binding does not count as handling a named event
        dispatcher.bind_all(|_| {});

        dispatcher.emit(&PulseEvent::new("known"));
        dispatcher.emit(&PulseEvent::new("unknown"));

        assert_eq!(missed.lock().as_slice(), &["unknown".to_string()]);
    }
}
