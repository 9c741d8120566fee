use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hitl_protocol::{AgentEvent, EventKind};

/// Callback invoked for every event of the kind it was registered under.
pub type Listener = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&AgentEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by `on`, used to unregister with `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

/// Subscribers grouped by event kind, kept in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Registry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.by_kind.entry(kind).or_default().push((id, listener));
        id
    }

    /// Returns false if the listener was not registered under `kind`.
    pub fn remove(&self, kind: &EventKind, id: ListenerId) -> bool {
        let mut inner = lock(&self.inner);
        let Some(listeners) = inner.by_kind.get_mut(kind) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }

    pub fn count(&self, kind: &EventKind) -> usize {
        lock(&self.inner).by_kind.get(kind).map_or(0, Vec::len)
    }

    /// Invoke every listener registered for the event's kind.
    ///
    /// Iterates over a snapshot taken before the first call, so listeners may
    /// register or unregister (themselves included) while being invoked. A
    /// panicking listener is logged and does not stop the others. Returns the
    /// number of listeners that completed normally.
    pub fn dispatch(&self, event: &AgentEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Listener> = lock(&self.inner)
            .by_kind
            .get(&kind)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        let mut completed = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(kind = %kind, reason = %reason, "event listener panicked");
                }
            }
        }
        completed
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
