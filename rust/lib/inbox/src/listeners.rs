use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Handle returned by [`Listeners::add`]. Pass it back to
/// [`Listeners::remove`] to unregister that exact handler.
///
/// Ids are unique process-wide, so one id never matches a handler in a
/// different registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct HandlerEntry<T: ?Sized> {
    id: ListenerId,
    handler: Handler<T>,
}

/// Typed fan-out registry.
///
/// - `add(handler)` registers a handler and returns its id.
/// - `remove(id)` unregisters it.
/// - `emit(&value)` calls every handler registered at the time of the call.
///
/// Handlers run outside the internal lock, so a handler may add or remove
/// listeners (including itself). A panicking handler is logged and skipped;
/// the remaining handlers still run.
pub struct Listeners<T: ?Sized> {
    name: &'static str,
    entries: RwLock<Vec<HandlerEntry<T>>>,
}

impl<T: ?Sized> Listeners<T> {
    /// `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        let entry = HandlerEntry {
            id,
            handler: Arc::new(handler) as Handler<T>,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        id
    }

    /// Returns false if `id` was not registered (already removed).
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() < before
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `value` to every registered handler. Returns how many
    /// handlers completed without panicking.
    pub fn emit(&self, value: &T) -> usize {
        let handlers: Vec<Handler<T>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| Arc::clone(&e.handler))
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(value))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!(listeners = self.name, "listener panicked; skipped"),
            }
        }
        delivered
    }
}

impl<T: ?Sized> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
