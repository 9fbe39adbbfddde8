//! Named-event emitter backing `listen`/`unlisten` and the public `on`/`off`/`emit`

use crate::types::ListenerId;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

type ListenerFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listener<T> {
    id: ListenerId,
    event: String,
    once: bool,
    f: ListenerFn<T>,
}

/// Listeners keyed by event name
///
/// Listeners are invoked outside the internal lock, so a listener may
/// subscribe or unsubscribe while being notified.
pub struct EventEmitter<T> {
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<T> EventEmitter<T> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `event`
    pub fn on<F>(&self, event: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add(event.into(), false, Arc::new(f))
    }

    /// Subscribe to the next occurrence of `event` only
    pub fn once<F>(&self, event: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add(event.into(), true, Arc::new(f))
    }

    fn add(&self, event: String, once: bool, f: ListenerFn<T>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.write().push(Listener { id, event, once, f });
        id
    }

    /// Unsubscribe; returns false if the id was not subscribed
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        before != listeners.len()
    }

    /// Drop every listener for `event`
    pub fn remove_all(&self, event: &str) -> usize {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.event != event);
        before - listeners.len()
    }

    /// Notify every listener of `event`; returns how many were called
    pub fn emit(&self, event: &str, value: &T) -> usize {
        let targets: Vec<ListenerFn<T>> = {
            let mut listeners = self.listeners.write();
            let targets = listeners
                .iter()
                .filter(|l| l.event == event)
                .map(|l| l.f.clone())
                .collect();
            listeners.retain(|l| !(l.once && l.event == event));
            targets
        };

        for f in &targets {
            f(value);
        }
        targets.len()
    }

    /// Number of listeners for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|l| l.event == event)
            .count()
    }
}

impl<T> fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
