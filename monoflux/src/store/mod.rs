//! Store runtime
//!
//! A store wraps user state behind a restricted public surface:
//! - [`Store`]: the facade handed to outside callers (`get_state`, `listen`,
//!   events, statics and exported methods)
//! - [`StoreDefinition`]: declares the initial state, methods and setup
//! - [`StoreSetup`]: binds actions, lifecycle handlers and exports during setup
//! - [`StoreContext`]: what a method sees while it runs
//!
//! Each store registers exactly one dispatcher callback. When a payload
//! arrives for a bound action, the handler runs against a working copy of the
//! state which is committed on success, after which change listeners fire.

mod context;
mod definition;
mod emitter;
mod handler;

pub use context::StoreContext;
pub use definition::{StoreDefinition, StoreSetup};
pub use emitter::EventEmitter;
pub use handler::{conventional_name, Handler, MethodTable};

use crate::action::{ActionRegistry, ActionSource, IntoArgs};
use crate::dispatcher::Dispatcher;
use crate::error::{FluxError, Result};
use crate::fetch::{AsyncMethod, FetchOutcome, LoadCounter};
use crate::snapshot::{Commit, ManagedStore};
use crate::types::{ActionToken, DispatchToken, ListenerId, Payload};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Bounds every store state type satisfies
pub trait StoreState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreState for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

const CHANGE: &str = "change";

type PublicFn<S> = dyn Fn(&Store<S>, Vec<Value>) -> Result<Value> + Send + Sync;

/// A method on a store's public surface
///
/// Receives the live store, so `get_state` inside it reads current state.
pub struct PublicMethod<S> {
    f: Arc<PublicFn<S>>,
}

impl<S> Clone for PublicMethod<S> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<S> PublicMethod<S> {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Store<S>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

impl<S> fmt::Debug for PublicMethod<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PublicMethod")
    }
}

/// Something `wait_for` can wait on
pub trait WaitSource {
    /// The dispatcher registration to wait for
    fn wait_token(&self) -> DispatchToken;
}

impl WaitSource for DispatchToken {
    fn wait_token(&self) -> DispatchToken {
        *self
    }
}

impl<S> WaitSource for Store<S> {
    fn wait_token(&self) -> DispatchToken {
        self.core.token
    }
}

impl<T: WaitSource + ?Sized> WaitSource for &T {
    fn wait_token(&self) -> DispatchToken {
        (**self).wait_token()
    }
}

/// Everything behind a store's facade
pub(crate) struct StoreCore<S> {
    name: String,
    token: DispatchToken,
    state: RwLock<S>,
    /// Flattened method table, inherited methods included
    methods: MethodTable<S>,
    /// Bound action handlers
    listeners: RwLock<HashMap<ActionToken, Handler<S>>>,
    /// Every token bound, in binding order
    all_listeners: RwLock<Vec<ActionToken>>,
    lifecycle: RwLock<HashMap<String, Vec<Handler<S>>>>,
    handling_errors: AtomicBool,
    changes: EventEmitter<S>,
    events: EventEmitter<Value>,
    public: RwLock<HashMap<String, PublicMethod<S>>>,
    async_methods: RwLock<HashMap<String, AsyncMethod<S>>>,
    loading: LoadCounter,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ActionRegistry>,
}

impl<S: StoreState> StoreCore<S> {
    pub(crate) fn new(
        name: String,
        state: S,
        methods: MethodTable<S>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<ActionRegistry>,
    ) -> Self {
        let handling_errors = methods.contains(&lifecycle_method("error"));
        Self {
            name,
            token: DispatchToken::new(),
            state: RwLock::new(state),
            methods,
            listeners: RwLock::new(HashMap::new()),
            all_listeners: RwLock::new(Vec::new()),
            lifecycle: RwLock::new(HashMap::new()),
            handling_errors: AtomicBool::new(handling_errors),
            changes: EventEmitter::new(),
            events: EventEmitter::new(),
            public: RwLock::new(HashMap::new()),
            async_methods: RwLock::new(HashMap::new()),
            loading: LoadCounter::default(),
            dispatcher,
            registry,
        }
    }

    /// Dispatcher callback: run the handler bound to this payload's action
    pub(crate) fn handle(&self, payload: &Payload) -> Result<()> {
        let handler = self.listeners.read().get(&payload.action).cloned();
        let Some(handler) = handler else {
            return Ok(());
        };

        trace!(store = %self.name, action = %payload.action, "store handling action");
        let result = self.run(payload.action.name(), |ctx| {
            handler.invoke(ctx, payload.data.clone())
        });

        match result {
            Ok(_) => {
                self.emit_change();
                Ok(())
            }
            Err(err) if !err.is_configuration() && self.is_handling_errors() => {
                warn!(store = %self.name, action = %payload.action, error = %err, "handler failed");
                let event = json!({
                    "error": err.to_string(),
                    "action": payload.action.name(),
                    "data": payload.data,
                });
                self.emit_lifecycle("error", &event)
            }
            Err(err) => Err(err),
        }
    }

    /// Run `f` against a working copy of the state and commit it on success
    ///
    /// Returns whether the method asked for a change notification.
    pub(crate) fn run<F>(&self, current: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut StoreContext<'_, S>) -> Result<()>,
    {
        let mut working = self.state.read().clone();
        let requested = {
            let mut ctx = StoreContext::new(&mut working, self, current);
            f(&mut ctx)?;
            ctx.change_requested()
        };
        *self.state.write() = working;
        Ok(requested)
    }

    /// Run lifecycle handlers for `event`
    ///
    /// Change listeners are only notified if a handler called `emit_change`.
    pub(crate) fn emit_lifecycle(&self, event: &str, data: &Value) -> Result<()> {
        let mut handlers = self
            .lifecycle
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();
        if let Some(method) = self.methods.get(&lifecycle_method(event)) {
            handlers.push(method.clone());
        }
        if handlers.is_empty() {
            return Ok(());
        }

        debug!(store = %self.name, event, handlers = handlers.len(), "lifecycle event");
        let requested = self.run(event, |ctx| {
            handlers
                .iter()
                .try_for_each(|handler| handler.invoke(ctx, data.clone()))
        })?;
        if requested {
            self.emit_change();
        }
        Ok(())
    }

    pub(crate) fn emit_change(&self) {
        let state = self.state.read().clone();
        let notified = self.changes.emit(CHANGE, &state);
        trace!(store = %self.name, notified, "change emitted");
    }

    pub(crate) fn state_value(&self) -> Result<Value> {
        serde_json::to_value(&*self.state.read()).map_err(|source| FluxError::State {
            store: self.name.clone(),
            source,
        })
    }

    pub(crate) fn decode_state(&self, value: Value) -> Result<S> {
        serde_json::from_value(value).map_err(|source| FluxError::State {
            store: self.name.clone(),
            source,
        })
    }

    pub(crate) fn set_state(&self, state: S) {
        *self.state.write() = state;
    }
}

impl<S> StoreCore<S> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn token(&self) -> DispatchToken {
        self.token
    }

    pub(crate) fn methods(&self) -> &MethodTable<S> {
        &self.methods
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub(crate) fn loading(&self) -> &LoadCounter {
        &self.loading
    }

    pub(crate) fn is_handling_errors(&self) -> bool {
        self.handling_errors.load(Ordering::SeqCst)
    }

    pub(crate) fn bind(&self, token: ActionToken, handler: Handler<S>) {
        debug!(store = %self.name, action = %token, "action bound");
        if self.listeners.write().insert(token.clone(), handler).is_none() {
            self.all_listeners.write().push(token);
        }
    }

    pub(crate) fn add_lifecycle(&self, event: &str, handler: Handler<S>) {
        if event == "error" {
            self.handling_errors.store(true, Ordering::SeqCst);
        }
        self.lifecycle
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    pub(crate) fn export(&self, name: String, method: PublicMethod<S>) {
        self.public.write().insert(name, method);
    }

    pub(crate) fn export_async(&self, name: String, method: AsyncMethod<S>) {
        self.async_methods.write().insert(name, method);
    }
}

/// Convention method run for a lifecycle event (`bootstrap` → `onBootstrap`)
pub(crate) fn lifecycle_method(event: &str) -> String {
    match event {
        "snapshot" => "onTakeSnapshot".to_string(),
        other => conventional_name(other),
    }
}

/// The public surface of a store
///
/// Cloning is cheap; clones share the same store.
pub struct Store<S> {
    core: Arc<StoreCore<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<S: StoreState> Store<S> {
    pub(crate) fn from_core(core: Arc<StoreCore<S>>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<StoreCore<S>> {
        &self.core
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The store's dispatcher registration, usable with `wait_for`
    pub fn dispatch_token(&self) -> DispatchToken {
        self.core.token
    }

    /// A copy of the current state
    ///
    /// Mutating the returned value never affects the store.
    pub fn get_state(&self) -> S {
        self.core.state.read().clone()
    }

    /// Subscribe to change notifications
    pub fn listen<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.core.changes.on(CHANGE, f)
    }

    /// Unsubscribe a change listener
    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.core.changes.off(id)
    }

    /// Notify change listeners with the current state
    pub fn emit_change(&self) {
        self.core.emit_change();
    }

    /// Subscribe to a named event on the store's emitter
    pub fn on<F>(&self, event: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.core.events.on(event, f)
    }

    /// Alias of [`Store::on`]
    pub fn add_listener<F>(&self, event: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(event, f)
    }

    /// Subscribe to the next occurrence of an event
    pub fn once<F>(&self, event: impl Into<String>, f: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.core.events.once(event, f)
    }

    /// Unsubscribe from the store's emitter
    pub fn off(&self, id: ListenerId) -> bool {
        self.core.events.off(id)
    }

    /// Alias of [`Store::off`]
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.off(id)
    }

    /// Emit a named event; returns how many listeners were called
    pub fn emit(&self, event: &str, value: &Value) -> usize {
        self.core.events.emit(event, value)
    }

    /// Call a static or exported method
    pub fn call<A: IntoArgs>(&self, method: &str, args: A) -> Result<Value> {
        let found = self.core.public.read().get(method).cloned();
        let method = found.ok_or_else(|| FluxError::UnknownMethod {
            store: self.core.name.clone(),
            method: method.to_string(),
        })?;
        (method.f)(self, args.into_args())
    }

    /// Invoke an async method registered with `register_async`
    pub fn fetch<A: IntoArgs>(&self, method: &str, args: A) -> Result<FetchOutcome> {
        let found = self.core.async_methods.read().get(method).cloned();
        let async_method = found.ok_or_else(|| FluxError::UnknownMethod {
            store: self.core.name.clone(),
            method: method.to_string(),
        })?;
        async_method.invoke(self, args.into_args())
    }

    /// True while at least one async fetch of this store is outstanding
    pub fn is_loading(&self) -> bool {
        self.core.loading.is_loading()
    }

    /// Whether an `error` lifecycle handler is registered
    pub fn is_handling_errors(&self) -> bool {
        self.core.is_handling_errors()
    }

    /// Whether `name` is callable through [`Store::call`] or [`Store::fetch`]
    pub fn has_method(&self, name: &str) -> bool {
        self.core.public.read().contains_key(name)
            || self.core.async_methods.read().contains_key(name)
    }

    /// Names on the public surface, sorted
    pub fn public_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .core
            .public
            .read()
            .keys()
            .chain(self.core.async_methods.read().keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Whether this store has a handler bound to `source`
    pub fn listens_to<A: ActionSource>(&self, source: A) -> bool {
        source
            .action_token()
            .is_some_and(|token| self.core.listeners.read().contains_key(&token))
    }

    /// Tokens this store is bound to, in binding order
    pub fn bound_actions(&self) -> Vec<ActionToken> {
        self.core.all_listeners.read().clone()
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.core.name)
            .field("token", &self.core.token)
            .finish()
    }
}

impl<S: StoreState> ManagedStore for Store<S> {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn snapshot(&self) -> Result<Value> {
        self.core.state_value()
    }

    fn prepare(&self, state: Value) -> Result<Commit> {
        let decoded = self.core.decode_state(state)?;
        let core = self.core.clone();
        Ok(Box::new(move || {
            core.set_state(decoded);
            core.emit_change();
        }))
    }

    fn lifecycle(&self, event: &str, data: &Value) -> Result<()> {
        self.core.emit_lifecycle(event, data)
    }
}
