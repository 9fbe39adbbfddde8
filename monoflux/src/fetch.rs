//! Async orchestration for store methods
//!
//! An [`AsyncSpec`] describes one data-fetching method declaratively: where
//! to look for a cached value, when to go remote, and which actions to fire
//! as the fetch progresses. Invoking it through [`crate::Store::fetch`]
//! either answers from cache or starts the fetch and hands back a future
//! that settles it.

use crate::action::{Action, ActionSource};
use crate::error::{FluxError, Result};
use crate::store::{Store, StoreState};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a remote fetch settles with: the fetched value or an error value
pub type RemoteFuture = BoxFuture<'static, std::result::Result<Value, Value>>;

/// The settlement half of a started fetch
pub type PendingFetch = BoxFuture<'static, Result<()>>;

type LocalFn<S> = dyn Fn(&S, &[Value]) -> Option<Value> + Send + Sync;
type ShouldFetchFn<S> = dyn Fn(&S, &[Value]) -> bool + Send + Sync;
type RemoteFn<S> = dyn Fn(&S, &[Value]) -> RemoteFuture + Send + Sync;
type InterceptFn = dyn Fn(Value, &Action, &[Value]) -> Value + Send + Sync;

/// A success/error/loading slot
///
/// `Some(None)` means something was supplied that is not a callable action.
type Slot = Option<Option<Action>>;

/// Declarative description of one async store method
pub struct AsyncSpec<S> {
    local: Option<Arc<LocalFn<S>>>,
    should_fetch: Option<Arc<ShouldFetchFn<S>>>,
    remote: Option<Arc<RemoteFn<S>>>,
    success: Slot,
    error: Slot,
    loading: Slot,
    intercept: Option<Arc<InterceptFn>>,
}

impl<S> Default for AsyncSpec<S> {
    fn default() -> Self {
        Self {
            local: None,
            should_fetch: None,
            remote: None,
            success: None,
            error: None,
            loading: None,
            intercept: None,
        }
    }
}

impl<S: StoreState> AsyncSpec<S> {
    /// An empty spec
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a cached value from state; `None` or JSON null counts as missing
    pub fn local<F>(mut self, f: F) -> Self
    where
        F: Fn(&S, &[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        self.local = Some(Arc::new(f));
        self
    }

    /// Decide whether to go remote, overriding the missing-value default
    pub fn should_fetch<F>(mut self, f: F) -> Self
    where
        F: Fn(&S, &[Value]) -> bool + Send + Sync + 'static,
    {
        self.should_fetch = Some(Arc::new(f));
        self
    }

    /// The remote fetch
    pub fn remote<F>(mut self, f: F) -> Self
    where
        F: Fn(&S, &[Value]) -> RemoteFuture + Send + Sync + 'static,
    {
        self.remote = Some(Arc::new(f));
        self
    }

    /// Action fired with the fetched value
    pub fn success(mut self, action: impl ActionSource) -> Self {
        self.success = Some(action.as_action());
        self
    }

    /// Action fired with the error value
    pub fn error(mut self, action: impl ActionSource) -> Self {
        self.error = Some(action.as_action());
        self
    }

    /// Action fired when the fetch starts
    pub fn loading(mut self, action: impl ActionSource) -> Self {
        self.loading = Some(action.as_action());
        self
    }

    /// Rewrite every value before it is handed to an action
    pub fn intercept_response<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &Action, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.intercept = Some(Arc::new(f));
        self
    }
}

impl<S> AsyncSpec<S> {
    pub(crate) fn validate(&self) -> Result<()> {
        let slots = [
            ("success", &self.success),
            ("error", &self.error),
            ("loading", &self.loading),
        ];
        match slots.iter().find(|(_, slot)| matches!(slot, Some(None))) {
            Some((name, _)) => Err(FluxError::NotAnAction(*name)),
            None => Ok(()),
        }
    }

    fn intercepted(&self, value: Value, action: &Action, args: &[Value]) -> Value {
        match &self.intercept {
            Some(f) => f(value, action, args),
            None => value,
        }
    }
}

impl<S> fmt::Debug for AsyncSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |slot: &Slot| slot.as_ref().map(|a| a.as_ref().map(|a| a.name().to_string()));
        f.debug_struct("AsyncSpec")
            .field("local", &self.local.is_some())
            .field("should_fetch", &self.should_fetch.is_some())
            .field("remote", &self.remote.is_some())
            .field("success", &name(&self.success))
            .field("error", &name(&self.error))
            .field("loading", &name(&self.loading))
            .finish()
    }
}

/// Outstanding fetches across every async method of one store
#[derive(Debug, Clone, Default)]
pub struct LoadCounter {
    count: Arc<AtomicUsize>,
}

impl LoadCounter {
    fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Number of fetches in flight
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// True while anything is in flight
    pub fn is_loading(&self) -> bool {
        self.count() > 0
    }

    fn hold(&self) -> LoadGuard {
        self.increment();
        LoadGuard {
            counter: self.clone(),
            held: true,
        }
    }
}

/// One in-flight fetch; gives its slot back when released or dropped
#[derive(Debug)]
struct LoadGuard {
    counter: LoadCounter,
    held: bool,
}

impl LoadGuard {
    fn release(&mut self) {
        if std::mem::take(&mut self.held) {
            self.counter.decrement();
        }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Result of invoking an async method
pub enum FetchOutcome {
    /// Answered from state; change listeners were notified
    Cached(Option<Value>),
    /// A remote fetch started; drive the future to settle it
    Pending(PendingFetch),
}

impl FetchOutcome {
    /// Whether a remote fetch was started
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Drive the fetch to completion, if one was started
    pub async fn settle(self) -> Result<()> {
        match self {
            Self::Cached(_) => Ok(()),
            Self::Pending(fetch) => fetch.await,
        }
    }
}

impl fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached(value) => f.debug_tuple("Cached").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// A registered async method
pub(crate) struct AsyncMethod<S> {
    name: Arc<str>,
    spec: Arc<AsyncSpec<S>>,
}

impl<S> Clone for AsyncMethod<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            spec: self.spec.clone(),
        }
    }
}

impl<S: StoreState> AsyncMethod<S> {
    pub(crate) fn new(name: String, spec: AsyncSpec<S>) -> Self {
        Self {
            name: name.into(),
            spec: Arc::new(spec),
        }
    }

    pub(crate) fn invoke(&self, store: &Store<S>, args: Vec<Value>) -> Result<FetchOutcome> {
        let spec = &self.spec;
        let state = store.get_state();

        let cached = spec
            .local
            .as_ref()
            .and_then(|local| local(&state, &args))
            .filter(|value| !value.is_null());
        let needed = match &spec.should_fetch {
            Some(predicate) => predicate(&state, &args),
            None => cached.is_none(),
        };

        if !needed {
            debug!(store = %store.name(), method = %self.name, "served from cache");
            store.emit_change();
            return Ok(FetchOutcome::Cached(cached));
        }

        let remote = spec
            .remote
            .as_ref()
            .ok_or_else(|| FluxError::MissingRemote(self.name.to_string()))?;

        let guard = store.core().loading().hold();
        if let Some(Some(loading)) = &spec.loading {
            loading.call(spec.intercepted(Value::Null, loading, &args))?;
        }

        debug!(store = %store.name(), method = %self.name, "remote fetch started");
        let request = remote(&state, &args);
        let settle = Settle {
            name: self.name.clone(),
            spec: spec.clone(),
            store: store.clone(),
            guard,
            args,
        };
        Ok(FetchOutcome::Pending(
            async move { settle.finish(request.await) }.boxed(),
        ))
    }
}

/// Everything the settlement future carries
///
/// Dropping it unsettled, with the future, still frees the load slot.
struct Settle<S> {
    name: Arc<str>,
    spec: Arc<AsyncSpec<S>>,
    store: Store<S>,
    guard: LoadGuard,
    args: Vec<Value>,
}

impl<S: StoreState> Settle<S> {
    fn finish(mut self, outcome: std::result::Result<Value, Value>) -> Result<()> {
        self.guard.release();

        match outcome {
            Ok(value) => {
                debug!(store = %self.store.name(), method = %self.name, "remote fetch succeeded");
                match &self.spec.success {
                    Some(Some(success)) => {
                        success.call(self.spec.intercepted(value, success, &self.args))
                    }
                    _ => Ok(()),
                }
            }
            Err(reason) => {
                warn!(store = %self.store.name(), method = %self.name, error = %reason, "remote fetch failed");
                if let Some(Some(error)) = &self.spec.error {
                    error.call(self.spec.intercepted(reason.clone(), error, &self.args))?;
                }

                let core = self.store.core();
                if !core.is_handling_errors() {
                    return Err(FluxError::Remote(reason));
                }
                let event = json!({ "error": reason, "method": &*self.name });
                core.emit_lifecycle("error", &event)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionsDefinition;
    use crate::store::StoreDefinition;
    use crate::Flux;
    use futures_util::future;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Cache {
        value: Option<String>,
        loading: u32,
    }

    #[test]
    fn test_non_action_slot_rejected() {
        let flux = Flux::new();
        let actions = flux.create_actions(ActionsDefinition::new("A").generate_action("done"));
        let constant = actions.get("done").map(|a| a.constant());

        let spec = AsyncSpec::<Cache>::new().success(constant);
        assert_eq!(
            spec.validate().unwrap_err().to_string(),
            "success handler must be an action function"
        );

        let spec = AsyncSpec::<Cache>::new().error(actions.get("done"));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_counter_never_underflows() {
        let counter = LoadCounter::default();
        counter.decrement();
        assert_eq!(counter.count(), 0);
        counter.increment();
        assert!(counter.is_loading());
    }

    #[test]
    fn test_guard_releases_once() {
        let counter = LoadCounter::default();
        let mut guard = counter.hold();
        let other = counter.hold();
        assert_eq!(counter.count(), 2);

        guard.release();
        guard.release();
        assert_eq!(counter.count(), 1);

        drop(guard);
        assert_eq!(counter.count(), 1);
        drop(other);
        assert!(!counter.is_loading());
    }

    #[test]
    fn test_cached_value_skips_remote() {
        let flux = Flux::new();
        let store = flux
            .create_store(
                StoreDefinition::new("CacheStore", Cache { value: Some("hit".into()), loading: 0 })
                    .setup(|setup| {
                        setup.register_async([(
                            "fetchValue",
                            AsyncSpec::new()
                                .local(|state: &Cache, _| state.value.clone().map(Value::from))
                                .remote(|_, _| future::ready(Ok(Value::Null)).boxed()),
                        )])
                    }),
            )
            .unwrap();

        let outcome = store.fetch("fetchValue", ()).unwrap();
        assert!(!outcome.is_pending());
        assert!(matches!(outcome, FetchOutcome::Cached(Some(Value::String(ref s))) if s == "hit"));
        assert!(!store.is_loading());
    }

    #[test]
    fn test_loading_action_fires_and_dropped_fetch_frees_slot() {
        let flux = Flux::new();
        let actions = flux.create_actions(ActionsDefinition::new("Loading").generate_action("started"));

        let bound = actions.clone();
        let loading = actions.get("started");
        let store = flux
            .create_store(
                StoreDefinition::new("LoadingStore", Cache::default())
                    .unit_handler("onStarted", |ctx| {
                        ctx.state_mut().loading += 1;
                        Ok(())
                    })
                    .setup(move |setup| {
                        setup.bind_actions(&bound)?;
                        setup.register_async([(
                            "fetchValue",
                            AsyncSpec::new()
                                .loading(loading)
                                .remote(|_, _| future::pending().boxed()),
                        )])
                    }),
            )
            .unwrap();

        let outcome = store.fetch("fetchValue", ()).unwrap();
        assert!(outcome.is_pending());
        assert_eq!(store.get_state().loading, 1);
        assert!(store.is_loading());
        assert_eq!(store.call("isLoading", ()).unwrap(), Value::Bool(true));

        drop(outcome);
        assert!(!store.is_loading());
        assert_eq!(store.call("isLoading", ()).unwrap(), Value::Bool(false));
    }
}
