//! Declaring stores and wiring them up at creation time

use super::{
    conventional_name, Handler, MethodTable, PublicMethod, Store, StoreContext, StoreCore, StoreState,
};
use crate::action::{ActionSet, ActionSource};
use crate::error::{FluxError, Result};
use crate::fetch::{AsyncMethod, AsyncSpec};
use crate::types::DispatchToken;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type SetupFn<S> = Box<dyn FnOnce(&mut StoreSetup<'_, S>) -> Result<()> + Send>;

/// Everything needed to create a store
///
/// ```ignore
/// let def = StoreDefinition::new("LocationStore", Locations::default())
///     .handler("onUpdateCity", |ctx, city: String| {
///         ctx.state_mut().city = city;
///         Ok(())
///     })
///     .setup(move |setup| setup.bind_actions(&actions));
/// let store = flux.create_store(def)?;
/// ```
pub struct StoreDefinition<S> {
    name: String,
    state: S,
    methods: MethodTable<S>,
    statics: Vec<(String, PublicMethod<S>)>,
    setups: Vec<SetupFn<S>>,
}

impl<S: StoreState> StoreDefinition<S> {
    /// Start a definition with a display name and initial state
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state,
            methods: MethodTable::new(),
            statics: Vec::new(),
            setups: Vec::new(),
        }
    }

    /// Inherit methods from a base definition's table
    ///
    /// Methods declared on this definition shadow inherited ones regardless
    /// of call order.
    pub fn extends(mut self, base: &MethodTable<S>) -> Self {
        self.methods = self.methods.inherit(base);
        self
    }

    /// Declare a store method
    pub fn method(mut self, name: impl Into<String>, handler: Handler<S>) -> Self {
        self.methods.insert(name, handler);
        self
    }

    /// Declare a method taking one payload, decoded into `P`
    ///
    /// Shorthand for `.method(name, Handler::new(f))` with the state type
    /// already fixed, so the closure can touch `ctx.state_mut()` fields.
    pub fn handler<P, F>(self, name: impl Into<String>, f: F) -> Self
    where
        P: DeserializeOwned,
        F: Fn(&mut StoreContext<'_, S>, P) -> Result<()> + Send + Sync + 'static,
    {
        self.method(name, Handler::new(f))
    }

    /// Declare a method that takes no payload
    pub fn unit_handler<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut StoreContext<'_, S>) -> Result<()> + Send + Sync + 'static,
    {
        self.method(name, Handler::unit(f))
    }

    /// Declare a method taking the payload as untyped JSON
    pub fn raw_handler<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut StoreContext<'_, S>, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.method(name, Handler::raw(f))
    }

    /// Declare a two-parameter method, callable only through `ctx.call`
    pub fn binary_handler<A, B, F>(self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
        F: Fn(&mut StoreContext<'_, S>, A, B) -> Result<()> + Send + Sync + 'static,
    {
        self.method(name, Handler::binary(f))
    }

    /// Declare a static reachable from outside through [`Store::call`]
    pub fn static_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Store<S>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.statics.push((name.into(), PublicMethod::new(f)));
        self
    }

    /// Add a setup step, run once when the store is created
    ///
    /// Steps run in the order they were added, before the store starts
    /// receiving payloads.
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut StoreSetup<'_, S>) -> Result<()> + Send + 'static,
    {
        self.setups.push(Box::new(f));
        self
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The flattened method table, for use as another definition's base
    pub fn method_table(&self) -> &MethodTable<S> {
        &self.methods
    }

    pub(crate) fn into_parts(self) -> (String, S, MethodTable<S>, Vec<(String, PublicMethod<S>)>, Vec<SetupFn<S>>) {
        (self.name, self.state, self.methods, self.statics, self.setups)
    }
}

impl<S> fmt::Debug for StoreDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("statics", &self.statics.len())
            .field("setups", &self.setups.len())
            .finish()
    }
}

/// Binding surface available while a store is being created
pub struct StoreSetup<'a, S> {
    core: &'a Arc<StoreCore<S>>,
}

impl<'a, S: StoreState> StoreSetup<'a, S> {
    pub(crate) fn new(core: &'a Arc<StoreCore<S>>) -> Self {
        Self { core }
    }

    /// Display name of the store being created
    pub fn store_name(&self) -> &str {
        self.core.name()
    }

    /// The store's dispatcher registration
    pub fn dispatch_token(&self) -> DispatchToken {
        self.core.token()
    }

    /// Look up a declared method, for passing to [`StoreSetup::bind_action`]
    pub fn method(&self, name: &str) -> Option<Handler<S>> {
        self.core.methods().get(name).cloned()
    }

    /// Bind one action to a handler
    ///
    /// A handler may take at most one payload parameter.
    pub fn bind_action<A, H>(&mut self, source: A, handler: H) -> Result<()>
    where
        A: ActionSource,
        H: Into<Option<Handler<S>>>,
    {
        let token = source
            .action_token()
            .ok_or(FluxError::InvalidActionReference)?;
        let handler = handler.into().ok_or(FluxError::HandlerNotCallable)?;

        if handler.arity() > 1 {
            return Err(FluxError::HandlerArity {
                store: self.core.name().to_string(),
                action: token.name().to_string(),
                arity: handler.arity(),
            });
        }

        self.core.bind(token, handler);
        Ok(())
    }

    /// Bind every exported action of `actions` to its same-named or
    /// `on<Name>` method
    ///
    /// Actions with neither method are skipped; having both is an error.
    pub fn bind_actions(&mut self, actions: &ActionSet) -> Result<()> {
        for action in actions.iter() {
            let plain = action.name();
            let conventional = conventional_name(plain);
            let methods = self.core.methods();

            let handler = match (methods.get(plain), methods.get(&conventional)) {
                (Some(_), Some(_)) => {
                    return Err(FluxError::DuplicateHandlers {
                        action: plain.to_string(),
                        handler: conventional,
                    })
                }
                (Some(handler), None) | (None, Some(handler)) => handler.clone(),
                (None, None) => continue,
            };
            self.bind_action(action, handler)?;
        }

        debug!(store = %self.core.name(), definition = %actions.name(), "actions bound");
        Ok(())
    }

    /// Bind named methods to one or more actions each
    ///
    /// ```ignore
    /// setup.bind_listeners([("handleMove", vec![actions.get("walk"), actions.get("run")])])?;
    /// ```
    pub fn bind_listeners<'m, I, L>(&mut self, listeners: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'m str, L)>,
        L: IntoIterator,
        L::Item: ActionSource,
    {
        for (method, sources) in listeners {
            let handler = self
                .method(method)
                .ok_or_else(|| FluxError::UnknownListenerMethod {
                    method: method.to_string(),
                    store: self.core.name().to_string(),
                })?;
            for source in sources {
                self.bind_action(source, handler.clone())?;
            }
        }
        Ok(())
    }

    /// Subscribe a handler to a lifecycle event (`bootstrap`, `snapshot`, `error`)
    ///
    /// Subscribing to `error` marks the store as handling its own errors.
    pub fn on(&mut self, event: &str, handler: Handler<S>) {
        self.core.add_lifecycle(event, handler);
    }

    /// Add methods to the public surface
    ///
    /// Nothing is exported if any entry is missing its function.
    pub fn export_public_methods<I, K, M>(&mut self, methods: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, M)>,
        K: Into<String>,
        M: Into<Option<PublicMethod<S>>>,
    {
        let methods = methods
            .into_iter()
            .map(|(name, method)| {
                method
                    .into()
                    .map(|method| (name.into(), method))
                    .ok_or(FluxError::ExportNotCallable)
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, method) in methods {
            self.core.export(name, method);
        }
        Ok(())
    }

    /// Register async methods and the shared `isLoading` public method
    ///
    /// Every success/error/loading slot that is set must hold an action.
    pub fn register_async<I, K>(&mut self, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, AsyncSpec<S>)>,
        K: Into<String>,
    {
        let methods = specs
            .into_iter()
            .map(|(name, spec)| {
                let name = name.into();
                spec.validate()?;
                Ok((name.clone(), AsyncMethod::new(name, spec)))
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, method) in methods {
            debug!(store = %self.core.name(), method = %name, "async method registered");
            self.core.export_async(name, method);
        }

        self.export_public_methods([(
            "isLoading",
            PublicMethod::new(|store: &Store<S>, _| Ok(Value::Bool(store.is_loading()))),
        )])
    }

    /// Alias of [`StoreSetup::register_async`]
    pub fn export_async<I, K>(&mut self, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, AsyncSpec<S>)>,
        K: Into<String>,
    {
        self.register_async(specs)
    }
}

impl<S> fmt::Debug for StoreSetup<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSetup")
            .field("store", &self.core.name())
            .finish()
    }
}
