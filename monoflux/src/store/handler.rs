//! Store methods and the flattened method table
//!
//! A [`Handler`] is a store method: it runs against the store's working
//! state through a [`StoreContext`] and remembers how many parameters it
//! declared, which is what `bind_action` checks.

use super::context::StoreContext;
use crate::error::{FluxError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type HandlerFn<S> = dyn Fn(&mut StoreContext<'_, S>, Value) -> Result<()> + Send + Sync;

/// A store method
pub struct Handler<S> {
    arity: usize,
    f: Arc<HandlerFn<S>>,
}

impl<S> Clone for Handler<S> {
    fn clone(&self) -> Self {
        Self {
            arity: self.arity,
            f: self.f.clone(),
        }
    }
}

impl<S: 'static> Handler<S> {
    /// A method that takes no payload
    pub fn unit<F>(f: F) -> Self
    where
        F: Fn(&mut StoreContext<'_, S>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            arity: 0,
            f: erase(move |ctx, _| f(ctx)),
        }
    }

    /// A method taking one payload, decoded into `P`
    pub fn new<P, F>(f: F) -> Self
    where
        P: DeserializeOwned,
        F: Fn(&mut StoreContext<'_, S>, P) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            arity: 1,
            f: erase(move |ctx, payload| {
                let decoded = decode(ctx, payload)?;
                f(ctx, decoded)
            }),
        }
    }

    /// A method taking the payload as untyped JSON
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&mut StoreContext<'_, S>, Value) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            arity: 1,
            f: erase(f),
        }
    }

    /// A method declaring two parameters, decoded from a two-element array
    ///
    /// Only callable internally; `bind_action` rejects it.
    pub fn binary<A, B, F>(f: F) -> Self
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
        F: Fn(&mut StoreContext<'_, S>, A, B) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            arity: 2,
            f: erase(move |ctx, payload| {
                let (a, b) = decode(ctx, payload)?;
                f(ctx, a, b)
            }),
        }
    }
}

impl<S> Handler<S> {
    /// Declared parameter count
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn invoke(&self, ctx: &mut StoreContext<'_, S>, payload: Value) -> Result<()> {
        (self.f)(ctx, payload)
    }
}

impl<S> fmt::Debug for Handler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("arity", &self.arity).finish()
    }
}

fn erase<S, F>(f: F) -> Arc<HandlerFn<S>>
where
    F: Fn(&mut StoreContext<'_, S>, Value) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn decode<S, P: DeserializeOwned>(ctx: &StoreContext<'_, S>, payload: Value) -> Result<P> {
    serde_json::from_value(payload).map_err(|source| FluxError::Payload {
        action: ctx.current().to_string(),
        source,
    })
}

/// Named store methods, with base tables flattened underneath
///
/// Methods defined on a table shadow same-named methods inherited from its
/// bases, the way an override shadows a base-class method.
pub struct MethodTable<S> {
    methods: HashMap<String, Handler<S>>,
}

impl<S> Clone for MethodTable<S> {
    fn clone(&self) -> Self {
        Self {
            methods: self.methods.clone(),
        }
    }
}

impl<S> Default for MethodTable<S> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }
}

impl<S> MethodTable<S> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a method
    pub fn with(mut self, name: impl Into<String>, handler: Handler<S>) -> Self {
        self.insert(name, handler);
        self
    }

    /// Add or replace a method in place
    pub fn insert(&mut self, name: impl Into<String>, handler: Handler<S>) {
        self.methods.insert(name.into(), handler);
    }

    /// Flatten `base` underneath this table
    pub fn inherit(mut self, base: &MethodTable<S>) -> Self {
        for (name, handler) in &base.methods {
            self.methods
                .entry(name.clone())
                .or_insert_with(|| handler.clone());
        }
        self
    }

    /// Look up a method
    pub fn get(&self, name: &str) -> Option<&Handler<S>> {
        self.methods.get(name)
    }

    /// Check whether a method exists
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names, in no particular order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.methods.keys()
    }

    /// Number of methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if there are no methods
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<S> fmt::Debug for MethodTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("MethodTable").field("methods", &names).finish()
    }
}

/// Conventional handler name for an action (`updateName` → `onUpdateName`)
pub fn conventional_name(action: &str) -> String {
    let mut chars = action.chars();
    match chars.next() {
        Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
        None => "on".to_string(),
    }
}
