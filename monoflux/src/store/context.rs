//! The view a running store method has of its own store

use super::{StoreCore, WaitSource};
use crate::action::Action;
use crate::error::{FluxError, Result};
use crate::types::DispatchToken;
use serde_json::Value;

/// Handed to every store method while it runs
///
/// Methods mutate a working copy of the state through [`state_mut`]; the
/// copy is committed when the outermost method returns successfully.
///
/// [`state_mut`]: StoreContext::state_mut
pub struct StoreContext<'a, S> {
    state: &'a mut S,
    core: &'a StoreCore<S>,
    current: String,
    change_requested: bool,
}

impl<'a, S> StoreContext<'a, S> {
    pub(crate) fn new(state: &'a mut S, core: &'a StoreCore<S>, current: impl Into<String>) -> Self {
        Self {
            state,
            core,
            current: current.into(),
            change_requested: false,
        }
    }

    /// Current (uncommitted) state
    pub fn state(&self) -> &S {
        self.state
    }

    /// Mutable access to the working state
    pub fn state_mut(&mut self) -> &mut S {
        self.state
    }

    /// Display name of the store
    pub fn store_name(&self) -> &str {
        self.core.name()
    }

    /// The store's dispatcher registration
    pub fn dispatch_token(&self) -> DispatchToken {
        self.core.token()
    }

    /// Name of the action, lifecycle event or method being handled
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Let other stores finish handling the current payload first
    ///
    /// Accepts stores or raw dispatch tokens, as an array, a `Vec` or any
    /// other iterator.
    pub fn wait_for<I>(&self, sources: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: WaitSource,
    {
        let tokens: Vec<DispatchToken> = sources.into_iter().map(|s| s.wait_token()).collect();
        if tokens.is_empty() {
            return Err(FluxError::MissingDispatchTokens);
        }
        self.core.dispatcher().wait_for(&tokens)
    }

    /// Ask for change listeners to be notified once this method commits
    pub fn emit_change(&mut self) {
        self.change_requested = true;
    }

    pub(crate) fn change_requested(&self) -> bool {
        self.change_requested
    }

    /// Call another method of this store against the same working state
    pub fn call(&mut self, method: &str, payload: Value) -> Result<()> {
        let handler = self
            .core
            .methods()
            .get(method)
            .cloned()
            .ok_or_else(|| FluxError::UnknownMethod {
                store: self.core.name().to_string(),
                method: method.to_string(),
            })?;

        let outer = std::mem::replace(&mut self.current, method.to_string());
        let result = handler.invoke(self, payload);
        self.current = outer;
        result
    }

    /// Any action created on the owning [`crate::Flux`], internal ones included
    ///
    /// `key` is the set's [`crate::ActionSet::key`], which is the definition
    /// name unless that name was used more than once.
    pub fn action(&self, key: &str, name: &str) -> Option<Action> {
        self.core.registry().action(key, name)
    }
}
