//! Action definitions and the callable actions built from them
//!
//! An [`ActionsDefinition`] names a set of actions. Turning it into an
//! [`ActionSet`] mints one [`ActionToken`] per action and binds every action
//! to the dispatcher. Calling an action runs its method (if any) and
//! broadcasts `{ action: token, data }`.

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::types::{ActionToken, Payload};
use parking_lot::RwLock;
use serde_json::Value;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

type ActionMethodFn = dyn Fn(&ActionContext<'_>, Vec<Value>) -> Result<Option<Value>> + Send + Sync;

/// User-defined body of an action
///
/// The return value becomes the payload. Returning `None` sends the call
/// arguments as an array instead, unless the method already dispatched
/// through [`ActionContext::dispatch`].
#[derive(Clone)]
pub struct ActionMethod {
    arity: usize,
    f: Arc<ActionMethodFn>,
}

impl ActionMethod {
    /// Wrap a method declaring `arity` parameters
    pub fn new<F>(arity: usize, f: F) -> Self
    where
        F: Fn(&ActionContext<'_>, Vec<Value>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            arity,
            f: Arc::new(f),
        }
    }

    /// Declared parameter count
    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl fmt::Debug for ActionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionMethod").field("arity", &self.arity).finish()
    }
}

#[derive(Debug, Clone)]
struct ActionEntry {
    name: String,
    method: Option<ActionMethod>,
    exported: bool,
}

/// Declarative list of actions, consumed by [`crate::Flux::create_actions`]
#[derive(Debug, Clone)]
pub struct ActionsDefinition {
    name: String,
    entries: Vec<ActionEntry>,
}

impl ActionsDefinition {
    /// Start a definition; the name scopes the action tokens
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Declare a pass-through action
    pub fn generate_action(self, name: impl Into<String>) -> Self {
        self.upsert(name.into(), None, true)
    }

    /// Declare several pass-through actions
    pub fn generate_actions<I, N>(self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        names
            .into_iter()
            .fold(self, |def, name| def.generate_action(name))
    }

    /// Declare an action backed by a method
    ///
    /// If an action of the same name was generated, the method replaces its
    /// pass-through body.
    pub fn method(self, name: impl Into<String>, method: ActionMethod) -> Self {
        self.upsert(name.into(), Some(method), true)
    }

    /// Declare an action that is not exported on the resulting [`ActionSet`]
    ///
    /// It stays reachable through [`ActionContext::sibling`] and from store
    /// handlers through [`crate::store::StoreContext::action`].
    pub fn internal(self, name: impl Into<String>, method: Option<ActionMethod>) -> Self {
        self.upsert(name.into(), method, false)
    }

    fn upsert(mut self, name: String, method: Option<ActionMethod>, exported: bool) -> Self {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                if method.is_some() {
                    entry.method = method;
                }
                entry.exported = exported;
            }
            None => self.entries.push(ActionEntry {
                name,
                method,
                exported,
            }),
        }
        self
    }

    /// Definition name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mint tokens under the namespace of `key`, unique per [`crate::Flux`]
    pub(crate) fn build(self, key: String, dispatcher: Arc<Dispatcher>) -> ActionSet {
        let namespace = ActionToken::namespace(&key);
        let inner = Arc::new_cyclic(|weak: &Weak<ActionSetInner>| {
            let actions = self
                .entries
                .into_iter()
                .map(|entry| Action {
                    inner: Arc::new(ActionInner {
                        token: ActionToken::derive(&namespace, &entry.name),
                        constant: constant_name(&entry.name),
                        arity: entry.method.as_ref().map_or(1, ActionMethod::arity),
                        method: entry.method,
                        exported: entry.exported,
                        name: entry.name,
                        dispatcher: dispatcher.clone(),
                        set: weak.clone(),
                    }),
                })
                .collect();
            ActionSetInner {
                name: self.name,
                key,
                actions,
            }
        });
        ActionSet { inner }
    }
}

/// Upper-snake-case constant name for an action (`updateName` → `UPDATE_NAME`)
pub fn constant_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.extend(c.to_uppercase());
    }
    out
}

/// Arguments accepted by [`Action::call`] and [`Action::defer`]
pub trait IntoArgs {
    /// Convert into the ordered argument list
    fn into_args(self) -> Vec<Value>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Value> {
        Vec::new()
    }
}

impl IntoArgs for Value {
    fn into_args(self) -> Vec<Value> {
        vec![self]
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Vec<Value> {
        self
    }
}

impl<A: Into<Value>> IntoArgs for (A,) {
    fn into_args(self) -> Vec<Value> {
        vec![self.0.into()]
    }
}

impl<A: Into<Value>, B: Into<Value>> IntoArgs for (A, B) {
    fn into_args(self) -> Vec<Value> {
        vec![self.0.into(), self.1.into()]
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> IntoArgs for (A, B, C) {
    fn into_args(self) -> Vec<Value> {
        vec![self.0.into(), self.1.into(), self.2.into()]
    }
}

struct ActionInner {
    token: ActionToken,
    name: String,
    constant: String,
    arity: usize,
    method: Option<ActionMethod>,
    exported: bool,
    dispatcher: Arc<Dispatcher>,
    set: Weak<ActionSetInner>,
}

/// A callable action bound to a dispatcher
#[derive(Clone)]
pub struct Action {
    inner: Arc<ActionInner>,
}

impl Action {
    /// The action's dispatch key
    pub fn token(&self) -> &ActionToken {
        &self.inner.token
    }

    /// Declared name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Upper-snake-case constant name
    pub fn constant_name(&self) -> &str {
        &self.inner.constant
    }

    /// Declared parameter count (1 for pass-through actions)
    pub fn arity(&self) -> usize {
        self.inner.arity
    }

    /// Whether the action is hidden from the exported [`ActionSet`]
    pub fn is_internal(&self) -> bool {
        !self.inner.exported
    }

    /// The constant object for this action
    pub fn constant(&self) -> ActionConstant {
        ActionConstant {
            token: self.inner.token.clone(),
            name: self.inner.constant.clone(),
        }
    }

    /// Run the action and dispatch synchronously
    pub fn call<A: IntoArgs>(&self, args: A) -> Result<()> {
        self.run(args.into_args())
    }

    /// Run the action on the dispatcher's next turn
    ///
    /// Deferred actions run in submission order when the dispatcher drains
    /// its queue.
    pub fn defer<A: IntoArgs>(&self, args: A) {
        let action = self.clone();
        let args = args.into_args();
        trace!(action = %self.inner.name, "action deferred");
        self.inner
            .dispatcher
            .defer(Box::new(move || action.run(args)));
    }

    fn run(&self, args: Vec<Value>) -> Result<()> {
        let data = match &self.inner.method {
            Some(method) => {
                let ctx = ActionContext {
                    action: self,
                    dispatched: Cell::new(false),
                };
                let returned = (method.f)(&ctx, args.clone())?;
                if ctx.dispatched.get() {
                    return Ok(());
                }
                returned.unwrap_or(Value::Array(args))
            }
            None => pass_through(args),
        };
        self.send(data)
    }

    fn send(&self, data: Value) -> Result<()> {
        self.inner
            .dispatcher
            .dispatch(Payload::new(self.inner.token.clone(), data))
    }
}

fn pass_through(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.inner.name)
            .field("token", &self.inner.token)
            .field("arity", &self.inner.arity)
            .finish()
    }
}

/// The `this` of an action method
pub struct ActionContext<'a> {
    action: &'a Action,
    dispatched: Cell<bool>,
}

impl ActionContext<'_> {
    /// The action being run
    pub fn action(&self) -> &Action {
        self.action
    }

    /// Dispatch `data` for this action now
    ///
    /// Once called, the method's return value is no longer dispatched.
    pub fn dispatch(&self, data: Value) -> Result<()> {
        self.dispatched.set(true);
        self.action.send(data)
    }

    /// Look up a sibling action, including internal ones
    pub fn sibling(&self, name: &str) -> Option<Action> {
        let set = self.action.inner.set.upgrade()?;
        set.actions.iter().find(|a| a.name() == name).cloned()
    }
}

/// Upper-snake-case constant usable anywhere an action reference is expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionConstant {
    token: ActionToken,
    name: String,
}

impl ActionConstant {
    /// The action's dispatch key
    pub fn token(&self) -> &ActionToken {
        &self.token
    }

    /// The constant name (e.g. `UPDATE_NAME`)
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct ActionSetInner {
    name: String,
    key: String,
    actions: Vec<Action>,
}

/// The actions created from one definition
#[derive(Clone)]
pub struct ActionSet {
    inner: Arc<ActionSetInner>,
}

impl ActionSet {
    /// Definition name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Registry key: the definition name, suffixed with a counter when an
    /// earlier set on the same [`crate::Flux`] already took it
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Exported action by name
    pub fn get(&self, name: &str) -> Option<Action> {
        self.iter().find(|a| a.name() == name).cloned()
    }

    /// Exported constant by upper-snake-case name
    pub fn constant(&self, name: &str) -> Option<ActionConstant> {
        self.iter()
            .find(|a| a.constant_name() == name)
            .map(Action::constant)
    }

    /// Exported actions in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.inner.actions.iter().filter(|a| !a.is_internal())
    }

    /// Names of the exported actions
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(Action::name).collect()
    }

    /// Number of exported actions
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Check if nothing is exported
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Any action by name, internal ones included
    pub(crate) fn lookup(&self, name: &str) -> Option<Action> {
        self.inner.actions.iter().find(|a| a.name() == name).cloned()
    }
}

impl fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSet")
            .field("name", &self.inner.name)
            .field("key", &self.inner.key)
            .field("actions", &self.names())
            .finish()
    }
}

/// Every action set created on one [`crate::Flux`]
#[derive(Debug, Default)]
pub(crate) struct ActionRegistry {
    sets: RwLock<HashMap<String, ActionSet>>,
}

impl ActionRegistry {
    /// Build `definition` under a key no other set on this registry holds
    pub(crate) fn create(&self, definition: ActionsDefinition, dispatcher: Arc<Dispatcher>) -> ActionSet {
        let mut sets = self.sets.write();
        let key = unique_key(&sets, definition.name());
        if key != definition.name() {
            debug!(definition = %definition.name(), key = %key, "definition name taken, suffixing");
        }
        let set = definition.build(key.clone(), dispatcher);
        sets.insert(key, set.clone());
        set
    }

    /// Any action, internal ones included, by registry key and name
    pub(crate) fn action(&self, key: &str, name: &str) -> Option<Action> {
        self.sets.read().get(key)?.lookup(name)
    }
}

fn unique_key(taken: &HashMap<String, ActionSet>, name: &str) -> String {
    let mut key = name.to_string();
    let mut count = 0;
    while taken.contains_key(&key) {
        count += 1;
        key = format!("{name}{count}");
    }
    key
}

/// Anything that can stand in for an action reference
///
/// Implemented for actions, constants, raw tokens, references to those and
/// `Option`s of them; `None` is an invalid reference.
pub trait ActionSource {
    /// Resolve to the action's token
    fn action_token(&self) -> Option<ActionToken>;

    /// Resolve to a callable action, if this is one
    fn as_action(&self) -> Option<Action> {
        None
    }
}

impl ActionSource for Action {
    fn action_token(&self) -> Option<ActionToken> {
        Some(self.token().clone())
    }

    fn as_action(&self) -> Option<Action> {
        Some(self.clone())
    }
}

impl ActionSource for ActionConstant {
    fn action_token(&self) -> Option<ActionToken> {
        Some(self.token.clone())
    }
}

impl ActionSource for ActionToken {
    fn action_token(&self) -> Option<ActionToken> {
        Some(self.clone())
    }
}

impl<T: ActionSource + ?Sized> ActionSource for &T {
    fn action_token(&self) -> Option<ActionToken> {
        (**self).action_token()
    }

    fn as_action(&self) -> Option<Action> {
        (**self).as_action()
    }
}

impl<T: ActionSource> ActionSource for Option<T> {
    fn action_token(&self) -> Option<ActionToken> {
        self.as_ref().and_then(ActionSource::action_token)
    }

    fn as_action(&self) -> Option<Action> {
        self.as_ref().and_then(ActionSource::as_action)
    }
}
