//! Core identity and payload types for the monoflux runtime
//!
//! Tokens are the keys everything else hangs off: action tokens identify a
//! declared action, dispatch tokens identify a dispatcher registration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identifier for one declared action
///
/// The id is a UUID v5 of the owning definition's namespace and the action
/// name, so the same owner+name pair always yields the same token. Two tokens
/// are equal only when their ids are; the name is carried for diagnostics.
#[derive(Clone, Serialize, Deserialize)]
pub struct ActionToken {
    id: Uuid,
    name: Arc<str>,
}

impl ActionToken {
    /// Derive the token for `name` inside the given owner namespace
    pub fn derive(namespace: &Uuid, name: &str) -> Self {
        Self {
            id: Uuid::new_v5(namespace, name.as_bytes()),
            name: Arc::from(name),
        }
    }

    /// Namespace for a named action definition
    pub fn namespace(owner: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, owner.as_bytes())
    }

    /// The underlying id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The action name this token was minted for
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for ActionToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActionToken {}

impl Hash for ActionToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionToken({}, {})", self.name, &self.id.to_string()[..8])
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Dispatcher registration key
///
/// Minted once per registration; stores hold exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchToken(pub u64);

static DISPATCH_COUNTER: AtomicU64 = AtomicU64::new(1);

impl DispatchToken {
    /// Mint a new unique dispatch token
    pub fn new() -> Self {
        Self(DISPATCH_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for DispatchToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

/// Identifier handed back by `listen`/`on`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

static LISTENER_COUNTER: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// Create a new unique listener id
    pub fn new() -> Self {
        Self(LISTENER_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// The fixed-shape value broadcast by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Which action produced this payload
    pub action: ActionToken,
    /// Action data
    pub data: Value,
}

impl Payload {
    /// Build a payload for the given action
    pub fn new(action: ActionToken, data: Value) -> Self {
        Self { action, data }
    }
}
