//! Snapshot, bootstrap and rollback across every live store
//!
//! A snapshot is a JSON object mapping each store's display name to its
//! plain-data state. The controller keeps the most recent one as the
//! rollback target.

use crate::config::SnapshotConfig;
use crate::error::{FluxError, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies a decoded state to its store and notifies change listeners
pub type Commit = Box<dyn FnOnce()>;

/// A store as seen by the snapshot controller
pub trait ManagedStore: Send + Sync {
    /// Display name, the key in snapshot blobs
    fn name(&self) -> &str;

    /// Current state as plain data
    fn snapshot(&self) -> Result<Value>;

    /// Decode `state` without touching the store
    ///
    /// Nothing changes until the returned [`Commit`] runs.
    fn prepare(&self, state: Value) -> Result<Commit>;

    /// Replace the full state and notify change listeners
    fn restore(&self, state: Value) -> Result<()> {
        let commit = self.prepare(state)?;
        commit();
        Ok(())
    }

    /// Run lifecycle handlers for `event`
    fn lifecycle(&self, event: &str, data: &Value) -> Result<()>;
}

/// A decoded store state waiting to be applied
struct Staged {
    store: Arc<dyn ManagedStore>,
    state: Value,
    commit: Commit,
}

/// Owns the set of live stores and the last snapshot
pub struct SnapshotController {
    /// Stores in creation order
    stores: RwLock<Vec<Arc<dyn ManagedStore>>>,
    last_snapshot: Mutex<Option<String>>,
    bootstrapped: AtomicBool,
    config: SnapshotConfig,
}

impl SnapshotController {
    /// Create a controller with no stores
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            stores: RwLock::new(Vec::new()),
            last_snapshot: Mutex::new(None),
            bootstrapped: AtomicBool::new(false),
            config,
        }
    }

    /// Track a store; display names must be unique
    pub fn register(&self, store: Arc<dyn ManagedStore>) -> Result<()> {
        let mut stores = self.stores.write();
        if stores.iter().any(|s| s.name() == store.name()) {
            return Err(FluxError::DuplicateStore(store.name().to_string()));
        }
        debug!(store = %store.name(), "store registered for snapshots");
        stores.push(store);
        Ok(())
    }

    /// Whether a store with this display name is tracked
    pub fn contains(&self, name: &str) -> bool {
        self.stores.read().iter().any(|s| s.name() == name)
    }

    /// Display names in creation order
    pub fn store_names(&self) -> Vec<String> {
        self.stores.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Serialize every store, fire `snapshot`, then remember the blob
    ///
    /// The rollback target only moves once every handler succeeded.
    pub fn take_snapshot(&self) -> Result<String> {
        let stores = self.stores();

        let mut states = Map::new();
        for store in &stores {
            states.insert(store.name().to_string(), store.snapshot()?);
        }
        let blob = self.encode(&Value::Object(states.clone()))?;

        for store in &stores {
            let state = states.get(store.name()).cloned().unwrap_or(Value::Null);
            store.lifecycle("snapshot", &state)?;
        }

        *self.last_snapshot.lock() = Some(blob.clone());
        info!(stores = stores.len(), bytes = blob.len(), "snapshot taken");
        Ok(blob)
    }

    /// Replace store states from `blob` and fire `bootstrap`; only once
    ///
    /// A failed bootstrap does not count toward the limit and leaves every
    /// store as it was.
    pub fn bootstrap(&self, blob: &str) -> Result<()> {
        if self.bootstrapped.load(Ordering::SeqCst) {
            return Err(FluxError::AlreadyBootstrapped);
        }

        let staged = self.stage(blob)?;
        let previous = staged
            .iter()
            .map(|s| s.store.snapshot().map(|state| (s.store.clone(), state)))
            .collect::<Result<Vec<_>>>()?;

        let restored = apply(staged);
        let fired = restored
            .iter()
            .try_for_each(|(store, state)| store.lifecycle("bootstrap", state));
        if let Err(err) = fired {
            warn!(error = %err, "bootstrap handler failed, restoring previous state");
            for (store, state) in previous {
                if let Err(revert) = store.restore(state) {
                    warn!(store = %store.name(), error = %revert, "could not restore previous state");
                }
            }
            return Err(err);
        }

        self.bootstrapped.store(true, Ordering::SeqCst);
        *self.last_snapshot.lock() = Some(blob.to_string());
        info!(stores = restored.len(), "stores bootstrapped");
        Ok(())
    }

    /// Restore the last snapshot without firing lifecycle events
    ///
    /// Does nothing when no snapshot has been taken.
    pub fn rollback(&self) -> Result<()> {
        let Some(blob) = self.last_snapshot.lock().clone() else {
            debug!("rollback requested with no snapshot");
            return Ok(());
        };

        let restored = apply(self.stage(&blob)?);
        info!(stores = restored.len(), "rolled back to last snapshot");
        Ok(())
    }

    /// The current rollback target
    pub fn last_snapshot(&self) -> Option<String> {
        self.last_snapshot.lock().clone()
    }

    /// Whether bootstrap has succeeded
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    fn stores(&self) -> Vec<Arc<dyn ManagedStore>> {
        self.stores.read().clone()
    }

    fn encode(&self, states: &Value) -> Result<String> {
        let encoded = if self.config.pretty {
            serde_json::to_string_pretty(states)
        } else {
            serde_json::to_string(states)
        };
        encoded.map_err(FluxError::Snapshot)
    }

    /// Parse `blob` and decode a state for every named store
    ///
    /// Nothing is applied; unknown names and undecodable states fail the
    /// whole blob.
    fn stage(&self, blob: &str) -> Result<Vec<Staged>> {
        let states: Map<String, Value> = serde_json::from_str(blob).map_err(FluxError::Snapshot)?;
        let stores = self.stores();

        let mut matched = Vec::with_capacity(states.len());
        for (name, state) in states {
            match stores.iter().find(|s| s.name() == name) {
                Some(store) => matched.push((store.clone(), state)),
                None if self.config.strict => return Err(FluxError::UnknownStore(name)),
                None => warn!(store = %name, "snapshot names an unknown store, skipping"),
            }
        }

        matched
            .into_iter()
            .map(|(store, state)| {
                let commit = store.prepare(state.clone())?;
                Ok(Staged {
                    store,
                    state,
                    commit,
                })
            })
            .collect()
    }
}

/// Run every staged commit, in blob order
fn apply(staged: Vec<Staged>) -> Vec<(Arc<dyn ManagedStore>, Value)> {
    staged
        .into_iter()
        .map(|s| {
            (s.commit)();
            (s.store, s.state)
        })
        .collect()
}

impl fmt::Debug for SnapshotController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotController")
            .field("stores", &self.store_names())
            .field("bootstrapped", &self.is_bootstrapped())
            .field("has_snapshot", &self.last_snapshot.lock().is_some())
            .finish()
    }
}
