//! The top-level controller tying actions, stores and snapshots together

use crate::action::{ActionRegistry, ActionSet, ActionsDefinition};
use crate::config::FluxConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{FluxError, Result};
use crate::snapshot::SnapshotController;
use crate::store::{Store, StoreCore, StoreDefinition, StoreSetup, StoreState};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// One isolated flux instance: a dispatcher plus the actions and stores
/// created on it
///
/// ```ignore
/// let flux = Flux::new();
/// let actions = flux.create_actions(ActionsDefinition::new("MyActions").generate_action("updateName"));
/// let store = flux.create_store(definition)?;
/// actions.get("updateName").unwrap().call(("bear",))?;
/// ```
pub struct Flux {
    config: FluxConfig,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ActionRegistry>,
    snapshots: SnapshotController,
}

impl Flux {
    /// Create an instance with default configuration
    pub fn new() -> Self {
        Self::with_config(FluxConfig::default())
    }

    /// Create an instance with the given configuration
    pub fn with_config(config: FluxConfig) -> Self {
        let dispatcher = Dispatcher::with_payload_tracing(config.dispatcher.trace_payloads);
        Self {
            dispatcher: Arc::new(dispatcher),
            registry: Arc::new(ActionRegistry::default()),
            snapshots: SnapshotController::new(config.snapshot.clone()),
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &FluxConfig {
        &self.config
    }

    /// The shared dispatcher
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Build actions from a definition
    ///
    /// A definition name already used on this instance gets a numeric
    /// suffix, so every set mints its own tokens.
    pub fn create_actions(&self, definition: ActionsDefinition) -> ActionSet {
        let set = self.registry.create(definition, self.dispatcher.clone());
        debug!(definition = %set.name(), key = %set.key(), actions = set.len(), "actions created");
        set
    }

    /// Build a store, run its setup and start routing payloads to it
    ///
    /// Fails if the display name is taken or any setup step fails; in that
    /// case nothing is registered.
    pub fn create_store<S: StoreState>(&self, definition: StoreDefinition<S>) -> Result<Store<S>> {
        let (name, state, methods, statics, setups) = definition.into_parts();
        if self.snapshots.contains(&name) {
            return Err(FluxError::DuplicateStore(name));
        }

        let core = Arc::new(StoreCore::new(
            name,
            state,
            methods,
            self.dispatcher.clone(),
            self.registry.clone(),
        ));
        for (method, f) in statics {
            core.export(method, f);
        }

        let mut setup = StoreSetup::new(&core);
        for step in setups {
            step(&mut setup)?;
        }

        let weak = Arc::downgrade(&core);
        self.dispatcher.register(Some(core.token()), move |payload| {
            match weak.upgrade() {
                Some(core) => core.handle(payload),
                None => Ok(()),
            }
        })?;

        let store = Store::from_core(core);
        if let Err(err) = self.snapshots.register(Arc::new(store.clone())) {
            self.dispatcher.unregister(store.dispatch_token());
            return Err(err);
        }

        info!(store = %store.name(), token = %store.dispatch_token(), "store created");
        Ok(store)
    }

    /// Serialize every store's state; the result becomes the rollback target
    pub fn take_snapshot(&self) -> Result<String> {
        self.snapshots.take_snapshot()
    }

    /// Load every store's state from a snapshot; allowed once
    pub fn bootstrap(&self, blob: &str) -> Result<()> {
        self.snapshots.bootstrap(blob)
    }

    /// Return every store to the last snapshot
    pub fn rollback(&self) -> Result<()> {
        self.snapshots.rollback()
    }

    /// The current rollback target
    pub fn last_snapshot(&self) -> Option<String> {
        self.snapshots.last_snapshot()
    }

    /// Display names of every store, in creation order
    pub fn store_names(&self) -> Vec<String> {
        self.snapshots.store_names()
    }

    /// Run deferred actions queued so far
    pub fn run_deferred(&self) -> Result<usize> {
        self.dispatcher.run_deferred()
    }
}

impl Default for Flux {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Flux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux")
            .field("dispatcher", &self.dispatcher)
            .field("snapshots", &self.snapshots)
            .finish()
    }
}
