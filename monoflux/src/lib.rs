//! Monoflux - unidirectional data flow for Rust
//!
//! State lives in stores and changes only in response to actions funneled
//! through one synchronous dispatcher.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  call   ┌────────────┐  payload  ┌──────────────┐
//! │  Action  │ ──────▶ │ Dispatcher │ ────────▶ │   Store A    │
//! └──────────┘         │            │           ├──────────────┤
//!      ▲               │  waitFor   │ ────────▶ │   Store B    │──▶ listeners
//!      │               └────────────┘           └──────────────┘
//!      │                                               │
//!      └──────────── async success/error ◀─────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Actions
//!
//! An [`ActionsDefinition`] declares named actions. Each becomes an
//! [`Action`] with a stable [`ActionToken`]; calling it broadcasts
//! `{ action, data }` to every store. `defer` queues the call until
//! [`Flux::run_deferred`].
//!
//! ## Dispatcher
//!
//! The [`Dispatcher`] delivers one payload to every registered callback
//! exactly once. A store handler can `wait_for` other stores, which then run
//! first on the same call stack.
//!
//! ## Stores
//!
//! A [`StoreDefinition`] supplies the initial state, the methods and a setup
//! step that binds actions to methods. The resulting [`Store`] only exposes
//! `get_state`, change subscription, events, statics and exported methods.
//!
//! ## Snapshots
//!
//! [`Flux::take_snapshot`] serializes every store to one JSON blob,
//! [`Flux::bootstrap`] loads one (once), and [`Flux::rollback`] returns to
//! the last snapshot.
//!
//! # Example
//!
//! ```rust
//! use monoflux::{ActionsDefinition, Flux, StoreDefinition};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct Animal {
//!     name: String,
//! }
//!
//! let flux = Flux::new();
//! let actions = flux.create_actions(
//!     ActionsDefinition::new("AnimalActions").generate_action("updateName"),
//! );
//!
//! let bound = actions.clone();
//! let store = flux
//!     .create_store(
//!         StoreDefinition::new("AnimalStore", Animal::default())
//!             .handler("onUpdateName", |ctx, name: String| {
//!                 ctx.state_mut().name = name;
//!                 Ok(())
//!             })
//!             .setup(move |setup| setup.bind_actions(&bound)),
//!     )
//!     .unwrap();
//!
//! actions.get("updateName").unwrap().call(("bear",)).unwrap();
//! assert_eq!(store.get_state().name, "bear");
//! ```

pub mod action;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod flux;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-exports for convenience
pub use action::{
    constant_name, Action, ActionConstant, ActionContext, ActionMethod, ActionSet, ActionSource,
    ActionsDefinition, IntoArgs,
};
pub use config::{ConfigError, FluxConfig};
pub use dispatcher::Dispatcher;
pub use error::{ErrorKind, FluxError, Result};
pub use fetch::{AsyncSpec, FetchOutcome, LoadCounter, RemoteFuture};
pub use flux::Flux;
pub use snapshot::{ManagedStore, SnapshotController};
pub use store::{
    Handler, MethodTable, PublicMethod, Store, StoreContext, StoreDefinition, StoreSetup,
    StoreState, WaitSource,
};
pub use types::{ActionToken, DispatchToken, ListenerId, Payload};
