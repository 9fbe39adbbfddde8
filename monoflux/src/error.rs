//! Error types for the monoflux runtime

use crate::config::ConfigError;
use crate::types::DispatchToken;
use serde_json::Value;
use thiserror::Error;

/// Broad classification of a [`FluxError`]
///
/// Reference errors point at something that does not exist (an action,
/// a token, a second bootstrap); type errors at something of the wrong
/// shape (a missing function, a handler with too many parameters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing reference
    Reference,
    /// Value of the wrong kind
    Type,
    /// Anything raised while running
    Runtime,
}

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum FluxError {
    /// An action reference resolved to nothing
    #[error("Invalid action reference passed in")]
    InvalidActionReference,

    /// bindAction was given something that is not a method
    #[error("bindAction expects a function")]
    HandlerNotCallable,

    /// A handler declares more than one payload parameter
    #[error(
        "Action handler in store {store} for {action} was defined with {arity} parameters. \
         Only a single parameter is passed through the dispatcher, did you mean to pass in an Object instead?"
    )]
    HandlerArity {
        /// Store display name
        store: String,
        /// Action name
        action: String,
        /// Declared parameter count
        arity: usize,
    },

    /// Both `name` and `onName` exist for the same action
    #[error("You have multiple action handlers bound to an action: {action} and {handler}")]
    DuplicateHandlers {
        /// Plain method name
        action: String,
        /// Conventional `on<Name>` method name
        handler: String,
    },

    /// bindListeners named a method the store does not have
    #[error("{method} defined but does not exist in {store}")]
    UnknownListenerMethod {
        /// Method name
        method: String,
        /// Store display name
        store: String,
    },

    /// waitFor called with nothing to wait for
    #[error("Dispatch tokens not provided")]
    MissingDispatchTokens,

    /// waitFor named a token the dispatcher never registered
    #[error("Dispatcher.waitFor(...): {0} does not map to a registered callback")]
    UnknownDispatchToken(DispatchToken),

    /// waitFor reached a callback that is already running
    #[error("Dispatcher.waitFor(...): circular dependency detected while waiting for {0}")]
    CircularWait(DispatchToken),

    /// waitFor called outside of a dispatch
    #[error("Dispatcher.waitFor(...): must be invoked while dispatching")]
    WaitOutsideDispatch,

    /// dispatch called while another dispatch is running
    #[error("Cannot dispatch in the middle of a dispatch")]
    DispatchInProgress,

    /// bootstrap called a second time
    #[error("Stores have already been bootstrapped")]
    AlreadyBootstrapped,

    /// A success/error/loading slot did not resolve to an action
    #[error("{0} handler must be an action function")]
    NotAnAction(&'static str),

    /// exportPublicMethods was given something that is not a method
    #[error("exportPublicMethods expects a function")]
    ExportNotCallable,

    /// A store with this display name already exists
    #[error("A store named {0} has already been created")]
    DuplicateStore(String),

    /// A snapshot names a store that does not exist
    #[error("Snapshot references unknown store {0}")]
    UnknownStore(String),

    /// The public surface has no method with this name
    #[error("{store} does not expose a method named {method}")]
    UnknownMethod {
        /// Store display name
        store: String,
        /// Requested method
        method: String,
    },

    /// An async method needed a fetch but declares no remote
    #[error("{0} has no remote fetch defined")]
    MissingRemote(String),

    /// A payload could not be decoded into the handler's parameter type
    #[error("Payload for {action} could not be decoded: {source}")]
    Payload {
        /// Action or method name
        action: String,
        /// Decode failure
        #[source]
        source: serde_json::Error,
    },

    /// Store state could not be converted to or from plain data
    #[error("State of {store} could not be serialized: {source}")]
    State {
        /// Store display name
        store: String,
        /// Serialization failure
        #[source]
        source: serde_json::Error,
    },

    /// A snapshot blob could not be parsed
    #[error("Malformed snapshot: {0}")]
    Snapshot(#[source] serde_json::Error),

    /// A remote fetch settled with an error nobody handled
    #[error("Remote fetch failed: {0}")]
    Remote(Value),

    /// Failure raised by user handler code
    #[error("{0}")]
    Handler(String),

    /// Configuration failure
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl FluxError {
    /// Build a user-level handler failure
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidActionReference
            | Self::DuplicateHandlers { .. }
            | Self::UnknownListenerMethod { .. }
            | Self::MissingDispatchTokens
            | Self::UnknownDispatchToken(_)
            | Self::AlreadyBootstrapped
            | Self::UnknownStore(_)
            | Self::UnknownMethod { .. } => ErrorKind::Reference,
            Self::HandlerNotCallable
            | Self::HandlerArity { .. }
            | Self::ExportNotCallable
            | Self::MissingRemote(_)
            | Self::Payload { .. } => ErrorKind::Type,
            _ => ErrorKind::Runtime,
        }
    }

    /// True for errors that indicate a setup mistake rather than a runtime failure
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            Self::Remote(_) | Self::Handler(_) | Self::Payload { .. } | Self::State { .. }
        )
    }
}

/// Result type using FluxError
pub type Result<T> = std::result::Result<T, FluxError>;
