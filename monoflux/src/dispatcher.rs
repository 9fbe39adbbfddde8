//! Single-pass broadcast dispatcher
//!
//! Every registered callback sees each payload exactly once. A callback can
//! call [`Dispatcher::wait_for`] to run other callbacks first; those run
//! depth-first on the same call stack and are then skipped by the main loop.
//!
//! Dispatches are serialized: a second thread blocks until the running
//! dispatch finishes, while re-entry from the same thread is rejected.

use crate::error::{FluxError, Result};
use crate::types::{DispatchToken, Payload};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback registered with the dispatcher
pub type DispatchCallback = Arc<dyn Fn(&Payload) -> Result<()> + Send + Sync>;

/// Unit of work queued by a deferred action
pub type DeferredJob = Box<dyn FnOnce() -> Result<()> + Send>;

/// Bookkeeping for the dispatch currently in flight
#[derive(Default)]
struct DispatchProgress {
    dispatching: bool,
    payload: Option<Payload>,
    /// Callbacks that have started for this payload
    pending: HashSet<DispatchToken>,
    /// Callbacks that have finished for this payload
    handled: HashSet<DispatchToken>,
}

/// The broadcast engine shared by every store and action
pub struct Dispatcher {
    /// Callbacks in registration order
    callbacks: RwLock<Vec<(DispatchToken, DispatchCallback)>>,
    progress: Mutex<DispatchProgress>,
    /// Held for the duration of a dispatch
    dispatch_lock: ReentrantMutex<()>,
    /// Deferred jobs, run in submission order
    deferred: Mutex<VecDeque<DeferredJob>>,
    trace_payloads: bool,
    dispatch_count: AtomicU64,
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::with_payload_tracing(false)
    }

    /// Create a dispatcher that logs every payload body at trace level
    pub fn with_payload_tracing(trace_payloads: bool) -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            progress: Mutex::new(DispatchProgress::default()),
            dispatch_lock: ReentrantMutex::new(()),
            deferred: Mutex::new(VecDeque::new()),
            trace_payloads,
            dispatch_count: AtomicU64::new(0),
        }
    }

    /// Associate a callback with a token
    ///
    /// Registering the same token again replaces its callback but keeps its
    /// position in the broadcast order.
    pub fn register<F>(&self, token: Option<DispatchToken>, callback: F) -> Result<DispatchToken>
    where
        F: Fn(&Payload) -> Result<()> + Send + Sync + 'static,
    {
        let token = token.ok_or(FluxError::InvalidActionReference)?;
        let callback: DispatchCallback = Arc::new(callback);

        let mut callbacks = self.callbacks.write();
        if let Some(slot) = callbacks.iter_mut().find(|(t, _)| *t == token) {
            slot.1 = callback;
            debug!(%token, "dispatcher callback replaced");
        } else {
            callbacks.push((token, callback));
            debug!(%token, total = callbacks.len(), "dispatcher callback registered");
        }
        Ok(token)
    }

    /// Register a callback under a freshly minted token
    pub fn listen<F>(&self, callback: F) -> DispatchToken
    where
        F: Fn(&Payload) -> Result<()> + Send + Sync + 'static,
    {
        let token = DispatchToken::new();
        self.callbacks.write().push((token, Arc::new(callback)));
        token
    }

    /// Remove a callback
    pub fn unregister(&self, token: DispatchToken) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(t, _)| *t != token);
        before != callbacks.len()
    }

    /// Check whether a token is registered
    pub fn is_registered(&self, token: DispatchToken) -> bool {
        self.callbacks.read().iter().any(|(t, _)| *t == token)
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Whether a dispatch is currently running
    pub fn is_dispatching(&self) -> bool {
        self.progress.lock().dispatching
    }

    /// Total number of completed or aborted dispatches
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count.load(Ordering::SeqCst)
    }

    /// Broadcast a payload to every registered callback
    ///
    /// Callbacks already run through `wait_for` are skipped. The first
    /// callback error aborts the broadcast and is returned.
    pub fn dispatch(&self, payload: Payload) -> Result<()> {
        let _guard = self.dispatch_lock.lock();

        let order: Vec<DispatchToken> = {
            let mut progress = self.progress.lock();
            if progress.dispatching {
                return Err(FluxError::DispatchInProgress);
            }
            progress.dispatching = true;
            progress.pending.clear();
            progress.handled.clear();
            progress.payload = Some(payload.clone());
            self.callbacks.read().iter().map(|(t, _)| *t).collect()
        };

        debug!(action = %payload.action, listeners = order.len(), "dispatch started");
        if self.trace_payloads {
            trace!(action = %payload.action, data = %payload.data, "dispatch payload");
        }

        let result = order.into_iter().try_for_each(|token| {
            if self.progress.lock().pending.contains(&token) {
                return Ok(());
            }
            self.invoke(token)
        });

        {
            let mut progress = self.progress.lock();
            progress.dispatching = false;
            progress.payload = None;
        }
        self.dispatch_count.fetch_add(1, Ordering::SeqCst);

        match &result {
            Ok(()) => debug!(action = %payload.action, "dispatch finished"),
            Err(e) => warn!(action = %payload.action, error = %e, "dispatch aborted"),
        }
        result
    }

    /// Run the callbacks for `tokens` before continuing the current callback
    ///
    /// Only valid while dispatching. A token that already finished for this
    /// payload is skipped; one that started but has not finished means the
    /// callbacks wait on each other and fails with [`FluxError::CircularWait`].
    pub fn wait_for(&self, tokens: &[DispatchToken]) -> Result<()> {
        if tokens.is_empty() {
            return Err(FluxError::MissingDispatchTokens);
        }

        let _guard = self.dispatch_lock.lock();
        if !self.is_dispatching() {
            return Err(FluxError::WaitOutsideDispatch);
        }

        for &token in tokens {
            {
                let progress = self.progress.lock();
                if progress.pending.contains(&token) {
                    if !progress.handled.contains(&token) {
                        return Err(FluxError::CircularWait(token));
                    }
                    continue;
                }
            }
            if !self.is_registered(token) {
                return Err(FluxError::UnknownDispatchToken(token));
            }
            trace!(%token, "resolving waitFor dependency");
            self.invoke(token)?;
        }
        Ok(())
    }

    fn invoke(&self, token: DispatchToken) -> Result<()> {
        let callback = self
            .callbacks
            .read()
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, cb)| cb.clone());

        let payload = {
            let mut progress = self.progress.lock();
            progress.pending.insert(token);
            progress.payload.clone()
        };

        // Unregistered mid-dispatch
        let (Some(callback), Some(payload)) = (callback, payload) else {
            self.progress.lock().handled.insert(token);
            return Ok(());
        };

        callback(&payload)?;
        self.progress.lock().handled.insert(token);
        Ok(())
    }

    /// Queue a job for the next turn
    pub fn defer(&self, job: DeferredJob) {
        let mut deferred = self.deferred.lock();
        deferred.push_back(job);
        trace!(queued = deferred.len(), "deferred job queued");
    }

    /// Number of jobs waiting for the next turn
    pub fn pending_deferred(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Run every job queued before this call, in submission order
    ///
    /// Jobs queued while draining wait for the following turn. All jobs run
    /// even if some fail; the first failure is returned.
    pub fn run_deferred(&self) -> Result<usize> {
        let _guard = self.dispatch_lock.lock();
        if self.is_dispatching() {
            return Err(FluxError::DispatchInProgress);
        }

        let batch: Vec<DeferredJob> = self.deferred.lock().drain(..).collect();
        let count = batch.len();
        let mut first_error = None;

        for job in batch {
            if let Err(e) = job() {
                warn!(error = %e, "deferred job failed");
                first_error.get_or_insert(e);
            }
        }

        if count > 0 {
            debug!(count, "deferred jobs drained");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("callbacks", &self.len())
            .field("dispatching", &self.is_dispatching())
            .field("deferred", &self.pending_deferred())
            .finish()
    }
}
