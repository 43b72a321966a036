//! # Network Monitor
//!
//! Holds the device's belief about connectivity. The platform layer feeds
//! it through [`NetworkMonitor::report`]; the engine and the UI observe it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  platform callback ──► report(state, kind)                             │
//! │                             │                                           │
//! │                  state changed? ── no ──► kind updated, nothing fired   │
//! │                             │ yes                                       │
//! │               ┌─────────────┴──────────────┐                            │
//! │               ▼                            ▼                            │
//! │      subscribe() callbacks         changes() watch receivers            │
//! │      (UI)                          (scheduler: debounce → pass)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The state is observational only. Commands are accepted in any state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::{debug, info};

use stockline_core::{ConnectivityState, NetworkKind};

type Callback = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

struct Inner {
    state_tx: watch::Sender<ConnectivityState>,
    kind: Mutex<NetworkKind>,
    callbacks: Mutex<HashMap<u64, Callback>>,
    next_id: AtomicU64,
}

/// Poisoning only means a callback panicked mid-update; the map is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connectivity state shared between the platform, the engine and the UI.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl NetworkMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                state_tx,
                kind: Mutex::new(NetworkKind::default()),
                callbacks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn current_state(&self) -> ConnectivityState {
        *self.inner.state_tx.borrow()
    }

    pub fn network_kind(&self) -> NetworkKind {
        *lock(&self.inner.kind)
    }

    /// Platform entry point.
    ///
    /// Callbacks and watchers fire only when the state actually changes.
    pub fn report(&self, state: ConnectivityState, kind: NetworkKind) {
        *lock(&self.inner.kind) = kind;

        let changed = self.inner.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        if !changed {
            debug!(?state, ?kind, "Connectivity unchanged");
            return;
        }

        info!(?state, ?kind, "Connectivity changed");

        // Callbacks run outside the lock so they may subscribe or unsubscribe
        let callbacks: Vec<Callback> = lock(&self.inner.callbacks).values().cloned().collect();
        for callback in callbacks {
            callback(state);
        }
    }

    /// Registers a callback for connectivity transitions.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.callbacks).insert(id, Arc::new(callback));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// A receiver that observes every transition (for async consumers).
    pub fn changes(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.callbacks).len()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Offline)
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("state", &self.current_state())
            .field("kind", &self.network_kind())
            .finish()
    }
}

/// Handle for a registered connectivity callback.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.callbacks).remove(&self.id);
        }
    }
}
