//! Process-wide state shared by the monitor, waiters and controllers.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
};

use shared::domain::ListenerId;
use tracing::debug;

use crate::InputDismissal;

pub type ConnectivityListener = Arc<dyn Fn(bool) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ConnectivityCell {
    connected: bool,
    determined: bool,
    listeners: Vec<(ListenerId, ConnectivityListener)>,
}

/// Holds the connectivity flag and the input-dismissal hook.
///
/// Only [`crate::ConnectivityMonitor`] writes the flag. Everything else reads
/// it or subscribes to its transitions.
pub struct SharedState {
    connectivity: Mutex<ConnectivityCell>,
    input_dismissal: RwLock<Arc<dyn InputDismissal>>,
    next_listener_id: AtomicU64,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        let no_input: Arc<dyn InputDismissal> = Arc::new(|| {});
        Arc::new(Self {
            connectivity: Mutex::new(ConnectivityCell {
                connected: false,
                determined: false,
                listeners: Vec::new(),
            }),
            input_dismissal: RwLock::new(no_input),
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// `false` until the first determination arrives.
    pub fn is_connected(&self) -> bool {
        lock(&self.connectivity).connected
    }

    pub fn is_determined(&self) -> bool {
        lock(&self.connectivity).determined
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.connectivity).listeners.len()
    }

    /// Registers `listener` for every later transition, including the first
    /// determination if it has not happened yet.
    #[must_use = "dropping the subscription leaves the listener registered"]
    pub fn subscribe(self: &Arc<Self>, listener: ConnectivityListener) -> Subscription {
        let mut cell = lock(&self.connectivity);
        self.register(&mut cell, listener)
    }

    /// Atomically either reports "already connected" (`None`, nothing
    /// registered) or registers the listener.
    pub(crate) fn subscribe_unless_connected(
        self: &Arc<Self>,
        listener: ConnectivityListener,
    ) -> Option<Subscription> {
        let mut cell = lock(&self.connectivity);
        if cell.connected {
            return None;
        }
        Some(self.register(&mut cell, listener))
    }

    fn register(
        self: &Arc<Self>,
        cell: &mut ConnectivityCell,
        listener: ConnectivityListener,
    ) -> Subscription {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        cell.listeners.push((id, listener));
        Subscription {
            id,
            state: Arc::downgrade(self),
        }
    }

    fn remove_listener(&self, id: ListenerId) {
        lock(&self.connectivity)
            .listeners
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Writes the flag, then drains the listeners registered at that moment in
    /// registration order. Returns `false` when nothing changed.
    pub(crate) fn set_connected(&self, connected: bool) -> bool {
        let listeners = {
            let mut cell = lock(&self.connectivity);
            if cell.determined && cell.connected == connected {
                return false;
            }
            cell.connected = connected;
            cell.determined = true;
            cell.listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>()
        };

        debug!(
            "state: connectivity set connected={connected} listeners={}",
            listeners.len()
        );
        for listener in listeners {
            listener(connected);
        }
        true
    }

    pub fn set_input_dismissal(&self, hook: Arc<dyn InputDismissal>) {
        *self
            .input_dismissal
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hook;
    }

    pub fn dismiss_input(&self) {
        let hook = Arc::clone(
            &self
                .input_dismissal
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        );
        hook.dismiss();
    }
}

/// Registration returned by [`SharedState::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    state: Weak<SharedState>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(state) = self.state.upgrade() {
            state.remove_listener(self.id);
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
