//! Cancellable wait for connectivity.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{runtime::Handle, sync::oneshot};
use tracing::debug;

use crate::{state::lock, ConnectivityListener, SharedState, Subscription, WaitError};

type OnConnected = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;
type OnWaitError = Box<dyn FnOnce(&anyhow::Error) + Send>;

#[derive(Default)]
pub struct WaitOptions {
    on_connected: Option<OnConnected>,
    on_error: Option<OnWaitError>,
    timeout: Option<Duration>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Side effect awaited before the wait resolves `true`.
    pub fn on_connected<F, Fut>(mut self, on_connected: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_connected = Some(Box::new(move || on_connected().boxed()));
        self
    }

    /// Receives the failure of the `on_connected` side effect.
    pub fn on_error(mut self, on_error: impl FnOnce(&anyhow::Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Connected,
    TimedOut,
    Cancelled,
}

struct WaitSlot {
    outcome: Option<WaitOutcome>,
    signal: Option<oneshot::Sender<WaitOutcome>>,
    subscription: Option<Subscription>,
}

/// Settles exactly once; the first of listener, timer or cancel wins.
struct WaitShared {
    slot: Mutex<WaitSlot>,
}

impl WaitShared {
    fn new(signal: oneshot::Sender<WaitOutcome>) -> Self {
        Self {
            slot: Mutex::new(WaitSlot {
                outcome: None,
                signal: Some(signal),
                subscription: None,
            }),
        }
    }

    fn settle(&self, outcome: WaitOutcome) -> bool {
        let (signal, subscription) = {
            let mut slot = lock(&self.slot);
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome);
            (slot.signal.take(), slot.subscription.take())
        };

        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(signal) = signal {
            let _ = signal.send(outcome);
        }
        true
    }

    fn attach(&self, subscription: Subscription) {
        let mut slot = lock(&self.slot);
        if slot.outcome.is_some() {
            drop(slot);
            subscription.unsubscribe();
        } else {
            slot.subscription = Some(subscription);
        }
    }

    fn is_settled(&self) -> bool {
        lock(&self.slot).outcome.is_some()
    }
}

/// Produces [`ConnectionWait`]s against one connectivity flag.
#[derive(Clone)]
pub struct ConnectionWaiter {
    state: Arc<SharedState>,
    runtime: Handle,
}

impl ConnectionWaiter {
    pub fn new(state: Arc<SharedState>, runtime: Handle) -> Self {
        Self { state, runtime }
    }

    /// Resolves `true` once connected (immediately if already connected),
    /// `false` on timeout or cancellation.
    ///
    /// The wait runs whether or not the returned future is polled, so
    /// `on_connected` fires even if the caller only keeps the canceller.
    pub fn on_connection(&self, options: WaitOptions) -> ConnectionWait {
        let WaitOptions {
            on_connected,
            on_error,
            timeout,
        } = options;

        let (signal_tx, mut signal_rx) = oneshot::channel();
        let shared = Arc::new(WaitShared::new(signal_tx));

        let weak = Arc::downgrade(&shared);
        let listener: ConnectivityListener = Arc::new(move |connected: bool| {
            if !connected {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                shared.settle(WaitOutcome::Connected);
            }
        });

        // The immediate branch never arms a timer.
        let timeout = match self.state.subscribe_unless_connected(listener) {
            Some(subscription) => {
                debug!("wait: offline, listening for connectivity");
                shared.attach(subscription);
                timeout
            }
            None => {
                debug!("wait: already connected");
                shared.settle(WaitOutcome::Connected);
                None
            }
        };

        let (result_tx, result_rx) = oneshot::channel();
        let timer_shared = Arc::clone(&shared);
        self.runtime.spawn(async move {
            let outcome = match timeout {
                Some(limit) => {
                    tokio::select! {
                        received = &mut signal_rx => received.unwrap_or(WaitOutcome::Cancelled),
                        _ = tokio::time::sleep(limit) => {
                            if timer_shared.settle(WaitOutcome::TimedOut) {
                                WaitOutcome::TimedOut
                            } else {
                                signal_rx.await.unwrap_or(WaitOutcome::Cancelled)
                            }
                        }
                    }
                }
                None => signal_rx.await.unwrap_or(WaitOutcome::Cancelled),
            };
            debug!("wait: settled outcome={outcome:?}");

            let result = match outcome {
                WaitOutcome::Connected => match on_connected {
                    Some(on_connected) => match on_connected().await {
                        Ok(()) => Ok(true),
                        Err(err) => {
                            if let Some(on_error) = on_error {
                                on_error(&err);
                            }
                            Err(WaitError::SideEffect(err))
                        }
                    },
                    None => Ok(true),
                },
                WaitOutcome::TimedOut | WaitOutcome::Cancelled => Ok(false),
            };
            let _ = result_tx.send(result);
        });

        ConnectionWait {
            result: result_rx,
            canceller: WaitCanceller { shared },
        }
    }
}

/// Cancels a pending [`ConnectionWait`]. Cheap to clone.
#[derive(Clone)]
pub struct WaitCanceller {
    shared: Arc<WaitShared>,
}

impl WaitCanceller {
    /// Returns `false` when the wait had already settled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.shared.settle(WaitOutcome::Cancelled);
        if cancelled {
            debug!("wait: cancelled");
        }
        cancelled
    }

    pub fn is_settled(&self) -> bool {
        self.shared.is_settled()
    }
}

pub struct ConnectionWait {
    result: oneshot::Receiver<Result<bool, WaitError>>,
    canceller: WaitCanceller,
}

impl ConnectionWait {
    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn canceller(&self) -> WaitCanceller {
        self.canceller.clone()
    }
}

impl Future for ConnectionWait {
    type Output = Result<bool, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().result).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(WaitError::Interrupted)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
#[path = "tests/waiter_tests.rs"]
mod tests;
