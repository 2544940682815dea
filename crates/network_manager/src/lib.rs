use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::FutureExt;
use shared::{
    domain::{DependencyKey, NotificationHandle},
    error::{ErrorContext, ErrorEnvelope},
    message::{MessageConfig, MessageTemplates, Theme},
};
use tokio::runtime::Handle;
use tracing::{debug, info};

pub mod error;
mod monitor;
mod state;
mod submit;
mod waiter;

pub use error::{ManagerError, SubmitError, WaitError};
pub use monitor::ConnectivityMonitor;
pub use state::{ConnectivityListener, SharedState, Subscription};
pub use submit::{
    ErrorResolution, SubmissionController, SubmitErrorContext, SubmitHandle, SubmitOptions,
    SubmissionRun, SUBMIT_ERROR_MESSAGE, SUBMIT_ERROR_NAME,
};
pub use waiter::{ConnectionWait, ConnectionWaiter, WaitCanceller, WaitOptions};

use state::lock;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub type ConnectivityCallback = Arc<dyn Fn(Result<bool>) + Send + Sync>;
pub type ProviderUnsubscribe = Box<dyn FnOnce() + Send>;

/// Platform source of network reachability.
#[async_trait]
pub trait ConnectivityProvider: Send + Sync {
    /// One-off probe of the current reachability.
    async fn fetch(&self) -> Result<bool>;
    /// Registers `callback` for every change the platform reports.
    fn subscribe(&self, callback: ConnectivityCallback) -> Result<ProviderUnsubscribe>;
}

/// Display/hide channel for notifications.
pub trait NotificationGateway: Send + Sync {
    fn display(&self, message: MessageConfig) -> NotificationHandle;
    /// Hiding an unknown or already hidden handle is a no-op.
    fn hide(&self, handle: NotificationHandle);
}

pub trait ErrorNormalizer: Send + Sync {
    fn transform(&self, raw: anyhow::Error, context: ErrorContext) -> ErrorEnvelope;
}

/// Clears pending interactive input (open keyboards, focused fields) before a
/// submission starts.
pub trait InputDismissal: Send + Sync {
    fn dismiss(&self);
}

impl<F> InputDismissal for F
where
    F: Fn() + Send + Sync,
{
    fn dismiss(&self) {
        self()
    }
}

/// Uses the context as the envelope and keeps the raw failure text as the
/// cause. Failures that already carry an envelope pass through unchanged.
pub struct StandardErrorNormalizer;

impl ErrorNormalizer for StandardErrorNormalizer {
    fn transform(&self, raw: anyhow::Error, context: ErrorContext) -> ErrorEnvelope {
        if let Some(existing) = raw.downcast_ref::<ErrorEnvelope>() {
            return existing.clone();
        }
        ErrorEnvelope::from_context(context, Some(format!("{raw:#}")))
    }
}

/// Gateway that only logs. Keeps track of what is visible so callers can
/// inspect or press actions on displayed messages.
#[derive(Default)]
pub struct TracingNotifications {
    visible: Mutex<HashMap<NotificationHandle, MessageConfig>>,
}

impl TracingNotifications {
    pub fn visible_count(&self) -> usize {
        lock(&self.visible).len()
    }

    pub fn visible(&self) -> Vec<(NotificationHandle, MessageConfig)> {
        lock(&self.visible)
            .iter()
            .map(|(handle, message)| (*handle, message.clone()))
            .collect()
    }
}

impl NotificationGateway for TracingNotifications {
    fn display(&self, message: MessageConfig) -> NotificationHandle {
        let handle = NotificationHandle::generate();
        info!(
            "notification: display handle={handle} title={:?} message={:?}",
            message.title, message.message
        );
        lock(&self.visible).insert(handle, message);
        handle
    }

    fn hide(&self, handle: NotificationHandle) {
        if lock(&self.visible).remove(&handle).is_some() {
            info!("notification: hide handle={handle}");
        } else {
            debug!("notification: hide ignored for unknown handle={handle}");
        }
    }
}

/// Provider driven by hand, for simulations and tests.
pub struct ManualConnectivity {
    connected: AtomicBool,
    fail_probe: AtomicBool,
    callbacks: Arc<Mutex<Vec<(u64, ConnectivityCallback)>>>,
    next_callback_id: AtomicU64,
}

impl ManualConnectivity {
    pub fn new(connected: bool) -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            fail_probe: AtomicBool::new(false),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            next_callback_id: AtomicU64::new(1),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.emit(|| Ok(connected));
    }

    pub fn toggle(&self) -> bool {
        let connected = !self.is_connected();
        self.set_connected(connected);
        connected
    }

    /// Delivers a provider-side failure to subscribers.
    pub fn report_error(&self, message: &str) {
        self.emit(|| Err(anyhow!(message.to_string())));
    }

    pub fn fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.callbacks).len()
    }

    fn emit(&self, event: impl Fn() -> Result<bool>) {
        let callbacks = lock(&self.callbacks)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect::<Vec<_>>();
        for callback in callbacks {
            callback(event());
        }
    }
}

#[async_trait]
impl ConnectivityProvider for ManualConnectivity {
    async fn fetch(&self) -> Result<bool> {
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(anyhow!("connectivity probe unavailable"));
        }
        Ok(self.is_connected())
    }

    fn subscribe(&self, callback: ConnectivityCallback) -> Result<ProviderUnsubscribe> {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.callbacks).push((id, callback));
        let callbacks = Arc::downgrade(&self.callbacks);
        Ok(Box::new(move || {
            if let Some(callbacks) = callbacks.upgrade() {
                lock(&callbacks).retain(|(callback_id, _)| *callback_id != id);
            }
        }))
    }
}

#[derive(Debug, Clone)]
pub struct NetworkManagerOptions {
    pub theme: Theme,
    /// Fields merged over the default no-network banner.
    pub no_network_message: Option<MessageConfig>,
    /// Upper bound for the initial probe; a timed-out probe means offline.
    pub probe_timeout: Duration,
}

impl Default for NetworkManagerOptions {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            no_network_message: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Everything a submission controller needs from its manager.
#[derive(Clone)]
pub(crate) struct ControllerDeps {
    pub(crate) state: Arc<SharedState>,
    pub(crate) notifications: Arc<dyn NotificationGateway>,
    pub(crate) normalizer: Arc<dyn ErrorNormalizer>,
    pub(crate) templates: Arc<MessageTemplates>,
    pub(crate) runtime: Handle,
}

pub struct NetworkManager {
    monitor: Arc<ConnectivityMonitor>,
    deps: ControllerDeps,
}

impl NetworkManager {
    pub fn new(provider: Arc<dyn ConnectivityProvider>) -> Result<Arc<Self>, ManagerError> {
        Self::new_with_dependencies(
            provider,
            Arc::new(TracingNotifications::default()),
            Arc::new(StandardErrorNormalizer),
            NetworkManagerOptions::default(),
        )
    }

    /// Must be called inside a tokio runtime; the initial probe is spawned on it.
    pub fn new_with_dependencies(
        provider: Arc<dyn ConnectivityProvider>,
        notifications: Arc<dyn NotificationGateway>,
        normalizer: Arc<dyn ErrorNormalizer>,
        options: NetworkManagerOptions,
    ) -> Result<Arc<Self>, ManagerError> {
        let runtime = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;
        let templates = Arc::new(MessageTemplates::from_theme(&options.theme));
        let state = SharedState::new();

        let monitor = ConnectivityMonitor::start(
            provider,
            Arc::clone(&notifications),
            &templates,
            Arc::clone(&state),
            options.probe_timeout,
            &runtime,
        );
        if let Some(message) = &options.no_network_message {
            monitor.set_no_network_message(message);
        }

        Ok(Arc::new(Self {
            monitor,
            deps: ControllerDeps {
                state,
                notifications,
                normalizer,
                templates,
                runtime,
            },
        }))
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.deps.state
    }

    #[must_use = "dropping the subscription leaves the listener registered"]
    pub fn subscribe_connectivity(
        &self,
        listener: impl Fn(bool) + Send + Sync + 'static,
    ) -> Subscription {
        self.monitor.subscribe(Arc::new(listener))
    }

    pub fn set_no_network_message(&self, message: &MessageConfig) {
        self.monitor.set_no_network_message(message);
    }

    pub fn set_input_dismissal(&self, hook: impl InputDismissal + 'static) {
        self.deps.state.set_input_dismissal(Arc::new(hook));
    }

    pub fn waiter(&self) -> ConnectionWaiter {
        ConnectionWaiter::new(Arc::clone(&self.deps.state), self.deps.runtime.clone())
    }

    pub fn on_connection(&self, options: WaitOptions) -> ConnectionWait {
        self.waiter().on_connection(options)
    }

    pub fn on_connection_async(&self, timeout: Option<Duration>) -> ConnectionWait {
        let options = match timeout {
            Some(limit) => WaitOptions::new().timeout(limit),
            None => WaitOptions::new(),
        };
        self.on_connection(options)
    }

    /// Wraps `task` in a controller bound to this manager's connectivity and
    /// notification channel.
    pub fn submit_controller<A, T, F, Fut>(
        &self,
        task: F,
        dependencies: DependencyKey,
        options: SubmitOptions<T>,
    ) -> SubmissionController<A, T>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        SubmissionController::new(
            self.deps.clone(),
            Arc::new(move |args: A| task(args).boxed()),
            dependencies,
            options,
        )
    }

    /// Same as [`Self::submit_controller`] with the dependency key derived
    /// from any hashable value.
    pub fn submit_controller_with<A, T, F, Fut, D>(
        &self,
        task: F,
        dependencies: &D,
        options: SubmitOptions<T>,
    ) -> SubmissionController<A, T>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        D: Hash + ?Sized,
    {
        self.submit_controller(task, DependencyKey::of(dependencies), options)
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
