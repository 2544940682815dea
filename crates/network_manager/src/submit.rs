//! Connectivity-gated, single-flight submission of one async task.
//!
//! The controller hands out a [`SubmitHandle`] only while its status is
//! `Available`; there is no other entry point, so ineligible states cannot
//! start a run. Failures are normalized into an [`ErrorEnvelope`] and routed
//! either to `on_error` directly or through an error notification whose
//! cancel / try-again actions resolve them.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, Weak},
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use serde_json::{json, Value};
use shared::{
    domain::{derive_status, DependencyKey, NotificationHandle, SubmitStatus},
    error::{ErrorContext, ErrorEnvelope, Severity, SUBMIT_ERROR},
    message::{merge_defaults, MessageAction, MessageConfig},
};
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{state::lock, ControllerDeps, NotificationGateway, SubmitError, Subscription};

pub const SUBMIT_ERROR_NAME: &str = "NetworkManagerError";
pub const SUBMIT_ERROR_MESSAGE: &str = "Unable to submit";
const STATUS_CHANNEL_CAPACITY: usize = 64;

pub(crate) type SubmitTask<A, T> =
    Arc<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;
type OnSuccess<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type OnError = Arc<dyn Fn(ErrorEnvelope) -> BoxFuture<'static, ()> + Send + Sync>;
type ErrorMessageFactory = Arc<dyn Fn(SubmitErrorContext) -> MessageConfig + Send + Sync>;
/// Claims the slot for another run, or `None` while one is in flight.
type Retry = Box<dyn Fn() -> Option<BoxFuture<'static, ()>> + Send + Sync>;

pub struct SubmitOptions<T> {
    pub disabled: bool,
    /// Shown for the duration of each run, merged over the submitting template.
    pub submitting_message: Option<MessageConfig>,
    get_error_message: Option<ErrorMessageFactory>,
    on_error: Option<OnError>,
    on_success: Option<OnSuccess<T>>,
}

impl<T> Default for SubmitOptions<T> {
    fn default() -> Self {
        Self {
            disabled: false,
            submitting_message: None,
            get_error_message: None,
            on_error: None,
            on_success: None,
        }
    }
}

impl<T: Send + 'static> SubmitOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn submitting_message(mut self, message: MessageConfig) -> Self {
        self.submitting_message = Some(message);
        self
    }

    /// Builds the error notification. Without a factory, failures go straight
    /// to `on_error`.
    pub fn get_error_message(
        mut self,
        factory: impl Fn(SubmitErrorContext) -> MessageConfig + Send + Sync + 'static,
    ) -> Self {
        self.get_error_message = Some(Arc::new(factory));
        self
    }

    pub fn on_error<F, Fut>(mut self, on_error: F) -> Self
    where
        F: Fn(ErrorEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |envelope: ErrorEnvelope| {
            on_error(envelope).boxed()
        }));
        self
    }

    /// Awaited after the task succeeds. A failure here is handled like a task
    /// failure.
    pub fn on_success<F, Fut>(mut self, on_success: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_success = Some(Arc::new(move |result: T| on_success(result).boxed()));
        self
    }
}

impl<T> SubmitOptions<T> {
    fn summary(&self) -> Value {
        json!({
            "disabled": self.disabled,
            "submittingMessage": self
                .submitting_message
                .as_ref()
                .and_then(|message| serde_json::to_value(message).ok()),
            "hasErrorMessage": self.get_error_message.is_some(),
            "hasOnError": self.on_error.is_some(),
            "hasOnSuccess": self.on_success.is_some(),
        })
    }
}

/// Argument of the error-message factory.
pub struct SubmitErrorContext {
    pub error: ErrorEnvelope,
    pub resolution: ErrorResolution,
}

impl SubmitErrorContext {
    pub fn cancel(&self) -> bool {
        self.resolution.cancel()
    }

    pub fn try_again(&self) -> bool {
        self.resolution.try_again()
    }
}

struct ResolutionSlot {
    resolved: bool,
    notification: Option<NotificationHandle>,
}

struct ResolutionInner {
    envelope: ErrorEnvelope,
    slot: Mutex<ResolutionSlot>,
    notifications: Arc<dyn NotificationGateway>,
    on_error: Option<OnError>,
    retry: Retry,
    runtime: Handle,
}

/// The cancel / try-again pair for one failed run. Only the first call of
/// either takes effect.
#[derive(Clone)]
pub struct ErrorResolution {
    inner: Arc<ResolutionInner>,
}

impl ErrorResolution {
    fn new(
        envelope: ErrorEnvelope,
        on_error: Option<OnError>,
        notifications: Arc<dyn NotificationGateway>,
        runtime: Handle,
        retry: impl Fn() -> Option<BoxFuture<'static, ()>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(ResolutionInner {
                envelope,
                slot: Mutex::new(ResolutionSlot {
                    resolved: false,
                    notification: None,
                }),
                notifications,
                on_error,
                retry: Box::new(retry),
                runtime,
            }),
        }
    }

    pub fn error(&self) -> &ErrorEnvelope {
        &self.inner.envelope
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.inner.slot).resolved
    }

    /// Hides the error notification and hands the envelope to `on_error`.
    pub fn cancel(&self) -> bool {
        if !self.claim() {
            return false;
        }
        info!("submit: error cancelled code={}", self.inner.envelope.code);
        if let Some(on_error) = self.on_error_future() {
            self.inner.runtime.spawn(on_error);
        }
        true
    }

    /// Hides the error notification and runs the task again with the
    /// original arguments.
    ///
    /// Returns `false` without resolving anything while another run of the
    /// same controller is in flight; the notification stays up.
    pub fn try_again(&self) -> bool {
        let (run, notification) = {
            let mut slot = lock(&self.inner.slot);
            if slot.resolved {
                debug!("submit: error already resolved");
                return false;
            }
            let Some(run) = (self.inner.retry)() else {
                return false;
            };
            slot.resolved = true;
            (run, slot.notification.take())
        };
        info!("submit: trying again after {}", self.inner.envelope.code);
        if let Some(handle) = notification {
            self.inner.notifications.hide(handle);
        }
        self.inner.runtime.spawn(run);
        true
    }

    pub fn cancel_action(&self, label: impl Into<String>) -> MessageAction {
        let resolution = self.clone();
        MessageAction::new(label, move || {
            resolution.cancel();
        })
    }

    pub fn try_again_action(&self, label: impl Into<String>) -> MessageAction {
        let resolution = self.clone();
        MessageAction::new(label, move || {
            resolution.try_again();
        })
    }

    async fn cancel_in_place(&self) {
        if !self.claim() {
            return;
        }
        if let Some(on_error) = self.on_error_future() {
            on_error.await;
        }
    }

    fn claim(&self) -> bool {
        let notification = {
            let mut slot = lock(&self.inner.slot);
            if slot.resolved {
                debug!("submit: error already resolved");
                return false;
            }
            slot.resolved = true;
            slot.notification.take()
        };
        if let Some(handle) = notification {
            self.inner.notifications.hide(handle);
        }
        true
    }

    fn record_notification(&self, handle: NotificationHandle) {
        {
            let mut slot = lock(&self.inner.slot);
            if !slot.resolved {
                slot.notification = Some(handle);
                return;
            }
        }
        // Resolved from inside the message factory.
        self.inner.notifications.hide(handle);
    }

    fn on_error_future(&self) -> Option<BoxFuture<'static, ()>> {
        self.inner
            .on_error
            .as_ref()
            .map(|on_error| on_error(self.inner.envelope.clone()))
    }
}

struct SlotState {
    running: bool,
    disabled: bool,
    status: SubmitStatus,
    dependency_key: DependencyKey,
    handle_generation: Option<u64>,
    next_generation: u64,
}

struct ControllerInner<A, T> {
    deps: ControllerDeps,
    task: Mutex<SubmitTask<A, T>>,
    options: SubmitOptions<T>,
    slot: Mutex<SlotState>,
    status_events: broadcast::Sender<SubmitStatus>,
    connectivity: Mutex<Option<Subscription>>,
}

impl<A, T> ControllerInner<A, T> {
    fn derive(&self, slot: &SlotState) -> SubmitStatus {
        derive_status(self.deps.state.is_connected(), slot.running, slot.disabled)
    }

    fn status(&self) -> SubmitStatus {
        let slot = lock(&self.slot);
        self.derive(&slot)
    }

    fn refresh(&self) {
        let mut slot = lock(&self.slot);
        self.publish(&mut slot);
    }

    /// Drops the memoized handle whenever the slot is ineligible and
    /// broadcasts status changes.
    fn publish(&self, slot: &mut SlotState) {
        let status = self.derive(slot);
        if !status.is_available() {
            slot.handle_generation = None;
        }
        if status != slot.status {
            debug!("submit: status {} -> {status}", slot.status);
            slot.status = status;
            let _ = self.status_events.send(status);
        }
    }

    fn finish(&self) {
        let mut slot = lock(&self.slot);
        slot.running = false;
        self.publish(&mut slot);
    }
}

impl<A, T> ControllerInner<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    fn begin(&self, generation: u64) -> Result<(), SubmitError> {
        let mut slot = lock(&self.slot);
        let status = self.derive(&slot);
        if !status.is_available() {
            return Err(SubmitError::Unavailable { status });
        }
        if slot.handle_generation != Some(generation) {
            return Err(SubmitError::StaleHandle);
        }
        slot.running = true;
        self.publish(&mut slot);
        Ok(())
    }

    /// Re-entry from an error notification. Connectivity and `disabled` are
    /// not re-checked; only a run in flight blocks it.
    fn retry(self: &Arc<Self>, args: A) -> Option<BoxFuture<'static, ()>> {
        let mut slot = lock(&self.slot);
        if slot.running {
            warn!("submit: retry refused, a submission is already in flight");
            return None;
        }
        slot.running = true;
        self.publish(&mut slot);
        Some(Arc::clone(self).run(args))
    }

    /// The slot is released before a failure is reported, so the error
    /// notification can always be resolved with a retry.
    fn run(self: Arc<Self>, args: A) -> BoxFuture<'static, ()> {
        async move {
            let outcome = {
                let _running = RunningGuard { controller: &*self };
                self.attempt(args.clone()).await
            };
            match outcome {
                Ok(()) => info!("submit: completed"),
                Err(raw) => self.fail(raw, args).await,
            }
        }
        .boxed()
    }

    async fn attempt(&self, args: A) -> anyhow::Result<()> {
        self.deps.state.dismiss_input();

        let submitting = self.options.submitting_message.as_ref().map(|message| {
            self.deps
                .notifications
                .display(merge_defaults(&self.deps.templates.submitting, message))
        });

        let task = Arc::clone(&*lock(&self.task));
        let outcome = match task(args).await {
            Ok(result) => match &self.options.on_success {
                Some(on_success) => on_success(result).await,
                None => Ok(()),
            },
            Err(err) => Err(err),
        };

        if let Some(handle) = submitting {
            self.deps.notifications.hide(handle);
        }
        outcome
    }

    async fn fail(self: &Arc<Self>, raw: anyhow::Error, args: A) {
        let context = ErrorContext::new(SUBMIT_ERROR_NAME, SUBMIT_ERROR, SUBMIT_ERROR_MESSAGE)
            .with_info(json!({ "submitOptions": self.options.summary() }))
            .with_severity(Severity::High)
            .handled(true);
        let envelope = self.deps.normalizer.transform(raw, context);
        warn!(
            "submit: task failed: {envelope} cause={}",
            envelope.cause.as_deref().unwrap_or("-")
        );

        let controller = Arc::clone(self);
        let resolution = ErrorResolution::new(
            envelope.clone(),
            self.options.on_error.clone(),
            Arc::clone(&self.deps.notifications),
            self.deps.runtime.clone(),
            move || controller.retry(args.clone()),
        );

        match &self.options.get_error_message {
            Some(factory) => {
                let message = factory(SubmitErrorContext {
                    error: envelope,
                    resolution: resolution.clone(),
                });
                let handle = self
                    .deps
                    .notifications
                    .display(merge_defaults(&self.deps.templates.error, &message));
                resolution.record_notification(handle);
            }
            None => resolution.cancel_in_place().await,
        }
    }
}

impl<A, T> Drop for ControllerInner<A, T> {
    fn drop(&mut self) {
        let subscription = self
            .connectivity
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}

struct RunningGuard<'a, A, T> {
    controller: &'a ControllerInner<A, T>,
}

impl<A, T> Drop for RunningGuard<'_, A, T> {
    fn drop(&mut self) {
        self.controller.finish();
    }
}

/// Gates one async task on connectivity and runs it at most once at a time.
pub struct SubmissionController<A, T> {
    inner: Arc<ControllerInner<A, T>>,
}

impl<A, T> SubmissionController<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(
        deps: ControllerDeps,
        task: SubmitTask<A, T>,
        dependency_key: DependencyKey,
        options: SubmitOptions<T>,
    ) -> Self {
        let disabled = options.disabled;
        let status = derive_status(deps.state.is_connected(), false, disabled);
        let (status_events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        let inner = Arc::new(ControllerInner {
            deps,
            task: Mutex::new(task),
            options,
            slot: Mutex::new(SlotState {
                running: false,
                disabled,
                status,
                dependency_key,
                handle_generation: None,
                next_generation: 1,
            }),
            status_events,
            connectivity: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.deps.state.subscribe(Arc::new(move |_: bool| {
            if let Some(inner) = weak.upgrade() {
                inner.refresh();
            }
        }));
        *lock(&inner.connectivity) = Some(subscription);

        Self { inner }
    }

    pub fn status(&self) -> SubmitStatus {
        self.inner.status()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.slot).running
    }

    /// The invocable handle, present only while the status is `Available`.
    ///
    /// Repeated calls return equal handles until eligibility or the
    /// dependency key changes.
    pub fn submit(&self) -> Option<SubmitHandle<A, T>> {
        let mut slot = lock(&self.inner.slot);
        if !self.inner.derive(&slot).is_available() {
            slot.handle_generation = None;
            return None;
        }
        let generation = match slot.handle_generation {
            Some(generation) => generation,
            None => {
                let generation = slot.next_generation;
                slot.next_generation += 1;
                slot.handle_generation = Some(generation);
                generation
            }
        };
        Some(SubmitHandle {
            controller: Arc::downgrade(&self.inner),
            generation,
        })
    }

    /// Receives every status change made after this call. The current value
    /// is not replayed; read [`Self::status`] first for the full sequence.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SubmitStatus> {
        self.inner.status_events.subscribe()
    }

    /// A run already in flight is not interrupted.
    pub fn set_disabled(&self, disabled: bool) {
        let mut slot = lock(&self.inner.slot);
        slot.disabled = disabled;
        self.inner.publish(&mut slot);
    }

    pub fn dependency_key(&self) -> DependencyKey {
        lock(&self.inner.slot).dependency_key
    }

    /// Swaps the task when `dependencies` differs from the current key, which
    /// also invalidates the handle identity. Returns whether anything changed.
    pub fn rebind<F, Fut>(&self, dependencies: DependencyKey, task: F) -> bool
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut slot = lock(&self.inner.slot);
        if slot.dependency_key == dependencies {
            debug!("submit: rebind skipped, dependencies unchanged");
            return false;
        }
        slot.dependency_key = dependencies;
        slot.handle_generation = None;
        *lock(&self.inner.task) = Arc::new(move |args: A| task(args).boxed());
        true
    }
}

/// Entry point to a [`SubmissionController`] while it is available.
pub struct SubmitHandle<A, T> {
    controller: Weak<ControllerInner<A, T>>,
    generation: u64,
}

impl<A, T> SubmitHandle<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Starts a run immediately. The returned [`SubmissionRun`] completes
    /// once the run ends, including any error notification being shown;
    /// task failures are not reported through it.
    pub fn submit(&self, args: A) -> Result<SubmissionRun, SubmitError> {
        let controller = self
            .controller
            .upgrade()
            .ok_or(SubmitError::ControllerDropped)?;
        controller.begin(self.generation)?;
        let runtime = controller.deps.runtime.clone();
        Ok(SubmissionRun {
            join: runtime.spawn(controller.run(args)),
        })
    }
}

impl<A, T> Clone for SubmitHandle<A, T> {
    fn clone(&self) -> Self {
        Self {
            controller: Weak::clone(&self.controller),
            generation: self.generation,
        }
    }
}

impl<A, T> PartialEq for SubmitHandle<A, T> {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && Weak::ptr_eq(&self.controller, &other.controller)
    }
}

impl<A, T> Eq for SubmitHandle<A, T> {}

impl<A, T> fmt::Debug for SubmitHandle<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitHandle")
            .field("generation", &self.generation)
            .finish()
    }
}

/// A started run. Dropping it does not stop the run.
pub struct SubmissionRun {
    join: JoinHandle<()>,
}

impl Future for SubmissionRun {
    type Output = Result<(), SubmitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().join)
            .poll(cx)
            .map_err(|err| SubmitError::Aborted(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/submit_tests.rs"]
mod tests;
