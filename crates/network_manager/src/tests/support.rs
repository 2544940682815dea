use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::NotificationHandle,
    message::{MessageConfig, MessageTemplates},
};
use tokio::{runtime::Handle, sync::oneshot};

use crate::{
    ConnectivityCallback, ConnectivityProvider, ControllerDeps, ManualConnectivity,
    NetworkManager, NetworkManagerOptions, NotificationGateway, ProviderUnsubscribe, SharedState,
    StandardErrorNormalizer,
};

/// Lets spawned tasks on the current-thread test runtime run to their next
/// suspension point.
pub(crate) async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NotificationEvent {
    Display {
        handle: NotificationHandle,
        config: MessageConfig,
    },
    Hide(NotificationHandle),
}

#[derive(Default)]
pub(crate) struct RecordingNotifications {
    events: Mutex<Vec<NotificationEvent>>,
    visible: Mutex<Vec<(NotificationHandle, MessageConfig)>>,
}

impl RecordingNotifications {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().expect("events").clone()
    }

    pub(crate) fn display_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, NotificationEvent::Display { .. }))
            .count()
    }

    pub(crate) fn hide_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, NotificationEvent::Hide(_)))
            .count()
    }

    pub(crate) fn visible(&self) -> Vec<(NotificationHandle, MessageConfig)> {
        self.visible.lock().expect("visible").clone()
    }

    pub(crate) fn visible_titles(&self) -> Vec<String> {
        self.visible()
            .into_iter()
            .filter_map(|(_, config)| config.title)
            .collect()
    }

    /// Presses `label` on the most recent visible message carrying it.
    pub(crate) fn press(&self, label: &str) -> bool {
        let action = self
            .visible()
            .into_iter()
            .rev()
            .find_map(|(_, config)| config.find_action(label).cloned());
        match action {
            Some(action) => {
                action.press();
                true
            }
            None => false,
        }
    }
}

impl NotificationGateway for RecordingNotifications {
    fn display(&self, message: MessageConfig) -> NotificationHandle {
        let handle = NotificationHandle::generate();
        self.events
            .lock()
            .expect("events")
            .push(NotificationEvent::Display {
                handle,
                config: message.clone(),
            });
        self.visible.lock().expect("visible").push((handle, message));
        handle
    }

    fn hide(&self, handle: NotificationHandle) {
        self.events
            .lock()
            .expect("events")
            .push(NotificationEvent::Hide(handle));
        self.visible
            .lock()
            .expect("visible")
            .retain(|(visible, _)| *visible != handle);
    }
}

pub(crate) enum Probe {
    Value(bool),
    Fail(&'static str),
    Deferred(oneshot::Receiver<bool>),
    Never,
}

/// Provider whose probe result and events are scripted per test.
pub(crate) struct ScriptedProvider {
    probe: Mutex<Option<Probe>>,
    fetch_calls: AtomicUsize,
    fail_subscribe: AtomicBool,
    callbacks: Mutex<Vec<ConnectivityCallback>>,
    unsubscribed: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub(crate) fn new(probe: Probe) -> Arc<Self> {
        Arc::new(Self {
            probe: Mutex::new(Some(probe)),
            fetch_calls: AtomicUsize::new(0),
            fail_subscribe: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            unsubscribed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub(crate) fn deferred() -> (Arc<Self>, oneshot::Sender<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(Probe::Deferred(rx)), tx)
    }

    pub(crate) fn refusing_subscriptions(probe: Probe) -> Arc<Self> {
        let provider = Self::new(probe);
        provider.fail_subscribe.store(true, Ordering::SeqCst);
        provider
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn was_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, connected: bool) {
        let callbacks = self.callbacks.lock().expect("callbacks").clone();
        for callback in callbacks {
            callback(Ok(connected));
        }
    }

    pub(crate) fn emit_error(&self, message: &'static str) {
        let callbacks = self.callbacks.lock().expect("callbacks").clone();
        for callback in callbacks {
            callback(Err(anyhow!(message)));
        }
    }
}

#[async_trait]
impl ConnectivityProvider for ScriptedProvider {
    async fn fetch(&self) -> Result<bool> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let probe = self.probe.lock().expect("probe").take();
        match probe {
            Some(Probe::Value(connected)) => Ok(connected),
            Some(Probe::Fail(message)) => Err(anyhow!(message)),
            Some(Probe::Deferred(rx)) => rx.await.map_err(|_| anyhow!("probe sender dropped")),
            Some(Probe::Never) | None => std::future::pending().await,
        }
    }

    fn subscribe(&self, callback: ConnectivityCallback) -> Result<ProviderUnsubscribe> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(anyhow!("subscriptions unsupported"));
        }
        self.callbacks.lock().expect("callbacks").push(callback);
        let unsubscribed = Arc::clone(&self.unsubscribed);
        Ok(Box::new(move || unsubscribed.store(true, Ordering::SeqCst)))
    }
}

pub(crate) fn deps(
    state: &Arc<SharedState>,
    notifications: &Arc<RecordingNotifications>,
) -> ControllerDeps {
    ControllerDeps {
        state: Arc::clone(state),
        notifications: Arc::clone(notifications) as Arc<dyn NotificationGateway>,
        normalizer: Arc::new(StandardErrorNormalizer),
        templates: Arc::new(MessageTemplates::default()),
        runtime: Handle::current(),
    }
}

/// Manager over a [`ManualConnectivity`] whose initial probe already landed.
pub(crate) async fn manual_manager(
    connected: bool,
) -> (
    Arc<NetworkManager>,
    Arc<ManualConnectivity>,
    Arc<RecordingNotifications>,
) {
    let provider = ManualConnectivity::new(connected);
    let notifications = RecordingNotifications::new();
    let manager = NetworkManager::new_with_dependencies(
        Arc::clone(&provider) as Arc<dyn ConnectivityProvider>,
        Arc::clone(&notifications) as Arc<dyn NotificationGateway>,
        Arc::new(StandardErrorNormalizer),
        NetworkManagerOptions::default(),
    )
    .expect("inside runtime");
    settle().await;
    (manager, provider, notifications)
}
