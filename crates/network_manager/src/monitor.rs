use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use shared::{
    domain::NotificationHandle,
    message::{merge_defaults, MessageConfig, MessageTemplates},
};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::{
    state::lock, ConnectivityCallback, ConnectivityListener, ConnectivityProvider,
    NotificationGateway, ProviderUnsubscribe, SharedState, Subscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Probe,
    Event,
}

#[derive(Default)]
struct ApplyState {
    event_seen: bool,
    draining: bool,
    pending: VecDeque<(bool, Source)>,
}

/// Single writer of the connectivity flag.
///
/// Owns the offline banner: shown on every transition to disconnected,
/// hidden on the transition back. At most one banner is visible.
pub struct ConnectivityMonitor {
    state: Arc<SharedState>,
    notifications: Arc<dyn NotificationGateway>,
    default_no_network: MessageConfig,
    no_network_message: RwLock<MessageConfig>,
    /// Queue of results waiting to be applied. Whoever finds it idle drains
    /// it, so flag writes and banner updates never interleave.
    apply_lock: Mutex<ApplyState>,
    offline_banner: Mutex<Option<NotificationHandle>>,
    provider_subscription: Mutex<Option<ProviderUnsubscribe>>,
}

impl ConnectivityMonitor {
    /// Subscribes to provider changes and spawns the initial probe.
    pub fn start(
        provider: Arc<dyn ConnectivityProvider>,
        notifications: Arc<dyn NotificationGateway>,
        templates: &MessageTemplates,
        state: Arc<SharedState>,
        probe_timeout: Duration,
        runtime: &Handle,
    ) -> Arc<Self> {
        let monitor = Arc::new(Self {
            state,
            notifications,
            default_no_network: templates.no_network.clone(),
            no_network_message: RwLock::new(templates.no_network.clone()),
            apply_lock: Mutex::new(ApplyState::default()),
            offline_banner: Mutex::new(None),
            provider_subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&monitor);
        let callback: ConnectivityCallback = Arc::new(move |event: anyhow::Result<bool>| {
            if let Some(monitor) = weak.upgrade() {
                monitor.handle_event(event);
            }
        });
        match provider.subscribe(callback) {
            Ok(unsubscribe) => *lock(&monitor.provider_subscription) = Some(unsubscribe),
            Err(err) => warn!("connectivity: provider subscription failed: {err:#}"),
        }

        let probe_monitor = Arc::clone(&monitor);
        runtime.spawn(async move {
            let connected = match tokio::time::timeout(probe_timeout, provider.fetch()).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(err)) => {
                    warn!("connectivity: probe failed, assuming offline: {err:#}");
                    false
                }
                Err(_) => {
                    warn!(
                        "connectivity: probe timed out after {}ms, assuming offline",
                        probe_timeout.as_millis()
                    );
                    false
                }
            };
            probe_monitor.apply(connected, Source::Probe);
        });

        monitor
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Listeners run synchronously on the thread applying the change. A
    /// provider event pushed from inside a listener is queued and applied
    /// once the current listeners have all been called.
    #[must_use = "dropping the subscription leaves the listener registered"]
    pub fn subscribe(&self, listener: ConnectivityListener) -> Subscription {
        self.state.subscribe(listener)
    }

    /// Replaces the banner content; takes effect on the next display.
    pub fn set_no_network_message(&self, message: &MessageConfig) {
        let merged = merge_defaults(&self.default_no_network, message);
        *self
            .no_network_message
            .write()
            .unwrap_or_else(PoisonError::into_inner) = merged;
    }

    pub fn offline_banner(&self) -> Option<NotificationHandle> {
        *lock(&self.offline_banner)
    }

    fn handle_event(&self, event: anyhow::Result<bool>) {
        match event {
            Ok(connected) => self.apply(connected, Source::Event),
            Err(err) => warn!("connectivity: provider event error ignored: {err:#}"),
        }
    }

    fn apply(&self, connected: bool, source: Source) {
        {
            let mut applying = lock(&self.apply_lock);
            match source {
                Source::Event => applying.event_seen = true,
                Source::Probe if applying.event_seen => {
                    debug!("connectivity: discarding probe result superseded by provider event");
                    return;
                }
                Source::Probe => {}
            }
            applying.pending.push_back((connected, source));
            if applying.draining {
                debug!("connectivity: queued connected={connected} behind an update in progress");
                return;
            }
            applying.draining = true;
        }

        loop {
            let next = {
                let mut applying = lock(&self.apply_lock);
                let next = applying.pending.pop_front();
                if next.is_none() {
                    applying.draining = false;
                }
                next
            };
            match next {
                Some((connected, source)) => self.transition(connected, source),
                None => break,
            }
        }
    }

    /// Only ever called by the thread draining the queue.
    fn transition(&self, connected: bool, source: Source) {
        if self.state.is_determined() && self.state.is_connected() == connected {
            return;
        }

        if connected {
            let banner = lock(&self.offline_banner).take();
            if let Some(banner) = banner {
                self.notifications.hide(banner);
            }
            info!("connectivity: online (source={source:?})");
        } else {
            let mut banner = lock(&self.offline_banner);
            if banner.is_none() {
                let message = self
                    .no_network_message
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                *banner = Some(self.notifications.display(message));
            }
            drop(banner);
            warn!("connectivity: offline (source={source:?})");
        }

        self.state.set_connected(connected);
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        let subscription = self
            .provider_subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(unsubscribe) = subscription {
            unsubscribe();
        }
    }
}

#[cfg(test)]
#[path = "tests/monitor_tests.rs"]
mod tests;
