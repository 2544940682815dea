use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use network_manager::{
    ManualConnectivity, NetworkManager, NotificationGateway, SharedState,
    StandardErrorNormalizer, SubmitErrorContext, SubmitOptions, TracingNotifications, WaitOptions,
};
use shared::{
    domain::DependencyKey,
    message::{Icon, MessageConfig},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Mock fetch that fails offline, then recovers through "Try Again".
    Refresh,
    /// Waits for connectivity, cancelling a second wait along the way.
    RunOnConnection,
    All,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,
    /// Overrides the run-on-connection timeout.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

struct Playground {
    manager: Arc<NetworkManager>,
    provider: Arc<ManualConnectivity>,
    notifications: Arc<TracingNotifications>,
    settings: Settings,
}

impl Playground {
    async fn start(settings: Settings) -> Result<Self> {
        let provider = ManualConnectivity::new(settings.start_connected);
        let notifications = Arc::new(TracingNotifications::default());
        let manager = NetworkManager::new_with_dependencies(
            provider.clone(),
            notifications.clone() as Arc<dyn NotificationGateway>,
            Arc::new(StandardErrorNormalizer),
            settings.manager_options(),
        )?;
        manager.set_input_dismissal(|| info!("playground: keyboard dismissed"));

        // Bounded by the probe timeout.
        while !manager.state().is_determined() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!(
            "playground: started connected={} visible_notifications={}",
            manager.is_connected(),
            notifications.visible_count()
        );

        Ok(Self {
            manager,
            provider,
            notifications,
            settings,
        })
    }

    fn toggle_connection(&self) {
        let connected = self.provider.toggle();
        info!("playground: toggled connection connected={connected}");
    }

    fn press(&self, label: &str) -> Result<()> {
        let action = self
            .notifications
            .visible()
            .into_iter()
            .find_map(|(_, message)| message.find_action(label).cloned())
            .ok_or_else(|| anyhow!("no visible notification offers '{label}'"))?;
        info!("playground: pressing '{label}'");
        action.press();
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        if !self.manager.is_connected() {
            self.toggle_connection();
        }

        let state: Arc<SharedState> = self.manager.state().clone();
        let delay = self.settings.fetch_delay();
        let controller = self.manager.submit_controller(
            move |_: ()| {
                let state = state.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    if !state.is_connected() {
                        return Err(anyhow!("Unable to fetch"));
                    }
                    Ok("Fetched".to_string())
                }
            },
            DependencyKey::NONE,
            SubmitOptions::new()
                .submitting_message(
                    MessageConfig::new()
                        .title("Fetching Mock Data")
                        .message("This may take a few moments")
                        .icon(Icon::new("database", "Entypo")),
                )
                .get_error_message(|context: SubmitErrorContext| {
                    MessageConfig::new()
                        .title("Error Fetching Data")
                        .action(context.resolution.try_again_action("Try Again"))
                        .action(context.resolution.cancel_action("Cancel"))
                })
                .on_error(|envelope| async move {
                    info!("playground: submit error {envelope}");
                })
                .on_success(|value: String| async move {
                    info!("playground: submit success value={value}");
                    anyhow::Ok(())
                }),
        );

        let mut statuses = controller.subscribe_status();
        tokio::spawn(async move {
            while let Ok(status) = statuses.recv().await {
                info!("playground: Submit Status is {status}");
            }
        });

        let handle = controller
            .submit()
            .ok_or_else(|| anyhow!("submit unavailable while {}", controller.status()))?;
        let run = handle.submit(())?;

        // Drop the connection halfway through the fetch.
        tokio::time::sleep(delay / 2).await;
        self.toggle_connection();
        run.await?;

        self.toggle_connection();
        self.press("Try Again")?;
        while controller.is_running() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("playground: refresh finished status={}", controller.status());
        Ok(())
    }

    async fn run_on_connection(&self, timeout: Option<Duration>) -> Result<()> {
        if self.manager.is_connected() {
            self.toggle_connection();
        }

        let mut options = WaitOptions::new()
            .on_connected(|| async {
                info!("playground: Has connected!");
                anyhow::Ok(())
            })
            .on_error(|err| info!("playground: on-connection side effect failed: {err:#}"));
        if let Some(limit) = timeout {
            options = options.timeout(limit);
        }
        let wait = self.manager.on_connection(options);

        let abandoned = self.manager.on_connection_async(timeout);
        info!("playground: cancel run on connection -> {}", abandoned.cancel());

        self.toggle_connection();
        let connected = wait.await?;
        info!(
            "playground: run on connection resolved={connected} abandoned={}",
            abandoned.await?
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(timeout_ms) = args.timeout_ms {
        settings.wait_timeout_ms = Some(timeout_ms);
    }
    let timeout = settings.wait_timeout();
    let playground = Playground::start(settings).await?;

    if matches!(args.scenario, Scenario::Refresh | Scenario::All) {
        playground.refresh().await?;
    }
    if matches!(args.scenario, Scenario::RunOnConnection | Scenario::All) {
        playground.run_on_connection(timeout).await?;
    }

    info!(
        "playground: done connected={} visible_notifications={}",
        playground.manager.is_connected(),
        playground.notifications.visible_count()
    );
    Ok(())
}
