use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use network_manager::NetworkManagerOptions;
use serde::Deserialize;
use shared::message::{ColorToken, MessageConfig, Theme};

const DEFAULT_CONFIG_FILE: &str = "playground.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub start_connected: bool,
    pub fetch_delay_ms: u64,
    pub wait_timeout_ms: Option<u64>,
    pub probe_timeout_ms: u64,
    pub warn_color: String,
    pub error_color: String,
    pub no_network_title: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_connected: true,
            fetch_delay_ms: 2500,
            wait_timeout_ms: None,
            probe_timeout_ms: 5000,
            warn_color: "orange".into(),
            error_color: "red".into(),
            no_network_title: None,
        }
    }
}

impl Settings {
    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn manager_options(&self) -> NetworkManagerOptions {
        NetworkManagerOptions {
            theme: Theme {
                warn: ColorToken::new(self.warn_color.clone()),
                error: ColorToken::new(self.error_color.clone()),
            },
            no_network_message: self
                .no_network_title
                .as_ref()
                .map(|title| MessageConfig::new().title(title.clone())),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    start_connected: Option<bool>,
    fetch_delay_ms: Option<u64>,
    wait_timeout_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
    warn_color: Option<String>,
    error_color: Option<String>,
    no_network_title: Option<String>,
}

/// Defaults, then the config file, then `PLAYGROUND_*` variables.
///
/// An explicit `path` must exist; the default `playground.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let raw = match path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config '{}'", path.display()))?,
        ),
        None => fs::read_to_string(DEFAULT_CONFIG_FILE).ok(),
    };
    if let Some(raw) = raw {
        apply_file(&mut settings, &raw)?;
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw).context("invalid playground config")?;

    if let Some(v) = file_cfg.start_connected {
        settings.start_connected = v;
    }
    if let Some(v) = file_cfg.fetch_delay_ms {
        settings.fetch_delay_ms = v;
    }
    if file_cfg.wait_timeout_ms.is_some() {
        settings.wait_timeout_ms = file_cfg.wait_timeout_ms;
    }
    if let Some(v) = file_cfg.probe_timeout_ms {
        settings.probe_timeout_ms = v;
    }
    if let Some(v) = file_cfg.warn_color {
        settings.warn_color = v;
    }
    if let Some(v) = file_cfg.error_color {
        settings.error_color = v;
    }
    if file_cfg.no_network_title.is_some() {
        settings.no_network_title = file_cfg.no_network_title;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("PLAYGROUND_START_CONNECTED") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.start_connected = parsed;
        }
    }
    if let Some(v) = lookup("PLAYGROUND_FETCH_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.fetch_delay_ms = parsed;
        }
    }
    if let Some(v) = lookup("PLAYGROUND_WAIT_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.wait_timeout_ms = Some(parsed);
        }
    }
    if let Some(v) = lookup("PLAYGROUND_PROBE_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.probe_timeout_ms = parsed;
        }
    }
    if let Some(v) = lookup("PLAYGROUND_WARN_COLOR") {
        settings.warn_color = v;
    }
    if let Some(v) = lookup("PLAYGROUND_ERROR_COLOR") {
        settings.error_color = v;
    }
    if let Some(v) = lookup("PLAYGROUND_NO_NETWORK_TITLE") {
        settings.no_network_title = Some(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
