use super::{apply_env, apply_file, load_settings, Settings};

use std::{
    collections::HashMap,
    env, fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        r#"
            start_connected = false
            fetch_delay_ms = 10
            warn_color = "amber"
        "#,
    )
    .expect("valid toml");

    assert!(!settings.start_connected);
    assert_eq!(settings.fetch_delay(), Duration::from_millis(10));
    assert_eq!(settings.warn_color, "amber");
    assert_eq!(settings.error_color, "red");
    assert_eq!(settings.wait_timeout(), None);
}

#[test]
fn env_wins_over_file_and_skips_unparseable_numbers() {
    let mut settings = Settings::default();
    apply_file(&mut settings, "fetch_delay_ms = 10\nwait_timeout_ms = 500").expect("valid toml");

    let env = HashMap::from([
        ("PLAYGROUND_FETCH_DELAY_MS", "20"),
        ("PLAYGROUND_WAIT_TIMEOUT_MS", "soon"),
        ("PLAYGROUND_NO_NETWORK_TITLE", "Offline"),
    ]);
    apply_env(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.fetch_delay_ms, 20);
    assert_eq!(settings.wait_timeout_ms, Some(500));
    assert_eq!(settings.no_network_title.as_deref(), Some("Offline"));
}

#[test]
fn rejects_malformed_file() {
    let mut settings = Settings::default();
    assert!(apply_file(&mut settings, "fetch_delay_ms = \"slow\"").is_err());
}

#[test]
fn explicit_missing_config_is_an_error() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let missing = env::temp_dir().join(format!("playground_missing_{suffix}.toml"));
    assert!(load_settings(Some(&missing)).is_err());
}

#[test]
fn explicit_config_file_is_loaded() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("playground_config_{suffix}.toml"));
    fs::write(&path, "probe_timeout_ms = 750\nerror_color = \"crimson\"").expect("write config");

    let settings = load_settings(Some(&path)).expect("load");
    fs::remove_file(&path).expect("cleanup");

    let options = settings.manager_options();
    assert_eq!(options.probe_timeout, Duration::from_millis(750));
    assert_eq!(options.theme.error.0, "crimson");
}

#[test]
fn no_network_title_becomes_banner_override() {
    let settings = Settings {
        no_network_title: Some("Offline".into()),
        ..Settings::default()
    };
    let options = settings.manager_options();
    assert_eq!(
        options
            .no_network_message
            .and_then(|message| message.title)
            .as_deref(),
        Some("Offline")
    );
}
