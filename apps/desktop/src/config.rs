use std::{collections::HashMap, fs, path::Path, time::Duration};

use client_core::RegistryOptions;

pub const DEFAULT_SETTINGS_FILE: &str = "desktop.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host_url: String,
    pub fetch_timeout_ms: u64,
    pub persist_on_down: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_url: "http://127.0.0.1:8765".into(),
            fetch_timeout_ms: 3_000,
            persist_on_down: true,
        }
    }
}

impl Settings {
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            persist_on_down: self.persist_on_down,
        }
    }
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        tracing::warn!("ignoring unreadable desktop settings file");
        return;
    };
    if let Some(v) = file_cfg.get("host_url").and_then(toml::Value::as_str) {
        settings.host_url = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("fetch_timeout_ms")
        .and_then(toml::Value::as_integer)
        .and_then(|v| u64::try_from(v).ok())
    {
        settings.fetch_timeout_ms = v;
    }
    if let Some(v) = file_cfg.get("persist_on_down").and_then(toml::Value::as_bool) {
        settings.persist_on_down = v;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("DROSSE_HOST_URL") {
        settings.host_url = v;
    }
    if let Some(v) = var("DROSSE_FETCH_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.fetch_timeout_ms = parsed;
        }
    }
    if let Some(v) = var("DROSSE_PERSIST_ON_DOWN") {
        if let Ok(parsed) = v.parse::<bool>() {
            settings.persist_on_down = parsed;
        }
    }
}
