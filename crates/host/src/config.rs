use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;

const SETTINGS_FILE: &str = "host.toml";
const PREF_FOLDER: &str = ".drosse-ui";
const DATABASE_FILE: &str = "drosses.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub bind: String,
    pub database_url: String,
    pub discovery_bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8765".into(),
            database_url: default_database_url(),
            discovery_bind: "0.0.0.0:12345".into(),
        }
    }
}

fn default_database_url() -> String {
    match dirs::home_dir() {
        Some(home) => format!(
            "sqlite://{}",
            home.join(PREF_FOLDER)
                .join(DATABASE_FILE)
                .display()
                .to_string()
                .replace('\\', "/")
        ),
        None => format!("sqlite://./{PREF_FOLDER}/{DATABASE_FILE}"),
    }
}

/// Defaults, overlaid by `host.toml` in the working directory, then by
/// `DROSSE_*` environment variables.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(Path::new(SETTINGS_FILE)) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        tracing::warn!("ignoring unreadable {SETTINGS_FILE}");
        return;
    };
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.bind = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("discovery_addr") {
        settings.discovery_bind = v.clone();
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("DROSSE_HOST_BIND") {
        settings.bind = v;
    }
    if let Some(v) = var("DROSSE_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("DROSSE_DISCOVERY_BIND") {
        settings.discovery_bind = v;
    }
}

/// Turns plain paths into sqlite urls; blank input falls back to the
/// default database.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return default_database_url();
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
