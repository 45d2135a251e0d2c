use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "vault.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub poll_max_consecutive_failures: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".into(),
            // Style training holds the request open for the whole run.
            request_timeout_secs: 600,
            poll_interval_ms: 2000,
            poll_max_consecutive_failures: 5,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Applies an explicit base URL override. Blank values are ignored.
    pub fn override_api_base_url(&mut self, raw: &str) {
        if !raw.trim().is_empty() {
            self.api_base_url = normalize_base_url(raw);
        }
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the flat TOML file (if readable), then environment overrides.
pub fn load_settings_from<F>(file: &Path, env: F) -> ClientSettings
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            if let Some(v) = file_cfg.get("api_base_url").and_then(toml::Value::as_str) {
                settings.api_base_url = v.to_string();
            }
            if let Some(v) = file_cfg.get("request_timeout_secs").and_then(as_u64) {
                settings.request_timeout_secs = v;
            }
            if let Some(v) = file_cfg.get("poll_interval_ms").and_then(as_u64) {
                settings.poll_interval_ms = v;
            }
            if let Some(v) = file_cfg
                .get("poll_max_consecutive_failures")
                .and_then(as_u64)
                .and_then(|v| u32::try_from(v).ok())
            {
                settings.poll_max_consecutive_failures = v;
            }
        }
    }

    if let Some(v) = env("VAULT_API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Some(v) = env("APP__POLL_INTERVAL_MS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.poll_interval_ms = parsed;
        }
    }
    if let Some(v) = env("APP__POLL_MAX_CONSECUTIVE_FAILURES") {
        if let Ok(parsed) = v.trim().parse::<u32>() {
            settings.poll_max_consecutive_failures = parsed;
        }
    }

    settings.api_base_url = normalize_base_url(&settings.api_base_url);
    settings
}

fn as_u64(value: &toml::Value) -> Option<u64> {
    match value {
        toml::Value::Integer(v) => u64::try_from(*v).ok(),
        toml::Value::String(v) => v.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return ClientSettings::default().api_base_url;
    }
    trimmed.to_string()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
