use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub typing_debounce: Duration,
    pub event_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3001".into(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            typing_debounce: Duration::from_millis(1200),
            event_buffer: 1024,
        }
    }
}

impl ClientSettings {
    /// Websocket endpoint derived from the http(s) server url.
    pub fn websocket_url(&self) -> Result<String> {
        let base = self.server_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(anyhow!("server_url must start with http:// or https://"));
        };
        Ok(format!("{ws_base}/socket"))
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new("client.toml"), |key| std::env::var(key).ok())
}

/// Defaults, then the optional settings file, then environment overrides.
pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        if let Ok(file_cfg) = toml::from_str::<toml::Table>(&raw) {
            apply_overrides(&mut settings, |key| {
                file_cfg.get(key).map(|value| match value {
                    toml::Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
            });
        }
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    apply_overrides(&mut settings, |key| env(&format!("APP__{}", key.to_uppercase())));

    settings
}

fn apply_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("reconnect_attempts").and_then(|v| v.parse::<u32>().ok()) {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = lookup("reconnect_delay_ms").and_then(|v| v.parse::<u64>().ok()) {
        settings.reconnect_delay = Duration::from_millis(v);
    }
    if let Some(v) = lookup("typing_debounce_ms").and_then(|v| v.parse::<u64>().ok()) {
        settings.typing_debounce = Duration::from_millis(v);
    }
    if let Some(v) = lookup("event_buffer").and_then(|v| v.parse::<usize>().ok()) {
        // broadcast channels panic on zero capacity
        settings.event_buffer = v.max(1);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
