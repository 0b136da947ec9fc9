use std::{fs, time::Duration};

use client_core::{ConnectionConfig, NotifyPolicy};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub search_debounce_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3001".into(),
            search_debounce_ms: 300,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 15_000,
        }
    }
}

impl Settings {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_initial: Duration::from_millis(self.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
            notify_policy: NotifyPolicy::Queue,
        }
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        match toml::from_str::<Settings>(&raw) {
            Ok(file_cfg) => settings = file_cfg,
            Err(err) => warn!(error = %err, "ignoring unreadable client.toml"),
        }
    }

    if let Ok(v) = std::env::var("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_SEARCH_DEBOUNCE_MS") {
        if let Ok(parsed) = v.parse() {
            settings.search_debounce_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("CHAT_RECONNECT_INITIAL_MS") {
        if let Ok(parsed) = v.parse() {
            settings.reconnect_initial_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("CHAT_RECONNECT_MAX_MS") {
        if let Ok(parsed) = v.parse() {
            settings.reconnect_max_ms = parsed;
        }
    }

    settings
}
