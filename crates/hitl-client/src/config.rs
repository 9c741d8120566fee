use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::channel::ChannelOptions;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub channel: ChannelSettings,
    #[serde(default)]
    pub approvals: ApprovalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerConfig {
    /// WebSocket URL of the agent backend (e.g. ws://localhost:8000/ws)
    pub url: Option<String>,
    /// Appended as a `token` query parameter when set
    pub token: Option<String>,
}

/// Timing overrides; anything unset falls back to the channel defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelSettings {
    pub heartbeat_secs: Option<u64>,
    pub base_reconnect_delay_ms: Option<u64>,
    pub max_reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ApprovalSettings {
    /// Start with the bundled example request in the queue
    #[serde(default)]
    pub seed_example: bool,
}

impl ConsoleConfig {
    /// Load config from `~/.hitl-console/config.toml` and the environment.
    /// Environment variables take precedence over the file.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Like [`ConsoleConfig::load`] but reading the file at `path`.
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ConsoleConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Override fields from `HITL_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("HITL_SERVER_URL") {
            self.server.url = Some(url);
        }
        if let Some(token) = lookup("HITL_TOKEN") {
            self.server.token = Some(token);
        }
        if let Some(secs) = lookup("HITL_HEARTBEAT_SECS") {
            self.channel.heartbeat_secs = Some(parse_number("HITL_HEARTBEAT_SECS", &secs)?);
        }
        if let Some(ms) = lookup("HITL_MAX_RECONNECT_DELAY_MS") {
            self.channel.max_reconnect_delay_ms =
                Some(parse_number("HITL_MAX_RECONNECT_DELAY_MS", &ms)?);
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".hitl-console/config.toml")
    }

    /// URL to connect to, with the token folded into the query string.
    pub fn server_url(&self) -> anyhow::Result<String> {
        let raw = self
            .server
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("server URL not configured"))?;

        let mut url = Url::parse(raw).map_err(|e| anyhow::anyhow!("invalid server URL `{raw}`: {e}"))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            anyhow::bail!("server URL must use ws:// or wss://, got `{}`", url.scheme());
        }
        if let Some(token) = &self.server.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.to_string())
    }

    pub fn channel_options(&self) -> ChannelOptions {
        let defaults = ChannelOptions::default();
        ChannelOptions {
            base_reconnect_delay: self
                .channel
                .base_reconnect_delay_ms
                .map_or(defaults.base_reconnect_delay, Duration::from_millis),
            max_reconnect_delay: self
                .channel
                .max_reconnect_delay_ms
                .map_or(defaults.max_reconnect_delay, Duration::from_millis),
            heartbeat_interval: self
                .channel
                .heartbeat_secs
                .filter(|secs| *secs > 0)
                .map_or(defaults.heartbeat_interval, Duration::from_secs),
        }
    }
}

fn parse_number(name: &str, value: &str) -> anyhow::Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{name} must be a whole number, got `{value}`: {e}"))
}
