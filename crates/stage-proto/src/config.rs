use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::lines::SplitOptions;
use super::platform;
use super::protocol::DEFAULT_CHANNEL_NAME;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub openlp: OpenLpConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub lines: SplitOptions,
}

/// Where the OpenLP remote API lives and how often to poll it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLpConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_name")]
    pub name: String,
    /// Per-subscriber backlog before slow clients start lagging.
    #[serde(default = "default_channel_capacity")]
    pub capacity: usize,
}

impl Default for OpenLpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: default_channel_name(),
            capacity: default_channel_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:4316".to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4317
}

fn default_channel_name() -> String {
    DEFAULT_CHANNEL_NAME.to_string()
}

fn default_channel_capacity() -> usize {
    256
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
