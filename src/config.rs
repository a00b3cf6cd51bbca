//! Configuration management for the yardview dashboard

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const VIDEO_URL_ENV: &str = "YARDVIEW_VIDEO_SOCKET_URL";
const LOGS_URL_ENV: &str = "YARDVIEW_LOGS_SOCKET_URL";
const UPLOAD_ENDPOINT_ENV: &str = "YARDVIEW_UPLOAD_ENDPOINT";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Event channel endpoints and reconnect policy
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Upload endpoint configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Log feed presentation
    #[serde(default)]
    pub feed: FeedConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Channel carrying video frames and pipeline events
    #[serde(default = "default_video_url")]
    pub video_url: String,

    /// Channel carrying log snapshots and new log records
    #[serde(default = "default_logs_url")]
    pub logs_url: String,

    /// First reconnect delay (ms), doubled per failed attempt
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_ms: u64,

    /// Upper bound for the reconnect delay (ms)
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Multipart POST target, also serves the GET listing
    #[serde(default = "default_upload_endpoint")]
    pub endpoint: String,

    /// Whole-request timeout in seconds, 0 disables it
    #[serde(default)]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Log rows per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

// Default value functions
fn default_video_url() -> String {
    "ws://localhost:8000/ws/video".to_string()
}

fn default_logs_url() -> String {
    "ws://localhost:8000/ws/logs".to_string()
}

fn default_reconnect_base() -> u64 {
    500
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_upload_endpoint() -> String {
    "http://localhost:3000/api/video".to_string()
}

fn default_page_size() -> usize {
    10
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            video_url: default_video_url(),
            logs_url: default_logs_url(),
            reconnect_base_ms: default_reconnect_base(),
            reconnect_max_ms: default_reconnect_max(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: default_upload_endpoint(),
            request_timeout_secs: 0,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms.max(1))
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config {
                config_path: Some(config_path),
                ..Config::default()
            };
            config.save()?;
            info!("Wrote default configuration to {:?}", config.config_path);
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = match &self.config_path {
            Some(path) => path.clone(),
            None => Self::default_config_path()?,
        };

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Path the configuration was loaded from, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "yardview", "dashboard")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Endpoint overrides from the environment win over the file
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(VIDEO_URL_ENV) {
            self.connection.video_url = url;
        }
        if let Some(url) = lookup(LOGS_URL_ENV) {
            self.connection.logs_url = url;
        }
        if let Some(endpoint) = lookup(UPLOAD_ENDPOINT_ENV) {
            self.upload.endpoint = endpoint;
        }
    }
}
