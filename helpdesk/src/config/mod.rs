use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;

use crate::error::HelpdeskError;
use crate::types::OutboundSettings;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    /// System transport, used for alerts and as fallback sender
    #[serde(default)]
    pub mail: SystemMailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    /// Public URL of the helpdesk; its host is used in generated Message-IDs
    #[serde(default = "default_app_url")]
    pub url: String,

    /// Secret used to derive the key for mailbox passwords at rest
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to the platform data dir
    pub path: Option<PathBuf>,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts before a job is dead-lettered
    #[serde(default = "default_tries")]
    pub tries: u32,

    /// Hard limit for one attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay before a failed job becomes available again
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// How long idle workers wait before polling the table again
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_interval_secs")]
    pub interval_secs: u64,

    /// Connection timeout for IMAP servers
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Limit for each IMAP command once connected
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Bounces per conversation inside the window before users stop being notified
    #[serde(default = "default_bounce_limit")]
    pub bounce_limit: u32,

    #[serde(default = "default_bounce_window_minutes")]
    pub bounce_window_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMailConfig {
    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default = "default_from_name")]
    pub from_name: String,

    #[serde(default)]
    pub transport: OutboundSettings,
}

fn default_app_url() -> String {
    "http://localhost".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_workers() -> usize {
    2
}

fn default_tries() -> u32 {
    168
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_fetch_interval_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_command_timeout_secs() -> u64 {
    60
}

fn default_bounce_limit() -> u32 {
    5
}

fn default_bounce_window_minutes() -> i64 {
    60
}

fn default_from_address() -> String {
    "helpdesk@localhost".to_string()
}

fn default_from_name() -> String {
    "Helpdesk".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            url: default_app_url(),
            key: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: default_pool_size(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tries: default_tries(),
            timeout_secs: default_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_fetch_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            bounce_limit: default_bounce_limit(),
            bounce_window_minutes: default_bounce_window_minutes(),
        }
    }
}

impl Default for SystemMailConfig {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            from_name: default_from_name(),
            transport: OutboundSettings::default(),
        }
    }
}

impl AppConfig {
    /// Host part of the app URL, used as Message-ID domain.
    pub fn app_domain(&self) -> String {
        url::Url::parse(&self.app.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.timeout_secs)
    }

    pub fn database_path(&self) -> Result<PathBuf, HelpdeskError> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        dirs::data_local_dir()
            .map(|d| d.join("helpdesk").join("helpdesk.db"))
            .ok_or_else(|| HelpdeskError::Config("Failed to determine data directory".to_string()))
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("helpdesk").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("helpdesk").join("config.toml"));
        paths.push(home_dir.join(".helpdesk.rc"));
    }

    paths
}

/// Initialize configuration from default paths
pub fn init_config() -> Result<(), HelpdeskError> {
    info!("Initializing configuration from default paths");

    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return init_config_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    set_config(AppConfig::default())
}

/// Initialize configuration from a specific path
pub fn init_config_from_path(path: &Path) -> Result<(), HelpdeskError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| HelpdeskError::Config(format!("Failed to read config: {}", e)))?;

    set_config(parse_config(&content)?)
}

pub fn parse_config(content: &str) -> Result<AppConfig, HelpdeskError> {
    toml::from_str(content)
        .map_err(|e| HelpdeskError::Config(format!("Failed to parse config: {}", e)))
}

/// Set the global configuration
fn set_config(config: AppConfig) -> Result<(), HelpdeskError> {
    match CONFIG.get() {
        Some(lock) => {
            let mut guard = lock
                .write()
                .map_err(|e| HelpdeskError::Config(format!("Failed to lock config: {}", e)))?;
            *guard = config;
        }
        None => {
            CONFIG.set(RwLock::new(config)).ok();
        }
    }
    Ok(())
}

/// Snapshot of the global configuration
pub fn get_config() -> Result<AppConfig, HelpdeskError> {
    let lock = CONFIG
        .get()
        .ok_or_else(|| HelpdeskError::Config("Configuration not initialized".to_string()))?;
    let guard = lock
        .read()
        .map_err(|e| HelpdeskError::Config(format!("Failed to lock config: {}", e)))?;
    Ok(guard.clone())
}

/// Check if configuration is initialized
pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}
