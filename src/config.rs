use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::FeedError;
use crate::feed::FeedConfig;
use crate::feed::coordinator::DEFAULT_PAGE_SIZE;
use crate::network::DEFAULT_LIVE_BUFFER;
use crate::storage::ensure_parent_dir;

pub const DEFAULT_CONFIG_PATH: &str = "config/feed.json";
pub const DEFAULT_DATABASE_PATH: &str = "data/messages.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    /// Messages per backward fetch.
    pub page_size: usize,
    /// Newest messages re-sent to every new live subscription.
    pub replay_tail: usize,
    /// Live batches buffered per subscriber before it counts as lagging.
    pub live_buffer: usize,
    /// Bucket used to build file download links.
    pub storage_bucket: String,
    pub sender_id: String,
    pub display_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            replay_tail: 0,
            live_buffer: DEFAULT_LIVE_BUFFER,
            storage_bucket: String::new(),
            sender_id: "local".to_string(),
            display_name: "anonymous".to_string(),
        }
    }
}

impl AppConfig {
    pub fn feed_config(&self) -> Result<FeedConfig, FeedError> {
        FeedConfig::new(self.page_size)
    }
}

/// Reads the feed config at `path`. A missing or malformed file is not an
/// error: the client starts with defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> AppConfig {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            log::info!("No feed config at {} ({err}); using defaults", path.display());
            return AppConfig::default();
        }
    };
    match serde_json::from_str::<AppConfig>(&content) {
        Ok(config) => {
            log::debug!(
                "Loaded feed config from {}: page size {}, log {}",
                path.display(),
                config.page_size,
                config.database_path
            );
            config
        }
        Err(err) => {
            log::warn!("Ignoring malformed feed config {}: {err}", path.display());
            AppConfig::default()
        }
    }
}

pub fn save_config<P: AsRef<Path>>(path: P, config: &AppConfig) -> std::io::Result<()> {
    ensure_parent_dir(&path)?;
    fs::write(path, serde_json::to_string_pretty(config)?)
}
