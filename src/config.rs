use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::db::GROUP_ALL_ID;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Feed pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Throttle window for combined source updates, in milliseconds
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Feed group to show (-1 = all subscriptions)
    #[serde(default = "default_group_id")]
    pub group_id: i64,
    /// Give up on a feed list query after this many milliseconds
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            group_id: default_group_id(),
            fetch_timeout_ms: None,
        }
    }
}

impl FeedConfig {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}

fn default_throttle_ms() -> u64 {
    120
}

fn default_group_id() -> i64 {
    GROUP_ALL_ID
}

/// Database location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file (defaults to the data directory)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Get the configuration directory
    pub fn config_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("org", "feedstate", "Feedstate")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        let config_dir = dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config = Self::parse(&content)?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.feed.throttle_ms, 120);
        assert_eq!(config.feed.group_id, GROUP_ALL_ID);
        assert_eq!(config.feed.fetch_timeout(), None);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_partial_feed_section() {
        let config = Config::parse(
            "[feed]\nthrottle_ms = 300\nfetch_timeout_ms = 2000\n\n[database]\npath = \"/tmp/feed.db\"\n",
        )
        .unwrap();
        assert_eq!(config.feed.throttle_window(), Duration::from_millis(300));
        assert_eq!(config.feed.group_id, GROUP_ALL_ID);
        assert_eq!(config.feed.fetch_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/feed.db")));
    }
}
