//! Persistent user preferences for the feed view.
//!
//! Preferences are read once when a feed view is created and written whenever
//! the user changes a filter. They live in `preferences.toml` next to the
//! configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use crate::toggles::{FilterState, ShowItems};

/// Key for the played-items visibility
pub const SHOW_PLAYED_ITEMS_KEY: &str = "feed_show_played_items";
/// Key for the future-items visibility
pub const SHOW_FUTURE_ITEMS_KEY: &str = "feed_show_future_items";

/// Errors that can occur while reading or writing preferences
#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Invalid value for preference {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Preferences file is malformed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preference store lock poisoned")]
    Poisoned,
}

/// A value that can be stored in the preference store
#[derive(Debug, Clone, PartialEq)]
pub enum PreferenceValue {
    ShowItems(ShowItems),
    Bool(bool),
}

/// Key-value store for user preferences
pub trait PreferenceStore: Send + Sync {
    fn read_show_items(&self, key: &str, default: ShowItems) -> Result<ShowItems, PreferenceError>;

    fn read_bool(&self, key: &str, default: bool) -> Result<bool, PreferenceError>;

    fn write(&self, key: &str, value: PreferenceValue) -> Result<(), PreferenceError>;
}

/// TOML-file preference store; `in_memory` keeps values only in memory
pub struct TomlPreferences {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, toml::Value>>,
}

impl TomlPreferences {
    /// Default preferences file path
    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(crate::config::Config::config_dir()?.join("preferences.toml"))
    }

    /// Load preferences from `path`; a missing file means no stored values
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let values: BTreeMap<String, toml::Value> = toml::from_str(&content)?;
            tracing::info!("Loaded {} preferences from {:?}", values.len(), path);
            values
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    fn get(&self, key: &str) -> Result<Option<toml::Value>, PreferenceError> {
        let values = self.values.lock().map_err(|_| PreferenceError::Poisoned)?;
        Ok(values.get(key).cloned())
    }
}

impl PreferenceStore for TomlPreferences {
    fn read_show_items(&self, key: &str, default: ShowItems) -> Result<ShowItems, PreferenceError> {
        match self.get(key)? {
            None => Ok(default),
            Some(toml::Value::String(s)) => {
                ShowItems::parse(&s).ok_or_else(|| PreferenceError::InvalidValue {
                    key: key.to_string(),
                    value: s,
                })
            }
            Some(other) => Err(PreferenceError::InvalidValue {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }

    fn read_bool(&self, key: &str, default: bool) -> Result<bool, PreferenceError> {
        match self.get(key)? {
            None => Ok(default),
            Some(toml::Value::Boolean(b)) => Ok(b),
            Some(other) => Err(PreferenceError::InvalidValue {
                key: key.to_string(),
                value: other.to_string(),
            }),
        }
    }

    fn write(&self, key: &str, value: PreferenceValue) -> Result<(), PreferenceError> {
        let mut values = self.values.lock().map_err(|_| PreferenceError::Poisoned)?;
        let value = match value {
            PreferenceValue::ShowItems(v) => toml::Value::String(v.as_str().to_string()),
            PreferenceValue::Bool(b) => toml::Value::Boolean(b),
        };
        values.insert(key.to_string(), value);

        if let Some(path) = &self.path {
            let content = toml::to_string_pretty(&*values)?;
            std::fs::write(path, content)?;
            tracing::info!("Saved preference {} to {:?}", key, path);
        }
        Ok(())
    }
}

pub fn items_visibility_from_preferences(
    store: &dyn PreferenceStore,
) -> Result<ShowItems, PreferenceError> {
    store.read_show_items(SHOW_PLAYED_ITEMS_KEY, ShowItems::Default)
}

pub fn show_future_items_from_preferences(store: &dyn PreferenceStore) -> Result<bool, PreferenceError> {
    store.read_bool(SHOW_FUTURE_ITEMS_KEY, true)
}

/// Initial filters for a new feed view
pub fn filters_from_preferences(store: &dyn PreferenceStore) -> Result<FilterState, PreferenceError> {
    Ok(FilterState {
        played_visibility: items_visibility_from_preferences(store)?,
        show_future: show_future_items_from_preferences(store)?,
    })
}

pub fn save_show_played_items(
    store: &dyn PreferenceStore,
    value: ShowItems,
) -> Result<(), PreferenceError> {
    store.write(SHOW_PLAYED_ITEMS_KEY, PreferenceValue::ShowItems(value))
}

pub fn save_show_future_items(store: &dyn PreferenceStore, value: bool) -> Result<(), PreferenceError> {
    store.write(SHOW_FUTURE_ITEMS_KEY, PreferenceValue::Bool(value))
}
