//! Persisted user configuration.
//!
//! A single flat JSON record per user holds the API key, username, and
//! output directory. Loading layers `SKYFETCH_*` environment variables on
//! top of the file and never fails: a missing or corrupt file yields the
//! empty record. Saving overwrites the whole record; last writer wins and
//! concurrent saves from two sessions are not defined as safe.

use crate::auth::Credentials;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur when persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The persisted configuration record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Provider API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider account username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Directory the imagery query client writes frames into.
    #[serde(default, rename = "output", skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Config {
    /// Overlay explicit per-run credentials on top of the stored values.
    pub fn apply_credentials(&mut self, credentials: &Credentials) {
        self.username = Some(credentials.username.clone());
        self.api_key = Some(credentials.api_key.clone());
    }

    /// Effective username, defaulting to empty when unset.
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }

    /// Effective API key, defaulting to empty when unset.
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }
}

/// Load/save access to the per-user configuration record.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the default per-user location (`~/.skyfetch/config.json`).
    pub fn new() -> Self {
        Self { path: Self::default_path() }
    }

    /// Store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default per-user config file path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".skyfetch")
            .join("config.json")
    }

    /// The path this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, layering `SKYFETCH_*` environment variables over the
    /// file. Absence of the file or of any key is not an error; a corrupt
    /// file is logged and treated as absent.
    pub fn load(&self) -> Config {
        let loaded = config::Config::builder()
            .add_source(
                config::File::from(self.path.clone())
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("SKYFETCH"))
            .build()
            .and_then(|c| c.try_deserialize::<Config>());

        match loaded {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Config unreadable, falling back to defaults"
                );
                Config::default()
            }
        }
    }

    /// Overwrite the full record on disk.
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(config)?)?;
        debug!(path = %self.path.display(), "Config saved");
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("config.json"));

        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn test_load_corrupt_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let store = ConfigStore::at(&path);

        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("nested").join("config.json"));

        let config = Config {
            api_key: Some("key".to_string()),
            username: Some("mapper".to_string()),
            output_dir: Some(PathBuf::from("/tmp/frames")),
        };
        store.save(&config).unwrap();

        assert_eq!(store.load(), config);
    }

    #[test]
    fn test_save_overwrites_in_full() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path().join("config.json"));

        store
            .save(&Config {
                api_key: Some("old".to_string()),
                username: Some("old-user".to_string()),
                output_dir: Some(PathBuf::from("/tmp/old")),
            })
            .unwrap();
        store
            .save(&Config {
                api_key: Some("new".to_string()),
                ..Config::default()
            })
            .unwrap();

        let loaded = store.load();
        assert_eq!(loaded.api_key.as_deref(), Some("new"));
        assert_eq!(loaded.username, None);
        assert_eq!(loaded.output_dir, None);
    }

    #[test]
    fn test_apply_credentials_overrides_stored_values() {
        let mut config = Config {
            api_key: Some("stored-key".to_string()),
            username: Some("stored-user".to_string()),
            output_dir: None,
        };

        config.apply_credentials(&Credentials {
            username: "explicit-user".to_string(),
            api_key: "explicit-key".to_string(),
        });

        assert_eq!(config.username(), "explicit-user");
        assert_eq!(config.api_key(), "explicit-key");
    }
}
