/// Application configuration
///
/// Loaded from a JSON file. Every field has a default, so an empty object
/// (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::sync::SyncSettings;

const APP_DIR: &str = "shelf-sync";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding the capture queue
    pub database_path: PathBuf,
    /// Remote container for uploaded pictures
    pub bucket: String,
    /// Remote table receiving one row per picture
    pub table: String,
    /// First segment of every remote object path
    pub object_prefix: String,
    /// Largest object the remote container accepts (10 MiB)
    pub max_object_bytes: usize,
    /// Root directory of the filesystem backend
    pub remote_root: PathBuf,
    /// Base of public URLs; `file://` URLs are used when unset
    pub public_base_url: Option<String>,
    /// Identity recorded as the uploader of new captures
    pub user_id: Option<String>,
    /// Address probed to decide whether we are online
    pub probe_addr: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: data_dir().join("shelf_sync.db"),
            bucket: "pictures".to_string(),
            table: "pictures".to_string(),
            object_prefix: "stores".to_string(),
            max_object_bytes: 10 * 1024 * 1024,
            remote_root: data_dir().join("remote"),
            public_base_url: None,
            user_id: None,
            probe_addr: "1.1.1.1:443".to_string(),
            probe_interval_secs: 5,
            probe_timeout_ms: 1500,
        }
    }
}

impl Config {
    /// Load the config from `path`, or from the default location when
    /// `path` is `None`. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            bucket: self.bucket.clone(),
            table: self.table.clone(),
            object_prefix: self.object_prefix.clone(),
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Get the directory where application data should be stored
/// - Linux: ~/.local/share/shelf-sync
/// - macOS: ~/Library/Application Support/shelf-sync
/// - Windows: %APPDATA%\shelf-sync
fn data_dir() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}

/// `<config_dir>/shelf-sync/config.json`
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path.push("config.json");
    path
}
