//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file; every section has defaults so a
//! partial file is enough.

use crate::metadata::check_collection_name;
use crate::models::SchedulerConfig;
use crate::utils::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per backup
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// The fixed set of collections a backup covers by default
    #[serde(default = "default_collections")]
    pub collections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file of the primary data store
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// No secondary destination, backups stay local
    None,
    /// A directory used as a bucket
    Filesystem,
    /// REST object endpoint
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_kind")]
    pub kind: RemoteKind,

    /// Bucket directory for the filesystem gateway
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Base URL of the object endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub bucket: Option<String>,

    /// Bearer token sent with every request
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_storage_root() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_collections() -> Vec<String> {
    ["users", "products", "orders", "settings"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/primary.db")
}

fn default_pool_size() -> u32 {
    4
}

fn default_remote_kind() -> RemoteKind {
    RemoteKind::None
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            collections: default_collections(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: default_remote_kind(),
            directory: None,
            endpoint: None,
            bucket: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            remote: RemoteConfig::default(),
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| BackupError::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parts the engine cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.storage.collections.is_empty() {
            return Err(BackupError::Configuration(
                "storage.collections must name at least one collection".into(),
            ));
        }
        for name in &self.storage.collections {
            check_collection_name(name).map_err(|e| {
                BackupError::Configuration(format!("storage.collections: {}", e))
            })?;
        }

        match self.remote.kind {
            RemoteKind::None => {}
            RemoteKind::Filesystem => {
                if self.remote.directory.is_none() {
                    return Err(BackupError::Configuration(
                        "remote.directory is required for the filesystem gateway".into(),
                    ));
                }
            }
            RemoteKind::Http => {
                let missing: Vec<&str> = [
                    ("remote.endpoint", &self.remote.endpoint),
                    ("remote.bucket", &self.remote.bucket),
                    ("remote.token", &self.remote.token),
                ]
                .iter()
                .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
                .map(|(k, _)| *k)
                .collect();
                if !missing.is_empty() {
                    return Err(BackupError::Configuration(format!(
                        "missing object storage credentials: {}",
                        missing.join(", ")
                    )));
                }
            }
        }

        Ok(())
    }

    /// Location of the persisted scheduler settings
    pub fn scheduler_state_path(&self) -> PathBuf {
        self.storage.root.join("scheduler.json")
    }
}
