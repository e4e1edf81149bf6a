//! Durable object storage used as the secondary backup destination.

pub mod fs;
pub mod http;

use crate::config::{RemoteConfig, RemoteKind};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use self::fs::FsObjectStore;
pub use self::http::HttpObjectStore;

/// Prefix under which every backup object lives
pub const BACKUP_PREFIX: &str = "backups/";

/// Upload / download named blobs.
#[async_trait]
pub trait ObjectStorageGateway: Send + Sync {
    /// Store the file at `local_path` under `remote_key`
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()>;

    /// Fetch `remote_key` into `local_path`, creating parent directories.
    /// A missing object is reported as `BackupError::NotFound`.
    async fn download(&self, remote_key: &str, local_path: &Path) -> Result<()>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove one object. Removing a missing object is not an error.
    async fn delete(&self, remote_key: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

pub fn backup_prefix(backup_id: &str) -> String {
    format!("{}{}/", BACKUP_PREFIX, backup_id)
}

pub fn collection_key(backup_id: &str, collection: &str) -> String {
    format!("{}{}.json", backup_prefix(backup_id), collection)
}

pub fn metadata_key(backup_id: &str) -> String {
    format!("{}{}", backup_prefix(backup_id), crate::metadata::METADATA_FILE)
}

/// Backup ids that own at least one object in `keys`.
pub fn backup_ids_from_keys(keys: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = keys
        .iter()
        .filter_map(|k| k.strip_prefix(BACKUP_PREFIX))
        .filter_map(|rest| rest.split_once('/').map(|(id, _)| id.to_string()))
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Build the gateway described by the `[remote]` section, if any.
pub fn from_config(config: &RemoteConfig) -> Result<Option<Arc<dyn ObjectStorageGateway>>> {
    match config.kind {
        RemoteKind::None => Ok(None),
        RemoteKind::Filesystem => {
            let dir = config.directory.clone().ok_or_else(|| {
                BackupError::Configuration("remote.directory is required".into())
            })?;
            Ok(Some(Arc::new(FsObjectStore::new(dir))))
        }
        RemoteKind::Http => {
            let (Some(endpoint), Some(bucket), Some(token)) =
                (&config.endpoint, &config.bucket, &config.token)
            else {
                return Err(BackupError::Configuration(
                    "remote.endpoint, remote.bucket and remote.token are required".into(),
                ));
            };
            let store = HttpObjectStore::new(
                endpoint,
                bucket,
                token,
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Some(Arc::new(store)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_scheme() {
        let id = "backup-2024-03-01T02-00-00-1a2b3c4d";
        assert_eq!(
            collection_key(id, "users"),
            "backups/backup-2024-03-01T02-00-00-1a2b3c4d/users.json"
        );
        assert_eq!(
            metadata_key(id),
            "backups/backup-2024-03-01T02-00-00-1a2b3c4d/metadata.json"
        );
    }

    #[test]
    fn test_backup_ids_from_keys() {
        let keys = vec![
            "backups/b-2/users.json".to_string(),
            "backups/b-1/metadata.json".to_string(),
            "backups/b-2/metadata.json".to_string(),
            "other/b-3/metadata.json".to_string(),
            "backups/stray.json".to_string(),
        ];
        assert_eq!(backup_ids_from_keys(&keys), vec!["b-1", "b-2"]);
    }
}
