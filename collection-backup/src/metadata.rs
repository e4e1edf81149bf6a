//! Per-backup metadata persistence and the on-disk layout of a backup.
//!
//! ```text
//! {root}/{backup_id}/metadata.json
//! {root}/{backup_id}/{collection}.json
//! ```
//!
//! `metadata.json` is the sole source of truth for listing, validating and
//! restoring a backup.

use crate::models::{BackupMetadata, BackupSource};
use crate::remote::{self, ObjectStorageGateway};
use crate::{BackupError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stem of the metadata file; no collection may use it.
pub const METADATA_NAME: &str = "metadata";
pub const METADATA_FILE: &str = "metadata.json";

/// Reject anything that is not a single plain path component.
pub fn check_name(kind: &str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(BackupError::Validation(format!("invalid {}: {:?}", kind, name)))
    }
}

/// A collection name is a plain path component that cannot shadow
/// `metadata.json`, locally or under the remote prefix.
pub fn check_collection_name(name: &str) -> Result<()> {
    check_name("collection", name)?;
    if name.eq_ignore_ascii_case(METADATA_NAME) {
        return Err(BackupError::Validation(format!(
            "collection name {:?} is reserved",
            name
        )));
    }
    Ok(())
}

pub struct MetadataStore {
    root: PathBuf,
    remote: Option<Arc<dyn ObjectStorageGateway>>,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>, remote: Option<Arc<dyn ObjectStorageGateway>>) -> Self {
        Self {
            root: root.into(),
            remote,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote(&self) -> Option<&Arc<dyn ObjectStorageGateway>> {
        self.remote.as_ref()
    }

    pub fn backup_dir(&self, backup_id: &str) -> PathBuf {
        self.root.join(backup_id)
    }

    pub fn metadata_path(&self, backup_id: &str) -> PathBuf {
        self.backup_dir(backup_id).join(METADATA_FILE)
    }

    pub fn collection_path(&self, backup_id: &str, collection: &str) -> PathBuf {
        self.backup_dir(backup_id).join(format!("{}.json", collection))
    }

    /// Create the directory of a new backup. Fails if it already exists so
    /// two runs can never share one directory.
    pub async fn create_backup_dir(&self, backup_id: &str) -> Result<PathBuf> {
        check_name("backup id", backup_id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let dir = self.backup_dir(backup_id);
        tokio::fs::create_dir(&dir).await?;
        Ok(dir)
    }

    /// Write `metadata.json` for a backup.
    pub async fn save(&self, metadata: &BackupMetadata) -> Result<PathBuf> {
        check_name("backup id", &metadata.id)?;
        let path = self.metadata_path(&metadata.id);
        let json = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }

    async fn read_local(&self, backup_id: &str) -> Result<BackupMetadata> {
        let bytes = tokio::fs::read(self.metadata_path(backup_id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Metadata of a backup, or `None` if neither local storage nor the
    /// gateway knows it. A local miss hydrates `metadata.json` from the
    /// gateway and reads once more.
    pub async fn get(&self, backup_id: &str) -> Result<Option<BackupMetadata>> {
        check_name("backup id", backup_id)?;

        match self.read_local(backup_id).await {
            Ok(meta) => return Ok(Some(meta)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        let path = self.metadata_path(backup_id);
        match remote.download(&remote::metadata_key(backup_id), &path).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        }
        info!(backup_id = %backup_id, gateway = remote.name(), "Hydrated metadata from remote");

        let mut meta = self.read_local(backup_id).await?;
        if meta.source != BackupSource::Remote {
            meta.source = BackupSource::Remote;
            self.save(&meta).await?;
        }
        Ok(Some(meta))
    }

    /// Every locally known backup, newest first. Directories without
    /// readable metadata are skipped.
    pub async fn list(&self) -> Result<Vec<BackupMetadata>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if check_name("backup id", &id).is_err() {
                continue;
            }
            match self.read_local(&id).await {
                Ok(meta) => all.push(meta),
                Err(e) => warn!(backup_id = %id, "Skipping backup directory: {}", e),
            }
        }

        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(all)
    }

    /// Backup ids that exist on the gateway.
    pub async fn list_remote_ids(&self) -> Result<Vec<String>> {
        match &self.remote {
            Some(remote) => {
                let keys = remote.list(remote::BACKUP_PREFIX).await?;
                Ok(remote::backup_ids_from_keys(&keys))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Local backups plus the ones only the gateway has, newest first.
    pub async fn list_with_remote(&self) -> Result<Vec<BackupMetadata>> {
        let mut all = self.list().await?;
        for id in self.list_remote_ids().await? {
            if all.iter().any(|m| m.id == id) {
                continue;
            }
            match self.get(&id).await {
                Ok(Some(meta)) => all.push(meta),
                Ok(None) => debug!(backup_id = %id, "Remote backup has no metadata object"),
                Err(e) => warn!(backup_id = %id, "Failed to hydrate remote backup: {}", e),
            }
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(all)
    }

    /// Remove a backup's local directory and, when asked, its remote objects.
    /// Returns false when nothing existed anywhere.
    pub async fn delete(&self, backup_id: &str, delete_remote: bool) -> Result<bool> {
        check_name("backup id", backup_id)?;

        let dir = self.backup_dir(backup_id);
        let mut found = match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if delete_remote {
            if let Some(remote) = &self.remote {
                let keys = remote.list(&remote::backup_prefix(backup_id)).await?;
                found |= !keys.is_empty();
                for key in &keys {
                    remote.delete(key).await?;
                }
                debug!(backup_id = %backup_id, objects = keys.len(), "Deleted remote objects");
            }
        }

        if found {
            info!(backup_id = %backup_id, remote = delete_remote, "Deleted backup");
        }
        Ok(found)
    }
}
