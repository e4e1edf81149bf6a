//! Directory-as-bucket gateway, for a mounted share or a synced folder.

use super::ObjectStorageGateway;
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BackupError::Validation(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorageGateway for FsObjectStore {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()> {
        let dest = self.object_path(remote_key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &dest).await?;
        tracing::debug!(key = %remote_key, "Stored object");
        Ok(())
    }

    async fn download(&self, remote_key: &str, local_path: &Path) -> Result<()> {
        let src = self.object_path(remote_key)?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&src, local_path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackupError::NotFound(format!("remote object {}", remote_key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut keys = Vec::new();
            if !root.is_dir() {
                return Ok(keys);
            }

            for entry in WalkDir::new(&root).min_depth(1) {
                let entry = entry.map_err(std::io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await?
    }

    async fn delete(&self, remote_key: &str) -> Result<()> {
        let path = self.object_path(remote_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // Drop the per-backup directory once it is empty; a non-empty one stays.
        if let Some(parent) = path.parent() {
            if parent != self.root {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}
