//! Backup service - the surface the CLI and the HTTP server drive.

use crate::config::Config;
use crate::executor::{BackupExecutor, BackupReport};
use crate::locks::CollectionLocks;
use crate::metadata::{check_collection_name, MetadataStore};
use crate::models::{
    BackupMetadata, BackupStatus, BackupSummary, RestoreOptions, RestoreOutcome,
    RetentionPolicy, ValidationReport,
};
use crate::remote::{self, ObjectStorageGateway};
use crate::restore::RestoreExecutor;
use crate::retention::RetentionManager;
use crate::store::{PrimaryDataStore, SqliteDataStore};
use crate::validator::BackupValidator;
use crate::{BackupError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct BackupService {
    metadata: Arc<MetadataStore>,
    executor: BackupExecutor,
    restorer: RestoreExecutor,
    validator: BackupValidator,
    retention: RetentionManager,
    known_collections: Vec<String>,
}

impl BackupService {
    pub fn new(
        store: Arc<dyn PrimaryDataStore>,
        storage_root: impl Into<PathBuf>,
        remote: Option<Arc<dyn ObjectStorageGateway>>,
        known_collections: Vec<String>,
    ) -> Self {
        let metadata = Arc::new(MetadataStore::new(storage_root, remote));
        let locks = CollectionLocks::new();

        Self {
            executor: BackupExecutor::new(store.clone(), metadata.clone(), locks.clone()),
            restorer: RestoreExecutor::new(
                store,
                metadata.clone(),
                locks,
                known_collections.clone(),
            ),
            validator: BackupValidator::new(metadata.clone(), known_collections.clone()),
            retention: RetentionManager::new(metadata.clone()),
            metadata,
            known_collections,
        }
    }

    /// Open the SQLite store and the configured gateway.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let store = SqliteDataStore::open(&config.database.path, config.database.pool_size)?;
        let remote = remote::from_config(&config.remote)?;
        info!(
            root = %config.storage.root.display(),
            database = %config.database.path.display(),
            remote = remote.as_ref().map(|r| r.name()).unwrap_or("none"),
            collections = ?config.storage.collections,
            "Backup service ready"
        );

        Ok(Self::new(
            Arc::new(store),
            config.storage.root.clone(),
            remote,
            config.storage.collections.clone(),
        ))
    }

    pub fn known_collections(&self) -> &[String] {
        &self.known_collections
    }

    pub fn metadata_store(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Check a requested subset against the known set. `None` selects all;
    /// duplicates are dropped keeping the first occurrence. Every resolved
    /// name must also be usable as a file name inside a backup.
    pub fn resolve_collections(&self, requested: Option<Vec<String>>) -> Result<Vec<String>> {
        let resolved = match requested {
            None => self.known_collections.clone(),
            Some(requested) => {
                if requested.is_empty() {
                    return Err(BackupError::Validation("no collections requested".to_string()));
                }

                let unknown: Vec<&str> = requested
                    .iter()
                    .filter(|name| !self.known_collections.contains(name))
                    .map(String::as_str)
                    .collect();
                if !unknown.is_empty() {
                    return Err(BackupError::Validation(format!(
                        "unknown collection(s): {}",
                        unknown.join(", ")
                    )));
                }

                let mut resolved: Vec<String> = Vec::with_capacity(requested.len());
                for name in requested {
                    if !resolved.contains(&name) {
                        resolved.push(name);
                    }
                }
                resolved
            }
        };

        for name in &resolved {
            check_collection_name(name)?;
        }
        Ok(resolved)
    }

    /// Snapshot the requested collections. Collection-level failures are in
    /// the report; only a bad request is an `Err`.
    pub async fn create_backup(&self, collections: Option<Vec<String>>) -> Result<BackupReport> {
        let collections = self.resolve_collections(collections)?;
        Ok(self.executor.execute(&collections).await)
    }

    pub async fn list(&self, limit: Option<usize>, include_remote: bool) -> Result<Vec<BackupMetadata>> {
        let mut all = if include_remote {
            self.metadata.list_with_remote().await?
        } else {
            self.metadata.list().await?
        };
        if let Some(limit) = limit {
            all.truncate(limit);
        }
        Ok(all)
    }

    pub async fn get(&self, backup_id: &str) -> Result<BackupMetadata> {
        self.metadata
            .get(backup_id)
            .await?
            .ok_or_else(|| BackupError::NotFound(backup_id.to_string()))
    }

    pub async fn validate(&self, backup_id: &str) -> Result<ValidationReport> {
        self.validator.validate(backup_id).await
    }

    pub async fn restore(&self, backup_id: &str, options: RestoreOptions) -> Result<RestoreOutcome> {
        if let Some(requested) = &options.collections {
            self.resolve_collections(Some(requested.clone()))?;
        }
        self.restorer.restore(backup_id, &options).await
    }

    pub async fn delete(&self, backup_id: &str, delete_remote: bool) -> Result<()> {
        if !self.metadata.delete(backup_id, delete_remote).await? {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }
        info!(backup_id = %backup_id, delete_remote, "Backup deleted");
        Ok(())
    }

    /// Apply `policy` to the local backups. Returns the deleted ids.
    pub async fn prune(&self, policy: &RetentionPolicy) -> Result<Vec<String>> {
        let all = self.metadata.list().await?;
        Ok(self.retention.prune(&all, policy).await)
    }

    pub async fn summary(&self) -> Result<BackupSummary> {
        let all = self.metadata.list().await?;
        let count = |status: BackupStatus| all.iter().filter(|m| m.status == status).count();

        Ok(BackupSummary {
            total_backups: all.len(),
            completed: count(BackupStatus::Completed),
            partial: count(BackupStatus::Partial),
            failed: count(BackupStatus::Failed),
            total_size_bytes: all.iter().map(|m| m.size_bytes).sum(),
            latest: all.first().map(|m| m.id.clone()),
            oldest: all.last().map(|m| m.id.clone()),
            known_collections: self.known_collections.clone(),
        })
    }
}
