//! Collection backup executor - snapshots collections to local and remote storage.
//!
//! Each requested collection runs its own pipeline concurrently with the
//! others:
//! - read every document from the primary store
//! - serialize to `{backup_dir}/{collection}.json`
//! - upload to `backups/{id}/{collection}.json` when a gateway is configured
//!
//! A failure in one pipeline is recorded against that collection and never
//! stops the others. Only a failure to create the backup directory or to
//! persist the metadata fails the whole run.

use crate::locks::CollectionLocks;
use crate::metadata::{check_collection_name, MetadataStore};
use crate::models::{BackupMetadata, BackupSource, BackupStatus, CollectionBackupResult};
use crate::remote;
use crate::store::PrimaryDataStore;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// `backup-YYYY-MM-DDTHH-MM-SS-xxxxxxxx`. Sorts chronologically to the second;
/// the random suffix keeps two runs in the same second apart.
pub fn generate_backup_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("backup-{}-{}", now.format("%Y-%m-%dT%H-%M-%S"), &suffix[..8])
}

/// Metadata of a run plus the per-collection outcomes behind it
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub metadata: BackupMetadata,
    pub results: Vec<CollectionBackupResult>,
}

struct CollectionWrite {
    records: usize,
    bytes: u64,
}

pub struct BackupExecutor {
    store: Arc<dyn PrimaryDataStore>,
    metadata: Arc<MetadataStore>,
    locks: CollectionLocks,
}

impl BackupExecutor {
    pub fn new(
        store: Arc<dyn PrimaryDataStore>,
        metadata: Arc<MetadataStore>,
        locks: CollectionLocks,
    ) -> Self {
        Self {
            store,
            metadata,
            locks,
        }
    }

    pub async fn create_backup(&self, collections: &[String]) -> BackupMetadata {
        self.execute(collections).await.metadata
    }

    /// Run one backup over `collections`.
    pub async fn execute(&self, collections: &[String]) -> BackupReport {
        let start_time = Instant::now();
        let created_at = Utc::now();
        let backup_id = generate_backup_id(created_at);

        info!(backup_id = %backup_id, collections = ?collections, "Starting backup");

        if let Err(e) = self.metadata.create_backup_dir(&backup_id).await {
            error!(backup_id = %backup_id, "Failed to create backup directory: {}", e);
            return catastrophic(
                backup_id,
                created_at,
                collections,
                format!("backup directory: {}", e),
            );
        }

        let mut handles = Vec::with_capacity(collections.len());
        for name in collections {
            let store = Arc::clone(&self.store);
            let metadata = Arc::clone(&self.metadata);
            let locks = self.locks.clone();
            let id = backup_id.clone();
            let collection = name.clone();

            let handle = tokio::spawn(async move {
                backup_collection(store.as_ref(), &metadata, &locks, &id, &collection).await
            });
            handles.push((name.clone(), handle));
        }

        let mut succeeded = Vec::new();
        let mut errors = Vec::new();
        let mut results = Vec::with_capacity(handles.len());
        let mut size_bytes = 0u64;

        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(write) => {
                    info!(
                        backup_id = %backup_id,
                        collection = %name,
                        records = write.records,
                        bytes = write.bytes,
                        "Collection backed up"
                    );
                    size_bytes += write.bytes;
                    succeeded.push(name.clone());
                    results.push(CollectionBackupResult::succeeded(&name, write.records));
                }
                Err(e) => {
                    warn!(backup_id = %backup_id, collection = %name, "Collection backup failed: {}", e);
                    errors.push(format!("{}: {}", name, e));
                    results.push(CollectionBackupResult::failed(&name, &e));
                }
            }
        }

        let remote = self.metadata.remote().cloned();
        let mut metadata = BackupMetadata {
            id: backup_id.clone(),
            created_at,
            status: BackupStatus::derive(collections.len(), succeeded.len(), &errors),
            collections: succeeded,
            size_bytes,
            errors,
            source: if remote.is_some() {
                BackupSource::Both
            } else {
                BackupSource::Local
            },
        };

        let metadata_path = match self.metadata.save(&metadata).await {
            Ok(path) => path,
            Err(e) => {
                error!(backup_id = %backup_id, "Failed to persist metadata: {}", e);
                // Without metadata the directory is invisible to listing and retention.
                match self.metadata.delete(&backup_id, true).await {
                    Ok(_) => info!(backup_id = %backup_id, "Discarded unrecorded backup"),
                    Err(e) => warn!(backup_id = %backup_id, "Failed to discard unrecorded backup: {}", e),
                }
                let mut report = catastrophic(
                    backup_id,
                    created_at,
                    collections,
                    format!("metadata: {}", e),
                );
                report.metadata.errors = metadata
                    .errors
                    .into_iter()
                    .chain(report.metadata.errors)
                    .collect();
                report.results = results;
                return report;
            }
        };

        if let Some(remote) = remote {
            if let Err(e) = remote
                .upload(&metadata_path, &remote::metadata_key(&backup_id))
                .await
            {
                warn!(backup_id = %backup_id, "Failed to upload metadata, keeping backup local only: {}", e);
                metadata.source = BackupSource::Local;
                if let Err(e) = self.metadata.save(&metadata).await {
                    warn!(backup_id = %backup_id, "Failed to rewrite metadata source: {}", e);
                }
            }
        }

        info!(
            backup_id = %backup_id,
            status = metadata.status.as_str(),
            collections = metadata.collections.len(),
            failed = metadata.errors.len(),
            bytes = metadata.size_bytes,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Backup finished"
        );

        BackupReport { metadata, results }
    }
}

/// Read, serialize, write and upload one collection. The collection lock is
/// held only while reading so the snapshot never sees a half-applied restore.
async fn backup_collection(
    store: &dyn PrimaryDataStore,
    metadata: &MetadataStore,
    locks: &CollectionLocks,
    backup_id: &str,
    collection: &str,
) -> Result<CollectionWrite> {
    check_collection_name(collection)?;

    let documents = {
        let _guard = locks.acquire(collection).await;
        store.list_all(collection).await?
    };
    let records = documents.len();

    let path = metadata.collection_path(backup_id, collection);
    let json = serde_json::to_vec_pretty(&documents)?;
    drop(documents);
    tokio::fs::write(&path, &json).await?;
    let bytes = tokio::fs::metadata(&path).await?.len();

    if let Some(remote) = metadata.remote() {
        remote
            .upload(&path, &remote::collection_key(backup_id, collection))
            .await?;
    }

    Ok(CollectionWrite { records, bytes })
}

/// A run that could not be recorded: nothing in it counts as backed up.
fn catastrophic(
    backup_id: String,
    created_at: DateTime<Utc>,
    collections: &[String],
    cause: String,
) -> BackupReport {
    BackupReport {
        metadata: BackupMetadata {
            id: backup_id,
            created_at,
            collections: Vec::new(),
            size_bytes: 0,
            status: BackupStatus::Failed,
            errors: vec![cause.clone()],
            source: BackupSource::Local,
        },
        results: collections
            .iter()
            .map(|c| CollectionBackupResult::failed(c, &cause))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ObjectStorageGateway;
    use crate::testing::{doc, names, FlakyGateway, MemoryDataStore};
    use serde_json::json;
    use tempfile::TempDir;

    fn executor(
        store: MemoryDataStore,
        root: &std::path::Path,
        remote: Option<Arc<dyn ObjectStorageGateway>>,
    ) -> (BackupExecutor, Arc<MetadataStore>) {
        let metadata = Arc::new(MetadataStore::new(root, remote));
        let exec = BackupExecutor::new(Arc::new(store), metadata.clone(), CollectionLocks::new());
        (exec, metadata)
    }

    #[test]
    fn test_backup_id_format_and_order() {
        let earlier = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let later = "2024-05-01T10:00:01Z".parse::<DateTime<Utc>>().unwrap();

        let a = generate_backup_id(earlier);
        let b = generate_backup_id(earlier);
        let c = generate_backup_id(later);

        assert!(a.starts_with("backup-2024-05-01T10-00-00-"));
        assert_eq!(a.len(), "backup-2024-05-01T10-00-00-".len() + 8);
        assert_ne!(a, b);
        assert!(a < c && b < c);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_collections() {
        let dir = TempDir::new().unwrap();
        let store = MemoryDataStore::new()
            .with_docs("a", vec![doc(json!({"n": 1})), doc(json!({"n": 2}))])
            .fail_reads("b");
        let (exec, metadata) = executor(store, dir.path(), None);

        let report = exec.execute(&names(&["a", "b"])).await;
        let meta = report.metadata;

        assert_eq!(meta.status, BackupStatus::Partial);
        assert_eq!(meta.collections, vec!["a"]);
        assert_eq!(meta.errors.len(), 1);
        assert!(meta.errors[0].starts_with("b: "), "{}", meta.errors[0]);
        assert!(meta.size_bytes > 0);
        assert_eq!(meta.source, BackupSource::Local);

        assert_eq!(report.results[0], CollectionBackupResult::succeeded("a", 2));
        assert!(!report.results[1].success);

        let stored = metadata.get(&meta.id).await.unwrap().unwrap();
        assert_eq!(stored, meta);
        let written: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(metadata.collection_path(&meta.id, "a")).unwrap())
                .unwrap();
        assert_eq!(written.len(), 2);
    }

    #[tokio::test]
    async fn test_local_write_failure_keeps_other_collections() {
        let dir = TempDir::new().unwrap();
        let store = MemoryDataStore::new()
            .with_docs("a", vec![doc(json!({"n": 1})), doc(json!({"n": 2}))])
            .with_docs("b", vec![doc(json!({"n": 3}))])
            .obstruct_on_read("b", dir.path(), "b.json");
        let (exec, metadata) = executor(store, dir.path(), None);

        let report = exec.execute(&names(&["a", "b"])).await;
        let meta = report.metadata;

        assert_eq!(meta.status, BackupStatus::Partial);
        assert_eq!(meta.collections, vec!["a"]);
        assert_eq!(meta.errors.len(), 1);
        assert!(meta.errors[0].starts_with("b: "), "{}", meta.errors[0]);
        assert!(meta.size_bytes > 0);
        assert_eq!(metadata.get(&meta.id).await.unwrap().unwrap(), meta);
    }

    #[tokio::test]
    async fn test_unsafe_collection_names_fail_alone() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("backups");
        let store = MemoryDataStore::new()
            .with_docs("a", vec![doc(json!({"n": 1}))])
            .with_docs("../../escaped", vec![doc(json!({"n": 2}))])
            .with_docs("metadata", vec![doc(json!({"n": 3}))]);
        let (exec, metadata) = executor(store, &root, None);

        let meta = exec
            .create_backup(&names(&["a", "../../escaped", "metadata"]))
            .await;

        assert_eq!(meta.status, BackupStatus::Partial);
        assert_eq!(meta.collections, vec!["a"]);
        assert_eq!(meta.errors.len(), 2);
        assert!(!dir.path().join("escaped.json").exists());
        // metadata.json still holds the backup record, not documents
        assert_eq!(metadata.get(&meta.id).await.unwrap().unwrap(), meta);
    }

    #[tokio::test]
    async fn test_metadata_write_failure_discards_backup() {
        let dir = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let root = dir.path().join("backups");
        std::fs::create_dir_all(&root).unwrap();
        let remote: Arc<dyn ObjectStorageGateway> = Arc::new(FlakyGateway::new(bucket.path()));
        let store = MemoryDataStore::new()
            .with_docs("a", vec![doc(json!({"n": 1}))])
            .obstruct_on_read("a", &root, "metadata.json");
        let (exec, metadata) = executor(store, &root, Some(remote.clone()));

        let report = exec.execute(&names(&["a"])).await;
        let meta = report.metadata;

        assert_eq!(meta.status, BackupStatus::Failed);
        assert!(meta.collections.is_empty());
        assert!(meta.errors.iter().any(|e| e.starts_with("metadata: ")));
        assert!(!metadata.backup_dir(&meta.id).exists());
        assert!(remote
            .list(&remote::backup_prefix(&meta.id))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_completed_backup_uploads_everything() {
        let dir = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let remote: Arc<dyn ObjectStorageGateway> = Arc::new(FlakyGateway::new(bucket.path()));
        let store = MemoryDataStore::new()
            .with_docs("users", vec![doc(json!({"name": "ada"}))])
            .with_docs("orders", vec![]);
        let (exec, _metadata) = executor(store, dir.path(), Some(remote.clone()));

        let meta = exec.create_backup(&names(&["users", "orders"])).await;

        assert_eq!(meta.status, BackupStatus::Completed);
        assert_eq!(meta.collections, vec!["users", "orders"]);
        assert!(meta.errors.is_empty());
        assert_eq!(meta.source, BackupSource::Both);

        let keys = remote.list(&remote::backup_prefix(&meta.id)).await.unwrap();
        assert_eq!(
            keys,
            vec![
                remote::metadata_key(&meta.id),
                remote::collection_key(&meta.id, "orders"),
                remote::collection_key(&meta.id, "users"),
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_fails_only_that_collection() {
        let dir = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let remote: Arc<dyn ObjectStorageGateway> =
            Arc::new(FlakyGateway::new(bucket.path()).refuse_uploads_containing("/orders.json"));
        let store = MemoryDataStore::new()
            .with_docs("users", vec![doc(json!({"name": "ada"}))])
            .with_docs("orders", vec![doc(json!({"total": 3}))]);
        let (exec, _metadata) = executor(store, dir.path(), Some(remote));

        let meta = exec.create_backup(&names(&["users", "orders"])).await;

        assert_eq!(meta.status, BackupStatus::Partial);
        assert_eq!(meta.collections, vec!["users"]);
        assert!(meta.errors[0].starts_with("orders: "));
        assert_eq!(meta.source, BackupSource::Both);
    }

    #[tokio::test]
    async fn test_metadata_upload_failure_marks_local() {
        let dir = TempDir::new().unwrap();
        let bucket = TempDir::new().unwrap();
        let remote: Arc<dyn ObjectStorageGateway> =
            Arc::new(FlakyGateway::new(bucket.path()).refuse_uploads_containing("metadata.json"));
        let store = MemoryDataStore::new().with_docs("users", vec![doc(json!({"name": "ada"}))]);
        let (exec, metadata) = executor(store, dir.path(), Some(remote));

        let meta = exec.create_backup(&names(&["users"])).await;

        assert_eq!(meta.status, BackupStatus::Completed);
        assert_eq!(meta.source, BackupSource::Local);
        let stored = metadata.get(&meta.id).await.unwrap().unwrap();
        assert_eq!(stored.source, BackupSource::Local);
    }

    #[tokio::test]
    async fn test_all_collections_failing_is_failed() {
        let dir = TempDir::new().unwrap();
        let store = MemoryDataStore::new().fail_reads("a").fail_reads("b");
        let (exec, _metadata) = executor(store, dir.path(), None);

        let meta = exec.create_backup(&names(&["a", "b"])).await;

        assert_eq!(meta.status, BackupStatus::Failed);
        assert!(meta.collections.is_empty());
        assert_eq!(meta.errors.len(), 2);
        assert_eq!(meta.size_bytes, 0);
    }

    #[tokio::test]
    async fn test_unwritable_root_is_catastrophic() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"occupied").unwrap();
        let store = MemoryDataStore::new().with_docs("a", vec![doc(json!({"n": 1}))]);
        let (exec, _metadata) = executor(store, &root, None);

        let report = exec.execute(&names(&["a"])).await;

        assert_eq!(report.metadata.status, BackupStatus::Failed);
        assert!(report.metadata.collections.is_empty());
        assert!(report.metadata.errors[0].starts_with("backup directory: "));
        assert!(report.results.iter().all(|r| !r.success));
    }
}
