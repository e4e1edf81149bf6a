//! Restore executor - rehydrates collections from a snapshot.
//!
//! Restoring with `delete_existing` is a full replace: every existing
//! document of the collection is removed before the snapshot is inserted.

use crate::locks::CollectionLocks;
use crate::metadata::{check_collection_name, MetadataStore};
use crate::models::{CollectionBackupResult, Document, RestoreOptions, RestoreOutcome};
use crate::remote;
use crate::store::PrimaryDataStore;
use crate::{BackupError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RestoreExecutor {
    store: Arc<dyn PrimaryDataStore>,
    metadata: Arc<MetadataStore>,
    locks: CollectionLocks,
    known_collections: Vec<String>,
}

impl RestoreExecutor {
    pub fn new(
        store: Arc<dyn PrimaryDataStore>,
        metadata: Arc<MetadataStore>,
        locks: CollectionLocks,
        known_collections: Vec<String>,
    ) -> Self {
        Self {
            store,
            metadata,
            locks,
            known_collections,
        }
    }

    /// Restore the requested collections of `backup_id`. Unknown ids fail
    /// with `NotFound` before anything touches the primary store; a failing
    /// collection is reported and the remaining ones still run.
    pub async fn restore(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreOutcome> {
        if self.metadata.get(backup_id).await?.is_none() {
            return Err(BackupError::NotFound(backup_id.to_string()));
        }

        let collections = options
            .collections
            .clone()
            .unwrap_or_else(|| self.known_collections.clone());
        for name in &collections {
            check_collection_name(name)?;
        }

        info!(
            backup_id = %backup_id,
            collections = ?collections,
            delete_existing = options.delete_existing,
            validate = options.validate_data,
            "Starting restore"
        );

        let mut results = Vec::with_capacity(collections.len());
        for name in &collections {
            match self.restore_collection(backup_id, name, options).await {
                Ok(inserted) => {
                    info!(backup_id = %backup_id, collection = %name, records = inserted, "Collection restored");
                    results.push(CollectionBackupResult::succeeded(name, inserted));
                }
                Err(e) => {
                    warn!(backup_id = %backup_id, collection = %name, "Collection restore failed: {}", e);
                    results.push(CollectionBackupResult::failed(name, &e));
                }
            }
        }

        let success = results.iter().all(|r| r.success);
        info!(backup_id = %backup_id, success, "Restore finished");

        Ok(RestoreOutcome {
            backup_id: backup_id.to_string(),
            success,
            results,
        })
    }

    async fn restore_collection(
        &self,
        backup_id: &str,
        collection: &str,
        options: &RestoreOptions,
    ) -> Result<usize> {
        let bytes = self.load_collection(backup_id, collection).await?;
        let documents = parse_documents(&bytes, options.validate_data)?;

        let _guard = self.locks.acquire(collection).await;

        if options.delete_existing {
            let removed = self.store.delete_all(collection).await?;
            info!(backup_id = %backup_id, collection = %collection, removed, "Cleared collection before restore");
        }

        if documents.is_empty() {
            return Ok(0);
        }
        self.store.bulk_insert(collection, documents).await
    }

    /// Read the local copy; when it is missing, fetch it from the gateway and
    /// read once more.
    async fn load_collection(&self, backup_id: &str, collection: &str) -> Result<Vec<u8>> {
        let path = self.metadata.collection_path(backup_id, collection);
        match tokio::fs::read(&path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let remote = self.metadata.remote().ok_or_else(|| {
            BackupError::NotFound(format!("{}.json is not stored locally", collection))
        })?;
        remote
            .download(&remote::collection_key(backup_id, collection), &path)
            .await?;
        info!(backup_id = %backup_id, collection = %collection, gateway = remote.name(), "Hydrated collection from remote");

        Ok(tokio::fs::read(&path).await?)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode a collection file. With `validate` the content must be an array;
/// without it anything else decodes to no documents.
fn parse_documents(bytes: &[u8], validate: bool) -> Result<Vec<Document>> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(BackupError::Validation(format!(
                    "record {} is {}, expected an object",
                    i,
                    json_kind(&other)
                ))),
            })
            .collect(),
        other if validate => Err(BackupError::Validation(format!(
            "expected an array of records, found {}",
            json_kind(&other)
        ))),
        other => {
            warn!("Collection file holds {}, nothing to insert", json_kind(&other));
            Ok(Vec::new())
        }
    }
}
