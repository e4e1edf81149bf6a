//! Structural integrity check of a stored backup. Records are never inspected
//! beyond "the file is a JSON array".

use crate::metadata::{check_collection_name, check_name, MetadataStore};
use crate::models::{BackupMetadata, CollectionValidation, ValidationReport};
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub struct BackupValidator {
    metadata: Arc<MetadataStore>,
    known_collections: Vec<String>,
}

impl BackupValidator {
    pub fn new(metadata: Arc<MetadataStore>, known_collections: Vec<String>) -> Self {
        Self {
            metadata,
            known_collections,
        }
    }

    /// Check the backup directory, its metadata and one file per known
    /// collection. Reads only; running it twice gives the same report.
    pub async fn validate(&self, backup_id: &str) -> Result<ValidationReport> {
        check_name("backup id", backup_id)?;

        let mut errors = Vec::new();

        let dir = self.metadata.backup_dir(backup_id);
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            errors.push(format!("backup directory {} does not exist", dir.display()));
        }

        match tokio::fs::read(self.metadata.metadata_path(backup_id)).await {
            Ok(bytes) => {
                if let Err(e) = serde_json::from_slice::<BackupMetadata>(&bytes) {
                    errors.push(format!("metadata file is invalid: {}", e));
                }
            }
            Err(e) => errors.push(format!("metadata file unreadable: {}", e)),
        }

        let mut collections = BTreeMap::new();
        for name in &self.known_collections {
            let entry = self.check_collection(backup_id, name).await;
            collections.insert(name.clone(), entry);
        }

        let valid = errors.is_empty() && collections.values().all(|c| c.valid);
        info!(backup_id = %backup_id, valid, errors = errors.len(), "Backup validated");

        Ok(ValidationReport {
            backup_id: backup_id.to_string(),
            valid,
            errors,
            collections,
        })
    }

    async fn check_collection(&self, backup_id: &str, collection: &str) -> CollectionValidation {
        let invalid = |error: String| CollectionValidation {
            valid: false,
            record_count: None,
            error: Some(error),
        };

        if let Err(e) = check_collection_name(collection) {
            return invalid(e.to_string());
        }

        let path = self.metadata.collection_path(backup_id, collection);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return invalid("file not found".to_string())
            }
            Err(e) => return invalid(format!("unreadable: {}", e)),
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Array(items)) => CollectionValidation {
                valid: true,
                record_count: Some(items.len()),
                error: None,
            },
            Ok(_) => invalid("content is not an array of records".to_string()),
            Err(e) => invalid(format!("invalid JSON: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BackupExecutor;
    use crate::locks::CollectionLocks;
    use crate::testing::{doc, names, MemoryDataStore};
    use serde_json::json;
    use tempfile::TempDir;

    async fn backup_all(root: &std::path::Path) -> (Arc<MetadataStore>, String) {
        let store = MemoryDataStore::new()
            .with_docs("users", vec![doc(json!({"n": 1})), doc(json!({"n": 2}))])
            .with_docs("orders", vec![doc(json!({"total": 1}))])
            .with_docs("settings", vec![]);
        let metadata = Arc::new(MetadataStore::new(root, None));
        let exec = BackupExecutor::new(Arc::new(store), metadata.clone(), CollectionLocks::new());
        let meta = exec
            .create_backup(&names(&["users", "orders", "settings"]))
            .await;
        (metadata, meta.id)
    }

    #[tokio::test]
    async fn test_intact_backup_is_valid_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let (metadata, id) = backup_all(dir.path()).await;
        let validator = BackupValidator::new(metadata, names(&["users", "orders", "settings"]));

        let first = validator.validate(&id).await.unwrap();
        let second = validator.validate(&id).await.unwrap();

        assert!(first.valid, "{:?}", first);
        assert!(first.errors.is_empty());
        assert_eq!(first.collections["users"].record_count, Some(2));
        assert_eq!(first.collections["settings"].record_count, Some(0));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_corrupted_collection_is_reported_alone() {
        let dir = TempDir::new().unwrap();
        let (metadata, id) = backup_all(dir.path()).await;
        std::fs::write(metadata.collection_path(&id, "orders"), b"[{\"total\": ").unwrap();
        let validator = BackupValidator::new(metadata, names(&["users", "orders", "settings"]));

        let report = validator.validate(&id).await.unwrap();

        assert!(!report.valid);
        assert!(report.errors.is_empty());
        assert!(!report.collections["orders"].valid);
        assert!(report.collections["users"].valid);
        assert!(report.collections["settings"].valid);
    }

    #[tokio::test]
    async fn test_known_collection_missing_from_backup() {
        let dir = TempDir::new().unwrap();
        let (metadata, id) = backup_all(dir.path()).await;
        let validator = BackupValidator::new(metadata, names(&["users", "orders", "settings", "products"]));

        let report = validator.validate(&id).await.unwrap();

        assert!(!report.valid);
        assert_eq!(
            report.collections["products"].error.as_deref(),
            Some("file not found")
        );
    }

    #[tokio::test]
    async fn test_missing_backup_and_bad_metadata() {
        let dir = TempDir::new().unwrap();
        let (metadata, id) = backup_all(dir.path()).await;
        std::fs::write(metadata.metadata_path(&id), b"{}").unwrap();
        let validator = BackupValidator::new(metadata, names(&["users"]));

        let report = validator.validate(&id).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("metadata file is invalid"));

        let report = validator.validate("backup-none").await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.collections["users"].valid);
    }
}
