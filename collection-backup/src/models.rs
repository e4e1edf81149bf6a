//! Data model shared by the executor, restore, validator, retention and scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single record of a collection. The engine never looks inside it.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Partial,
    Failed,
}

impl BackupStatus {
    /// `completed` only when every requested collection succeeded without errors,
    /// `failed` when none did, `partial` otherwise.
    pub fn derive(requested: usize, succeeded: usize, errors: &[String]) -> Self {
        if succeeded == 0 {
            BackupStatus::Failed
        } else if errors.is_empty() && succeeded == requested {
            BackupStatus::Completed
        } else {
            BackupStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Completed => "completed",
            BackupStatus::Partial => "partial",
            BackupStatus::Failed => "failed",
        }
    }
}

/// Where the files of a backup are known to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupSource {
    Local,
    Remote,
    Both,
}

impl BackupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupSource::Local => "local",
            BackupSource::Remote => "remote",
            BackupSource::Both => "both",
        }
    }
}

/// Metadata of one snapshot, serialized as `metadata.json` in the backup directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Collections that were written successfully, in request order.
    pub collections: Vec<String>,
    pub size_bytes: u64,
    pub status: BackupStatus,
    #[serde(default)]
    pub errors: Vec<String>,
    pub source: BackupSource,
}

/// Outcome of backing up or restoring one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionBackupResult {
    pub collection: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectionBackupResult {
    pub fn succeeded(collection: &str, record_count: usize) -> Self {
        Self {
            collection: collection.to_string(),
            success: true,
            record_count: Some(record_count),
            error: None,
        }
    }

    pub fn failed(collection: &str, error: impl ToString) -> Self {
        Self {
            collection: collection.to_string(),
            success: false,
            record_count: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Subset to restore; all known collections when absent.
    #[serde(default)]
    pub collections: Option<Vec<String>>,
    /// Remove every existing document of a collection before inserting.
    #[serde(default = "default_true")]
    pub delete_existing: bool,
    /// Require each collection file to hold a JSON array.
    #[serde(default = "default_true")]
    pub validate_data: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            collections: None,
            delete_existing: true,
            validate_data: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub backup_id: String,
    pub success: bool,
    pub results: Vec<CollectionBackupResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub backup_id: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub collections: BTreeMap<String, CollectionValidation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Backups created more than this many days ago are always pruned.
    #[serde(default = "default_retention_days")]
    pub days: u32,
    /// Upper bound on the number of backups kept inside the age window.
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    /// Also remove the remote objects of pruned backups.
    #[serde(default)]
    pub delete_remote: bool,
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_count() -> usize {
    10
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            max_count: default_max_count(),
            delete_remote: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Five-field cron expression: minute hour day-of-month month day-of-week.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub collections: Option<Vec<String>>,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

fn default_schedule() -> String {
    "0 2 * * *".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_schedule(),
            collections: None,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Partial update applied by `BackupScheduler::update_config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfigUpdate {
    pub enabled: Option<bool>,
    pub schedule: Option<String>,
    pub collections: Option<Option<Vec<String>>>,
    pub retention: Option<RetentionPolicy>,
}

impl SchedulerConfig {
    pub fn merge(&mut self, update: SchedulerConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(schedule) = update.schedule {
            self.schedule = schedule;
        }
        if let Some(collections) = update.collections {
            self.collections = collections;
        }
        if let Some(retention) = update.retention {
            self.retention = retention;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub total_backups: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    pub total_size_bytes: u64,
    pub latest: Option<String>,
    pub oldest: Option<String>,
    pub known_collections: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        assert_eq!(BackupStatus::derive(2, 2, &[]), BackupStatus::Completed);
        assert_eq!(
            BackupStatus::derive(2, 1, &["b: boom".to_string()]),
            BackupStatus::Partial
        );
        assert_eq!(
            BackupStatus::derive(2, 0, &["a: x".to_string(), "b: y".to_string()]),
            BackupStatus::Failed
        );
        // an error with every collection written still is not a clean run
        assert_eq!(
            BackupStatus::derive(1, 1, &["metadata upload".to_string()]),
            BackupStatus::Partial
        );
    }

    #[test]
    fn test_restore_options_defaults_from_empty_body() {
        let opts: RestoreOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, RestoreOptions::default());
        assert!(opts.delete_existing);
        assert!(opts.validate_data);
    }

    #[test]
    fn test_scheduler_config_merge() {
        let mut cfg = SchedulerConfig::default();
        cfg.merge(SchedulerConfigUpdate {
            enabled: Some(true),
            schedule: Some("30 4 * * 1".to_string()),
            collections: Some(Some(vec!["users".to_string()])),
            retention: None,
        });
        assert!(cfg.enabled);
        assert_eq!(cfg.schedule, "30 4 * * 1");
        assert_eq!(cfg.collections, Some(vec!["users".to_string()]));
        assert_eq!(cfg.retention, RetentionPolicy::default());
    }

    #[test]
    fn test_metadata_serialization_uses_lowercase_enums() {
        let meta = BackupMetadata {
            id: "backup-2024-01-01T00-00-00-abcdef01".to_string(),
            created_at: Utc::now(),
            collections: vec!["users".to_string()],
            size_bytes: 42,
            status: BackupStatus::Completed,
            errors: vec![],
            source: BackupSource::Both,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["source"], "both");
    }
}
