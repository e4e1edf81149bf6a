//! Age and count based pruning of backups.

use crate::metadata::MetadataStore;
use crate::models::{BackupMetadata, RetentionPolicy};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Ids to prune, oldest first: everything created before `now - days`, plus
/// the oldest of the remaining backups beyond `max_count`.
pub fn select_for_deletion(
    all: &[BackupMetadata],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut sorted: Vec<&BackupMetadata> = all.iter().collect();
    sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    // A window reaching past the representable calendar has no age cutoff.
    let cutoff = Duration::try_days(i64::from(policy.days)).and_then(|d| now.checked_sub_signed(d));
    let (too_old, kept): (Vec<&BackupMetadata>, Vec<&BackupMetadata>) = sorted
        .into_iter()
        .partition(|m| cutoff.is_some_and(|cutoff| m.created_at < cutoff));

    let overflow = kept.len().saturating_sub(policy.max_count);

    let mut seen = HashSet::new();
    too_old
        .iter()
        .chain(kept.iter().take(overflow))
        .filter(|m| seen.insert(m.id.as_str()))
        .map(|m| m.id.clone())
        .collect()
}

pub struct RetentionManager {
    metadata: Arc<MetadataStore>,
}

impl RetentionManager {
    pub fn new(metadata: Arc<MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Delete what `policy` selects out of `all`. A backup that fails to
    /// delete is logged and skipped. Returns the ids actually deleted.
    pub async fn prune(&self, all: &[BackupMetadata], policy: &RetentionPolicy) -> Vec<String> {
        let candidates = select_for_deletion(all, policy, Utc::now());
        if candidates.is_empty() {
            info!(total = all.len(), "Retention: nothing to prune");
            return Vec::new();
        }

        let mut deleted = Vec::with_capacity(candidates.len());
        for id in candidates {
            match self.metadata.delete(&id, policy.delete_remote).await {
                Ok(_) => deleted.push(id),
                Err(e) => warn!(backup_id = %id, "Retention: failed to delete backup: {}", e),
            }
        }

        info!(
            total = all.len(),
            deleted = deleted.len(),
            days = policy.days,
            max_count = policy.max_count,
            "Retention pass finished"
        );
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupSource, BackupStatus};
    use tempfile::TempDir;

    fn aged(id: &str, now: DateTime<Utc>, age_days: i64) -> BackupMetadata {
        BackupMetadata {
            id: id.to_string(),
            created_at: now - Duration::days(age_days),
            collections: vec!["users".to_string()],
            size_bytes: 1,
            status: BackupStatus::Completed,
            errors: vec![],
            source: BackupSource::Local,
        }
    }

    fn policy(days: u32, max_count: usize) -> RetentionPolicy {
        RetentionPolicy {
            days,
            max_count,
            delete_remote: false,
        }
    }

    #[test]
    fn test_age_cutoff() {
        let now = Utc::now();
        let all = vec![aged("d1", now, 1), aged("d40", now, 40), aged("d41", now, 41)];

        let selected = select_for_deletion(&all, &policy(30, 10), now);

        assert_eq!(selected, vec!["d41", "d40"]);
    }

    #[test]
    fn test_count_cap_keeps_most_recent() {
        let now = Utc::now();
        let all: Vec<BackupMetadata> = (1..=5).map(|d| aged(&format!("d{d}"), now, d)).collect();

        let selected = select_for_deletion(&all, &policy(30, 3), now);

        assert_eq!(selected, vec!["d5", "d4"]);
        let kept: Vec<&str> = all
            .iter()
            .map(|m| m.id.as_str())
            .filter(|id| !selected.iter().any(|s| s == id))
            .collect();
        assert_eq!(kept, vec!["d1", "d2", "d3"]);
    }

    #[test]
    fn test_age_wins_over_generous_cap() {
        let now = Utc::now();
        let all = vec![aged("fresh", now, 0), aged("ancient", now, 400)];
        assert_eq!(select_for_deletion(&all, &policy(7, 100), now), vec!["ancient"]);
    }

    #[test]
    fn test_age_and_count_combined() {
        let now = Utc::now();
        let all = vec![
            aged("d1", now, 1),
            aged("d2", now, 2),
            aged("d3", now, 3),
            aged("d60", now, 60),
        ];
        assert_eq!(
            select_for_deletion(&all, &policy(30, 2), now),
            vec!["d60", "d3"]
        );
        assert!(select_for_deletion(&all[..2], &policy(30, 2), now).is_empty());
    }

    #[test]
    fn test_huge_age_window_only_applies_the_cap() {
        let now = Utc::now();
        let all = vec![aged("a", now, 1), aged("b", now, 4000), aged("c", now, 9000)];

        assert!(select_for_deletion(&all, &policy(200_000_000, 10), now).is_empty());
        assert_eq!(
            select_for_deletion(&all, &policy(u32::MAX, 1), now),
            vec!["c", "b"]
        );
    }

    #[test]
    fn test_zero_cap_selects_everything() {
        let now = Utc::now();
        let all = vec![aged("a", now, 1), aged("b", now, 2)];
        assert_eq!(select_for_deletion(&all, &policy(30, 0), now), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_prune_continues_past_failures() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(MetadataStore::new(dir.path(), None));
        let now = Utc::now();

        let old = aged("backup-old", now, 90);
        let recent = aged("backup-recent", now, 1);
        for m in [&old, &recent] {
            metadata.create_backup_dir(&m.id).await.unwrap();
            metadata.save(m).await.unwrap();
        }
        // an id the metadata store refuses to touch
        let broken = aged("../escape", now, 100);

        let manager = RetentionManager::new(metadata.clone());
        let all = vec![broken, old, recent];
        let deleted = manager.prune(&all, &policy(30, 10)).await;

        assert_eq!(deleted, vec!["backup-old"]);
        let remaining: Vec<String> = metadata.list().await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(remaining, vec!["backup-recent"]);
    }
}
