//! Per-collection mutual exclusion shared by backup and restore, so a restore
//! never interleaves with a snapshot of the same collection.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct CollectionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `collection`. Released on drop.
    pub async fn acquire(&self, collection: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn is_locked(&self, collection: &str) -> bool {
        let Some(lock) = self.locks.get(collection).map(|l| l.value().clone()) else {
            return false;
        };
        let locked = lock.try_lock().is_err();
        locked
    }
}
