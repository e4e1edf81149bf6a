//! Test doubles for the external collaborators.

use crate::models::Document;
use crate::remote::{FsObjectStore, ObjectStorageGateway};
use crate::store::PrimaryDataStore;
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().expect("document must be a JSON object")
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
pub struct MemoryDataStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    obstructions: Mutex<Vec<Obstruction>>,
    writes: AtomicUsize,
}

/// A directory planted inside every backup directory under `root` when
/// `collection` is read, so a later file write to `entry` fails.
struct Obstruction {
    collection: String,
    root: PathBuf,
    entry: String,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_docs(self, collection: &str, docs: Vec<Document>) -> Self {
        self.collections
            .lock()
            .unwrap()
            .insert(collection.to_string(), docs);
        self
    }

    pub fn fail_reads(self, collection: &str) -> Self {
        self.failing_reads.lock().unwrap().insert(collection.to_string());
        self
    }

    pub fn fail_writes(self, collection: &str) -> Self {
        self.failing_writes.lock().unwrap().insert(collection.to_string());
        self
    }

    /// On reading `collection`, turn `{root}/{backup}/{entry}` into a
    /// directory for every backup present.
    pub fn obstruct_on_read(self, collection: &str, root: &Path, entry: &str) -> Self {
        self.obstructions.lock().unwrap().push(Obstruction {
            collection: collection.to_string(),
            root: root.to_path_buf(),
            entry: entry.to_string(),
        });
        self
    }

    fn plant_obstructions(&self, collection: &str) {
        for o in self.obstructions.lock().unwrap().iter() {
            if o.collection != collection {
                continue;
            }
            for dir in std::fs::read_dir(&o.root).unwrap() {
                let dir = dir.unwrap().path();
                if dir.is_dir() {
                    std::fs::create_dir_all(dir.join(&o.entry)).unwrap();
                }
            }
        }
    }

    pub fn docs(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_write(&self, collection: &str) -> Result<()> {
        if self.failing_writes.lock().unwrap().contains(collection) {
            return Err(BackupError::Storage(format!("write to {} refused", collection)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl PrimaryDataStore for MemoryDataStore {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>> {
        if self.failing_reads.lock().unwrap().contains(collection) {
            return Err(BackupError::Storage("connection reset".to_string()));
        }
        self.plant_obstructions(collection);
        Ok(self.docs(collection))
    }

    async fn delete_all(&self, collection: &str) -> Result<usize> {
        self.check_write(collection)?;
        let removed = self
            .collections
            .lock()
            .unwrap()
            .remove(collection)
            .map(|d| d.len())
            .unwrap_or(0);
        Ok(removed)
    }

    async fn bulk_insert(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        self.check_write(collection)?;
        let n = documents.len();
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        Ok(n)
    }
}

/// Directory-backed gateway that refuses uploads whose key contains one of
/// the given fragments and counts downloads.
pub struct FlakyGateway {
    inner: FsObjectStore,
    refuse_uploads: Vec<String>,
    downloads: AtomicUsize,
}

impl FlakyGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: FsObjectStore::new(root),
            refuse_uploads: Vec::new(),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn refuse_uploads_containing(mut self, fragment: &str) -> Self {
        self.refuse_uploads.push(fragment.to_string());
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorageGateway for FlakyGateway {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()> {
        if self.refuse_uploads.iter().any(|f| remote_key.contains(f.as_str())) {
            return Err(BackupError::Storage(format!("upload of {} rejected", remote_key)));
        }
        self.inner.upload(local_path, remote_key).await
    }

    async fn download(&self, remote_key: &str, local_path: &Path) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.inner.download(remote_key, local_path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, remote_key: &str) -> Result<()> {
        self.inner.delete(remote_key).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}
