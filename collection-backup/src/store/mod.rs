//! Primary data store the collections are snapshotted from and restored into.

pub mod sqlite;

use crate::models::Document;
use crate::Result;
use async_trait::async_trait;

pub use sqlite::SqliteDataStore;

/// Read / replace documents per collection.
#[async_trait]
pub trait PrimaryDataStore: Send + Sync {
    /// Every document of a collection, in insertion order
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Remove every document of a collection, returning how many were removed
    async fn delete_all(&self, collection: &str) -> Result<usize>;

    /// Insert documents in one batch, returning how many were inserted
    async fn bulk_insert(&self, collection: &str, documents: Vec<Document>) -> Result<usize>;
}
