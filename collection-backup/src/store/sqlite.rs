use super::PrimaryDataStore;
use crate::models::Document;
use crate::Result;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite-backed store: every collection lives in one `documents` table,
/// each row holding a document as JSON text.
#[derive(Clone)]
pub struct SqliteDataStore {
    pool: DbPool,
}

impl SqliteDataStore {
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             CREATE TABLE IF NOT EXISTS documents (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 collection TEXT NOT NULL,
                 body TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);",
        )?;

        Ok(Self { pool })
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.pool.get()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[async_trait]
impl PrimaryDataStore for SqliteDataStore {
    async fn list_all(&self, collection: &str) -> Result<Vec<Document>> {
        let pool = self.pool.clone();
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Document>> {
            let conn = pool.get()?;
            let mut stmt =
                conn.prepare("SELECT body FROM documents WHERE collection = ? ORDER BY id")?;
            let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
            let mut documents = Vec::new();
            for body in rows {
                documents.push(serde_json::from_str(&body?)?);
            }
            Ok(documents)
        })
        .await?
    }

    async fn delete_all(&self, collection: &str) -> Result<usize> {
        let pool = self.pool.clone();
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let conn = pool.get()?;
            let changes =
                conn.execute("DELETE FROM documents WHERE collection = ?", params![collection])?;
            Ok(changes)
        })
        .await?
    }

    async fn bulk_insert(&self, collection: &str, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let pool = self.pool.clone();
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare("INSERT INTO documents (collection, body) VALUES (?1, ?2)")?;
                for doc in &documents {
                    stmt.execute(params![collection, serde_json::to_string(doc)?])?;
                }
            }
            tx.commit()?;
            Ok(documents.len())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_list_delete() {
        let dir = TempDir::new().unwrap();
        let store = SqliteDataStore::open(&dir.path().join("db/primary.db"), 2).unwrap();

        let inserted = store
            .bulk_insert(
                "users",
                vec![doc(json!({"name": "ada"})), doc(json!({"name": "grace", "admin": true}))],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        store
            .bulk_insert("orders", vec![doc(json!({"total": 12.5}))])
            .await
            .unwrap();

        let users = store.list_all("users").await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["name"], "ada");
        assert_eq!(users[1]["admin"], true);

        assert_eq!(store.delete_all("users").await.unwrap(), 2);
        assert!(store.list_all("users").await.unwrap().is_empty());
        assert_eq!(store.count("orders").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_insert_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = SqliteDataStore::open(&dir.path().join("primary.db"), 1).unwrap();
        assert_eq!(store.bulk_insert("users", vec![]).await.unwrap(), 0);
        assert_eq!(store.count("users").unwrap(), 0);
    }
}
