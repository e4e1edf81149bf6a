//! REST object endpoint gateway.
//!
//! Objects are addressed as `{endpoint}/{bucket}/{key}`:
//! - `PUT` stores a zstd-compressed body (`content-encoding: zstd`)
//! - `GET` returns the body, compressed or not
//! - `DELETE` removes it
//! - `GET {endpoint}/{bucket}?prefix=` answers `{"keys": [...]}`

use super::ObjectStorageGateway;
use crate::{BackupError, Result};
use async_compression::tokio::bufread::{ZstdDecoder, ZstdEncoder};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ListResponse {
    keys: Vec<String>,
}

pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: String,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, bucket: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), key.trim_start_matches('/'))
    }

    async fn error_from(resp: reqwest::Response, action: &str, key: &str) -> BackupError {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        BackupError::Storage(format!("{} {} failed: {} - {}", action, key, status, text))
    }
}

#[async_trait]
impl ObjectStorageGateway for HttpObjectStore {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<()> {
        let file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();

        let compressed =
            ZstdEncoder::with_quality(BufReader::new(file), async_compression::Level::Default);
        let body = reqwest::Body::wrap_stream(ReaderStream::new(compressed));

        let resp = self
            .client
            .put(self.object_url(remote_key))
            .bearer_auth(&self.token)
            .header("content-encoding", "zstd")
            .header("content-type", "application/json")
            .header("x-original-size", size.to_string())
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from(resp, "upload", remote_key).await);
        }

        debug!(key = %remote_key, bytes = size, "Uploaded object");
        Ok(())
    }

    async fn download(&self, remote_key: &str, local_path: &Path) -> Result<()> {
        let resp = self
            .client
            .get(self.object_url(remote_key))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(BackupError::NotFound(format!("remote object {}", remote_key)));
        }
        if !resp.status().is_success() {
            return Err(Self::error_from(resp, "download", remote_key).await);
        }

        let compressed = resp
            .headers()
            .get("content-encoding")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("zstd"));

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Land in a sibling file first so an interrupted transfer never looks like a cached copy.
        let partial = local_path.with_extension("part");
        let mut out = tokio::fs::File::create(&partial).await?;

        let stream = Box::pin(resp.bytes_stream().map_err(std::io::Error::other));
        let reader = StreamReader::new(stream);

        let copied = if compressed {
            let decoder = ZstdDecoder::new(reader);
            tokio::pin!(decoder);
            tokio::io::copy(&mut decoder, &mut out).await
        } else {
            tokio::pin!(reader);
            tokio::io::copy(&mut reader, &mut out).await
        };

        match copied {
            Ok(bytes) => {
                out.sync_all().await?;
                drop(out);
                tokio::fs::rename(&partial, local_path).await?;
                debug!(key = %remote_key, bytes, "Downloaded object");
                Ok(())
            }
            Err(e) => {
                drop(out);
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    warn!("Failed to remove partial download {}: {}", partial.display(), rm);
                }
                Err(e.into())
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.bucket_url())
            .bearer_auth(&self.token)
            .query(&[("prefix", prefix)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from(resp, "list", prefix).await);
        }

        let mut keys = resp.json::<ListResponse>().await?.keys;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, remote_key: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.object_url(remote_key))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::error_from(resp, "delete", remote_key).await)
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
