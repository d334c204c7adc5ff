//! Object store client.
//!
//! Opaque upload/delete operations against path-addressed blob storage.
//! Objects are written once under a caller-supplied folder with a generated
//! unique name and served from a public CDN base URL; the rest of the system
//! only ever sees the returned durable URL.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::StorageConfig;
use crate::{Error, Result};

/// Build a unique object key under a folder, keeping the original extension.
pub fn unique_key(folder: &str, original_filename: &str) -> String {
    let ext = Path::new(original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{}/{}{}", folder.trim_matches('/'), uuid::Uuid::new_v4(), ext)
}

/// Object store operations used by the upload ingress and the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload an in-memory body and return its public URL.
    async fn put_bytes(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String>;

    /// Upload a file from disk (streamed) and return its public URL.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String>;

    /// Delete an object by key. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Public URL an object is served from.
    fn public_url(&self, key: &str) -> String;
}

/// HTTP object store against an S3-compatible endpoint.
pub struct HttpObjectStore {
    client: reqwest::Client,
    config: StorageConfig,
}

impl HttpObjectStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_bytes(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String> {
        let response = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::storage(format!(
                "upload of '{}' failed with status {}",
                key,
                response.status()
            )));
        }

        debug!(key, "Object uploaded");
        Ok(self.public_url(key))
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::storage(format!(
                "upload of '{}' failed with status {}",
                key,
                response.status()
            )));
        }

        debug!(key, bytes = len, "Object uploaded");
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.client.delete(self.object_url(key)).send().await?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::storage(format!(
                "delete of '{}' failed with status {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.cdn_url.trim_end_matches('/'), key)
    }
}

/// In-memory object store for tests and local development.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: dashmap::DashMap<String, Bytes>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_bytes(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<String> {
        self.objects.insert(key.to_string(), bytes);
        Ok(self.public_url(key))
    }

    async fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        self.objects.insert(key.to_string(), Bytes::from(bytes));
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
