//! Object storage: local filesystem or HTTP PUT.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use storytree_core::services::{ObjectStorage, ServiceError};
use tokio::fs;

/// Reject keys that would escape the storage root.
fn check_key(key: &str) -> Result<(), ServiceError> {
    let path = Path::new(key);
    let escapes = key.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(ServiceError::NotConfigured(format!("invalid object key: {key}")));
    }
    Ok(())
}

/// Stores objects under a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base: String,
}

impl LocalObjectStorage {
    /// Objects are written under `root` and served from `public_base`.
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create storage from STORAGE_DIR (default `storytree-media`) and
    /// STORAGE_PUBLIC_URL (default a `file://` URL of the directory).
    pub fn from_env() -> Self {
        let root = std::env::var("STORAGE_DIR").unwrap_or_else(|_| "storytree-media".to_string());
        let public_base = std::env::var("STORAGE_PUBLIC_URL").unwrap_or_else(|_| {
            let absolute = std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or_else(|_| PathBuf::from(&root));
            format!("file://{}", absolute.display())
        });
        Self::new(root, public_base)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, ServiceError> {
        check_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::Network(format!("{}: {e}", parent.display())))?;
        }
        fs::write(&path, &bytes)
            .await
            .map_err(|e| ServiceError::Network(format!("{}: {e}", path.display())))?;

        tracing::debug!(key, bytes = bytes.len(), "object stored");
        Ok(format!("{}/{key}", self.public_base))
    }
}

/// Uploads objects with `PUT {base}/{key}`.
#[derive(Clone)]
pub struct HttpObjectStorage {
    client: reqwest::Client,
    upload_base: String,
    public_base: String,
    api_key: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(upload_base: impl Into<String>) -> Self {
        let upload_base = upload_base.into().trim_end_matches('/').to_string();
        Self {
            client: crate::http_client(Duration::from_secs(60)),
            public_base: upload_base.clone(),
            upload_base,
            api_key: None,
        }
    }

    /// Create storage from STORAGE_UPLOAD_URL, with STORAGE_API_KEY and
    /// STORAGE_PUBLIC_URL optional.
    pub fn from_env() -> Result<Self, ServiceError> {
        let upload_base = std::env::var("STORAGE_UPLOAD_URL")
            .map_err(|_| ServiceError::NotConfigured("STORAGE_UPLOAD_URL".to_string()))?;
        let mut storage = Self::new(upload_base);
        if let Ok(key) = std::env::var("STORAGE_API_KEY") {
            storage = storage.with_api_key(key);
        }
        if let Ok(public_base) = std::env::var("STORAGE_PUBLIC_URL") {
            storage = storage.with_public_base(public_base);
        }
        Ok(storage)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Serve objects from a different base than the upload endpoint.
    pub fn with_public_base(mut self, public_base: impl Into<String>) -> Self {
        self.public_base = public_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ServiceError> {
        check_key(key)?;
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| ServiceError::NotConfigured(format!("Invalid content type: {e}")))?;

        let mut request = self
            .client
            .put(format!("{}/{key}", self.upload_base))
            .header(CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(api_key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {api_key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status,
                message: body,
            });
        }

        Ok(format!("{}/{key}", self.public_base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_upload_writes_file() {
        let dir = tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path(), "https://cdn.test/media/");

        let url = storage
            .upload("stories/s1/n1.mp3", b"ID3".to_vec(), "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.test/media/stories/s1/n1.mp3");

        let written = std::fs::read(dir.path().join("stories/s1/n1.mp3")).unwrap();
        assert_eq!(written, b"ID3");
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let dir = tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path(), "file:///media");
        for key in ["../etc/passwd", "/abs/path", "", "a/../../b"] {
            assert!(storage.upload(key, vec![1], "audio/mpeg").await.is_err(), "{key}");
        }
    }

    #[test]
    fn test_http_storage_bases() {
        let storage = HttpObjectStorage::new("https://bucket.test/upload/")
            .with_public_base("https://cdn.test/");
        assert_eq!(storage.upload_base, "https://bucket.test/upload");
        assert_eq!(storage.public_base, "https://cdn.test");
    }
}
