//! Blob storage for result grids and previews.
//!
//! Every backend goes through `object_store`, so local directories, MinIO and
//! S3 behave the same; the in-memory backend is used by tests and by runs
//! that only want the catalog rows.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use eco_common::{EcoError, EcoResult};

/// Byte storage keyed by slash-separated paths.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> EcoResult<()>;

    /// Fails with `StorageError` when the key is absent.
    async fn get(&self, key: &str) -> EcoResult<Bytes>;

    async fn exists(&self, key: &str) -> EcoResult<bool>;

    async fn delete(&self, key: &str) -> EcoResult<()>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> EcoResult<Vec<String>>;
}

/// S3-compatible bucket (AWS or MinIO).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Needed for plain-http MinIO endpoints
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "eco-indices".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            allow_http: true,
        }
    }
}

/// Where blobs live.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Local {
        root: PathBuf,
    },
    S3(S3Config),
}

/// [`BlobStore`] over any `object_store` backend.
pub struct ObjectStorage {
    inner: Arc<dyn ObjectStore>,
    /// Bucket or directory, recorded on spans
    location: String,
}

impl fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("location", &self.location)
            .finish()
    }
}

fn storage_error(action: &str, key: &str) -> impl FnOnce(object_store::Error) -> EcoError {
    let context = format!("{} {}", action, key);
    move |e| EcoError::StorageError(format!("{}: {}", context, e))
}

impl ObjectStorage {
    pub fn new(backend: &StorageBackend) -> EcoResult<Self> {
        match backend {
            StorageBackend::Memory => Ok(Self::memory()),
            StorageBackend::Local { root } => Self::local(root.clone()),
            StorageBackend::S3(config) => Self::s3(config),
        }
    }

    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            location: "memory".to_string(),
        }
    }

    /// Directory-backed storage; `root` is created when missing.
    pub fn local(root: PathBuf) -> EcoResult<Self> {
        let location = root.display().to_string();
        std::fs::create_dir_all(&root)
            .map_err(|e| EcoError::StorageError(format!("create {}: {}", location, e)))?;
        let fs = LocalFileSystem::new_with_prefix(&root).map_err(storage_error("open", &location))?;
        Ok(Self {
            inner: Arc::new(fs),
            location,
        })
    }

    pub fn s3(config: &S3Config) -> EcoResult<Self> {
        let bucket = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_region(&config.region)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_allow_http(config.allow_http)
            .build()
            .map_err(storage_error("connect to bucket", &config.bucket))?;
        Ok(Self {
            inner: Arc::new(bucket),
            location: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl BlobStore for ObjectStorage {
    #[instrument(skip(self, data), fields(location = %self.location, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> EcoResult<()> {
        self.inner
            .put(&Path::from(key), data.into())
            .await
            .map_err(storage_error("write", key))?;
        debug!("Stored blob");
        Ok(())
    }

    #[instrument(skip(self), fields(location = %self.location))]
    async fn get(&self, key: &str) -> EcoResult<Bytes> {
        let body = self
            .inner
            .get(&Path::from(key))
            .await
            .map_err(storage_error("read", key))?;
        body.bytes().await.map_err(storage_error("read body of", key))
    }

    async fn exists(&self, key: &str) -> EcoResult<bool> {
        match self.inner.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(storage_error("stat", key)(e)),
        }
    }

    async fn delete(&self, key: &str) -> EcoResult<()> {
        self.inner
            .delete(&Path::from(key))
            .await
            .map_err(storage_error("delete", key))
    }

    async fn list(&self, prefix: &str) -> EcoResult<Vec<String>> {
        let prefix = Path::from(prefix);
        let mut keys: Vec<String> = self
            .inner
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(storage_error("list", prefix.as_ref()))?;
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_put_get() {
        let storage = ObjectStorage::memory();
        storage
            .put("indices/a/b/ndvi.tif", Bytes::from_static(b"grid"))
            .await
            .unwrap();
        assert!(storage.exists("indices/a/b/ndvi.tif").await.unwrap());
        assert!(!storage.exists("indices/a/b/ndvi.png").await.unwrap());
        assert_eq!(
            storage.get("indices/a/b/ndvi.tif").await.unwrap(),
            Bytes::from_static(b"grid")
        );
        assert_eq!(
            storage.list("indices/a").await.unwrap(),
            vec!["indices/a/b/ndvi.tif".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_blob_is_storage_error() {
        let storage = ObjectStorage::memory();
        let err = storage.get("nope").await.unwrap_err();
        assert!(matches!(err, EcoError::StorageError(ref m) if m.starts_with("read nope")));
    }

    #[test]
    fn test_backend_config() {
        let backend: StorageBackend =
            serde_json::from_str(r#"{"local": {"root": "/data/eco"}}"#).unwrap();
        assert_eq!(
            backend,
            StorageBackend::Local {
                root: PathBuf::from("/data/eco")
            }
        );
        let s3: StorageBackend =
            serde_json::from_str(r#"{"s3": {"bucket": "scenes", "allow_http": false}}"#).unwrap();
        match s3 {
            StorageBackend::S3(config) => {
                assert_eq!(config.bucket, "scenes");
                assert_eq!(config.region, "us-east-1");
                assert!(!config.allow_http);
            }
            other => panic!("unexpected backend {:?}", other),
        }
        assert_eq!(
            serde_json::from_str::<StorageBackend>(r#""memory""#).unwrap(),
            StorageBackend::Memory
        );
    }
}
