//! Storage abstraction over `object_store`.
//!
//! Provides a unified interface for the local filesystem, an in-memory store
//! and any cloud URL `object_store` understands (S3, GCS, Azure). All paths
//! handed to a [`StorageProvider`] are relative to the root it was opened on.

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use url::Url;

use crate::emit;
use crate::error::{InvalidUrlSnafu, IoSnafu, ObjectStoreSnafu, StorageError, UrlParseSnafu};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Backend selected from a storage URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// A directory on the local filesystem (bare path or `file://`).
    Local { root: PathBuf },
    /// A process-local store (`memory://`), mostly for tests and dry runs.
    Memory,
    /// Anything else, resolved by `object_store::parse_url_opts`.
    Remote { url: Url },
}

impl BackendConfig {
    /// Parse a URL or bare path into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let url = url.trim();
        ensure!(
            !url.is_empty(),
            InvalidUrlSnafu {
                url: url.to_string()
            }
        );

        if url.starts_with("memory://") {
            return Ok(BackendConfig::Memory);
        }

        if !url.contains("://") {
            return Ok(BackendConfig::Local {
                root: PathBuf::from(url),
            });
        }

        let parsed = Url::parse(url).context(UrlParseSnafu { url })?;
        if parsed.scheme() == "file" {
            let root = parsed.to_file_path().ok().context(InvalidUrlSnafu { url })?;
            return Ok(BackendConfig::Local { root });
        }

        Ok(BackendConfig::Remote { url: parsed })
    }
}

/// Storage provider rooted at a single location.
#[derive(Clone)]
pub struct StorageProvider {
    config: BackendConfig,
    object_store: Arc<dyn ObjectStore>,
    prefix: Path,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    ///
    /// Local roots are created if missing.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let config = BackendConfig::parse_url(url)?;

        match &config {
            BackendConfig::Local { root } => {
                tokio::fs::create_dir_all(root).await.context(IoSnafu)?;
                let root = tokio::fs::canonicalize(root).await.context(IoSnafu)?;
                let store = LocalFileSystem::new_with_prefix(&root).context(ObjectStoreSnafu)?;
                let canonical_url = format!("file://{}", root.display());
                debug!("Opened local storage at {}", canonical_url);
                Ok(Self {
                    config,
                    object_store: Arc::new(store),
                    prefix: Path::default(),
                    canonical_url,
                })
            }
            BackendConfig::Memory => Ok(Self::in_memory()),
            BackendConfig::Remote { url } => {
                let (store, prefix) =
                    object_store::parse_url_opts(url, options).context(ObjectStoreSnafu)?;
                debug!("Opened remote storage at {} (prefix '{}')", url, prefix);
                Ok(Self {
                    canonical_url: url.to_string(),
                    config,
                    object_store: Arc::from(store),
                    prefix,
                })
            }
        }
    }

    /// A fresh, empty in-memory provider.
    pub fn in_memory() -> Self {
        Self {
            config: BackendConfig::Memory,
            object_store: Arc::new(InMemory::new()),
            prefix: Path::default(),
            canonical_url: "memory://".to_string(),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Resolve a root-relative path to a full object path.
    fn qualify_path(&self, path: &str) -> Path {
        let relative = Path::from(path);
        Path::from_iter(self.prefix.parts().chain(relative.parts()))
    }

    /// Strip the root prefix from a full object path.
    fn relative_path(&self, location: &Path) -> String {
        match location.prefix_match(&self.prefix) {
            Some(parts) => Path::from_iter(parts).to_string(),
            None => location.to_string(),
        }
    }

    /// Write `bytes` only if nothing exists at `path` yet.
    ///
    /// Fails with an error for which [`StorageError::is_already_exists`] holds
    /// when the name is taken.
    pub async fn put_if_absent(&self, path: &str, bytes: Bytes) -> Result<(), StorageError> {
        let location = self.qualify_path(path);
        let start = Instant::now();
        let result = self
            .object_store
            .put_opts(
                &location,
                PutPayload::from(bytes),
                PutOptions::from(PutMode::Create),
            )
            .await;
        observe(StorageOperation::Put, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Write `bytes` to `path`, replacing any existing object.
    pub async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StorageError> {
        let location = self.qualify_path(path);
        let start = Instant::now();
        let result = self
            .object_store
            .put(&location, PutPayload::from(bytes))
            .await;
        observe(StorageOperation::Put, start, result.is_ok());
        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Read the full contents of `path`.
    pub async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let location = self.qualify_path(path);
        let start = Instant::now();
        let result = match self.object_store.get(&location).await {
            Ok(get) => get.bytes().await,
            Err(e) => Err(e),
        };
        observe(StorageOperation::Get, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    pub async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let location = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.delete(&location).await;
        observe(StorageOperation::Delete, start, result.is_ok());
        result.context(ObjectStoreSnafu)
    }

    /// List every object below `prefix`, returning root-relative paths in
    /// lexicographic order.
    pub async fn list_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let location = self.qualify_path(prefix);
        let start = Instant::now();
        let result: Result<Vec<_>, _> = self
            .object_store
            .list(Some(&location))
            .try_collect()
            .await;
        observe(StorageOperation::List, start, result.is_ok());

        let mut paths: Vec<String> = result
            .context(ObjectStoreSnafu)?
            .into_iter()
            .map(|meta| self.relative_path(&meta.location))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn observe(operation: StorageOperation, start: Instant, ok: bool) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_bare_path_as_local() {
        let config = BackendConfig::parse_url("checkpoints/").unwrap();
        assert_eq!(
            config,
            BackendConfig::Local {
                root: PathBuf::from("checkpoints/")
            }
        );
    }

    #[test]
    fn test_parse_file_url_as_local() {
        let config = BackendConfig::parse_url("file:///tmp/flurry").unwrap();
        assert_eq!(
            config,
            BackendConfig::Local {
                root: PathBuf::from("/tmp/flurry")
            }
        );
    }

    #[test]
    fn test_parse_memory_and_remote() {
        assert_eq!(
            BackendConfig::parse_url("memory://").unwrap(),
            BackendConfig::Memory
        );
        match BackendConfig::parse_url("s3://bucket/events").unwrap() {
            BackendConfig::Remote { url } => {
                assert_eq!(url.scheme(), "s3");
                assert_eq!(url.host_str(), Some("bucket"));
            }
            other => panic!("expected remote backend, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_empty_url_fails() {
        assert!(BackendConfig::parse_url("  ").is_err());
    }

    #[tokio::test]
    async fn test_local_provider_creates_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested/output");

        let storage =
            StorageProvider::for_url_with_options(root.to_str().unwrap(), HashMap::new())
                .await
                .unwrap();

        assert!(root.is_dir());
        assert!(storage.canonical_url().starts_with("file://"));
    }

    #[tokio::test]
    async fn test_put_if_absent_rejects_existing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url_with_options(
            temp_dir.path().to_str().unwrap(),
            HashMap::new(),
        )
        .await
        .unwrap();

        storage
            .put_if_absent("region=eu/a.parquet", Bytes::from_static(b"first"))
            .await
            .unwrap();
        let err = storage
            .put_if_absent("region=eu/a.parquet", Bytes::from_static(b"second"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());

        let contents = storage.get("region=eu/a.parquet").await.unwrap();
        assert_eq!(contents.as_ref(), b"first");
    }

    #[tokio::test]
    async fn test_list_with_prefix_is_relative_and_scoped() {
        let storage = StorageProvider::in_memory();
        for path in [
            "region=eu/events-1.parquet",
            "region=eu/events-0.parquet",
            "region=eu2/events-0.parquet",
            "region=us/events-0.parquet",
        ] {
            storage.put(path, Bytes::from_static(b"x")).await.unwrap();
        }

        let listed = storage.list_with_prefix("region=eu").await.unwrap();
        assert_eq!(
            listed,
            vec!["region=eu/events-0.parquet", "region=eu/events-1.parquet"]
        );
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageProvider::for_url_with_options(
            temp_dir.path().to_str().unwrap(),
            HashMap::new(),
        )
        .await
        .unwrap();

        assert!(storage.list_with_prefix("region=nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_not_found() {
        let storage = StorageProvider::in_memory();
        storage.put("a.txt", Bytes::from_static(b"x")).await.unwrap();
        storage.delete("a.txt").await.unwrap();

        let err = storage.get("a.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
