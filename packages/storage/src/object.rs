//! Durable tier: a thin wrapper around `object_store`.
//!
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};

use crate::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `STORAGE_BACKEND`: `s3`, `filesystem` (default) or `memory`
    /// - `STORAGE_FS_ROOT`: filesystem root (default `./data/traces`)
    /// - `S3_BUCKET` (required for s3), `AWS_REGION` (default `us-east-1`),
    ///   `S3_ENDPOINT`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
    /// - `STORAGE_PREFIX`: optional key prefix
    pub fn from_env() -> Result<Self, StorageError> {
        let var = |name: &str| std::env::var(name).ok().and_then(non_empty);

        let backend = match var("STORAGE_BACKEND").as_deref() {
            Some("s3") => StorageBackendConfig::S3(s3_from_env(&var)?),
            Some("memory") | Some("mem") => StorageBackendConfig::Memory,
            Some("filesystem") | Some("fs") | None => StorageBackendConfig::Filesystem {
                root: var("STORAGE_FS_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/traces")),
            },
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            backend,
            prefix: var("STORAGE_PREFIX"),
        })
    }
}

fn s3_from_env<F>(var: &F) -> Result<S3Config, StorageError>
where
    F: Fn(&str) -> Option<String>,
{
    let bucket = var("S3_BUCKET").ok_or_else(|| {
        StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
    })?;
    let endpoint = var("S3_ENDPOINT");
    let allow_http = endpoint
        .as_deref()
        .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://"));

    Ok(S3Config {
        bucket,
        region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        endpoint,
        allow_http,
        access_key_id: var("AWS_ACCESS_KEY_ID"),
        secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
    })
}

/// Object storage handle. Cheap to clone.
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl Storage {
    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store): (StorageKind, Arc<dyn ObjectStore>) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?)),
            StorageBackendConfig::Filesystem { root } => {
                std::fs::create_dir_all(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs))
            }
            StorageBackendConfig::Memory => (
                StorageKind::Memory,
                Arc::new(object_store::memory::InMemory::new()),
            ),
        };

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    /// In-memory storage, mostly for tests.
    pub async fn memory() -> Result<Self, StorageError> {
        Self::new(StorageConfig::memory()).await
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}"),
            _ => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    pub async fn put_bytes(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.put(&path, PutPayload::from(bytes)).await?;
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = self.store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    /// Like [`Storage::get_bytes`], mapping a missing object to `None`.
    pub async fn find_bytes(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        match self.get_bytes(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::ObjectStore(object_store::Error::NotFound { .. })) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Size of an object without downloading it.
    pub async fn size(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let path = self.to_path(key)?;
        match self.store.head(&path).await {
            Ok(meta) => Ok(Some(meta.size)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        self.store.delete(&path).await?;
        Ok(())
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_allow_http(cfg.allow_http);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }

    Ok(builder.build()?)
}
