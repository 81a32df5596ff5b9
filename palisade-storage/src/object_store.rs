//! Storage backend adapter for backup artifacts
//!
//! Every `put` returns the SHA-256 checksum of what was written so callers can
//! record it on the execution and verify it later with a re-read.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Durable object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object. Returns the
    /// hex-encoded SHA-256 of the stored bytes.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Partial read. The range is clamped to the object's length.
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>>;

    /// Remove `key`. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Hex-encoded SHA-256 of `bytes`
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Keys are relative, `/`-separated paths without empty or `..` segments
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key cannot be empty".into()));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(Error::InvalidKey(format!("key '{}' must be relative", key)));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(Error::InvalidKey(format!(
            "key '{}' contains an empty or relative segment",
            key
        )));
    }
    Ok(())
}

fn slice_range(bytes: &[u8], range: Range<u64>) -> Vec<u8> {
    let len = bytes.len() as u64;
    let start = range.start.min(len) as usize;
    let end = range.end.clamp(range.start.min(len), len) as usize;
    bytes[start..end].to_vec()
}

/// In-process object store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Overwrite an object without validation, for corruption tests
    pub async fn overwrite_raw(&self, key: &str, bytes: Vec<u8>) {
        self.objects.write().await.insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        validate_key(key)?;
        let sum = checksum(&bytes);
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(sum)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object {}", key)))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>> {
        validate_key(key)?;
        let objects = self.objects.read().await;
        let bytes = objects
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("object {}", key)))?;
        Ok(slice_range(bytes, range))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }
}

/// Object store rooted at a local directory.
///
/// Writes go to a temporary sibling file that is fsynced and renamed into
/// place, so readers never observe a partial artifact.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, s| path.join(s)))
    }

    async fn open(&self, key: &str) -> Result<tokio::fs::File> {
        let path = self.path_for(key)?;
        tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("object {}", key))
            } else {
                Error::Io(e)
            }
        })
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    #[instrument(skip(self, bytes), fields(key = %key, size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let sum = checksum(&bytes);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Io(e));
        }
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        debug!(checksum = %sum, "Stored object");
        Ok(sum)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut file = self.open(key).await?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>> {
        let mut file = self.open(key).await?;
        let len = file.metadata().await?.len();
        let start = range.start.min(len);
        let end = range.end.clamp(start, len);

        file.seek(SeekFrom::Start(start)).await?;
        let mut bytes = vec![0u8; (end - start) as usize];
        file.read_exact(&mut bytes).await?;
        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Routes every call through a [`CircuitBreaker`] and records latency.
///
/// Only transient failures count toward opening the circuit; a missing key
/// or an invalid key is passed through untouched.
pub struct GuardedObjectStore<S> {
    inner: S,
    breaker: CircuitBreaker,
}

impl<S: ObjectStore> GuardedObjectStore<S> {
    pub fn new(inner: S, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new("object_store", config),
        }
    }

    pub fn from_env(inner: S) -> Self {
        Self::new(inner, CircuitBreakerConfig::from_env("object_store"))
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn is_open(&self) -> bool {
        self.breaker.is_open().await
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = self
            .breaker
            .call(move || async move {
                match f().await {
                    Ok(value) => Ok(Ok(value)),
                    Err(e) if e.is_transient() => Err(e),
                    Err(e) => Ok(Err(e)),
                }
            })
            .await;

        let (outcome, result) = match result {
            Ok(Ok(value)) => ("ok", Ok(value)),
            Ok(Err(e)) | Err(CircuitBreakerError::Failure(e)) => ("error", Err(e)),
            Err(CircuitBreakerError::CircuitOpen) => ("rejected", Err(Error::CircuitOpen)),
        };
        crate::metrics::OBJECT_STORE_DURATION
            .with_label_values(&[operation, outcome])
            .observe(start.elapsed().as_secs_f64());
        result
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for GuardedObjectStore<S> {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        self.guarded("put", || self.inner.put(key, bytes)).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.guarded("get", || self.inner.get(key)).await
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>> {
        self.guarded("get_range", || self.inner.get_range(key, range)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.guarded("delete", || self.inner.delete(key)).await
    }
}
