//! Shared test infrastructure for integration tests
//!
//! Provides a fault-injecting store wrapper, store factories, and MinIO
//! availability gating.

#![allow(dead_code)]

use async_trait::async_trait;
use bucket_acl_probe::config::{BackendConfig, ProbeConfig};
use bucket_acl_probe::storage::{MemoryBackend, ObjectStore, S3Backend, StorageError, WriteStream};
use bucket_acl_probe::types::{AccessControlList, ObjectKey, WriteMode};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const OWNER: &str = "domainiddomainiddomainiddo000001";
pub const BUCKET: &str = "probe-bucket";

/// MinIO configuration constants
pub const MINIO_ENDPOINT: &str = "http://localhost:9000";
pub const MINIO_BUCKET: &str = "bucket-acl-probe-test";
pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

pub fn key(s: &str) -> ObjectKey {
    ObjectKey::parse(s).expect("valid test key")
}

/// Small probe parameters so scenarios stay fast.
pub fn small_probe() -> ProbeConfig {
    ProbeConfig {
        file_size: 8 * 1024,
        append_size: 512,
        append_times: 3,
        local_file_size: 2048,
        ..ProbeConfig::default()
    }
}

/// Knobs for [`FaultyStore`].
#[derive(Debug, Default)]
pub struct Faults {
    /// Fail every stream write after this many successful writes
    pub fail_write_after: Option<usize>,
    /// Make every stream close fail
    pub fail_close: bool,
    /// Make recursive deletes fail
    pub fail_delete: bool,
    /// Accept at most this many bytes per stream write call
    pub short_writes: Option<usize>,
    /// Claim one more byte than the backend accepted on every write
    pub over_report_writes: bool,
    /// Report an empty ACL for this many fetches before the real one
    pub stale_acl_reads: usize,
    /// Replace every ACL with this one
    pub acl_override: Option<AccessControlList>,
}

/// Store wrapper that injects faults and counts stream lifecycle calls.
pub struct FaultyStore {
    inner: Arc<dyn ObjectStore>,
    pub faults: Arc<Mutex<Faults>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub acl_fetches: Arc<AtomicUsize>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            acl_fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new(BUCKET, OWNER)))
    }

    pub fn configure(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.faults.lock());
    }
}

struct FaultyStream {
    inner: Box<dyn WriteStream>,
    faults: Arc<Mutex<Faults>>,
    closed: Arc<AtomicUsize>,
    writes: usize,
}

#[async_trait]
impl WriteStream for FaultyStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        let (fail_after, short, over_report) = {
            let f = self.faults.lock();
            (f.fail_write_after, f.short_writes, f.over_report_writes)
        };
        if let Some(limit) = fail_after {
            if self.writes >= limit {
                return Err(StorageError::S3("injected write failure".into()));
            }
        }
        self.writes += 1;
        let len = short.map(|s| s.min(buf.len())).unwrap_or(buf.len());
        let accepted = self.inner.write(&buf[..len]).await?;
        Ok(if over_report { accepted + 1 } else { accepted })
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        let fail_close = self.faults.lock().fail_close;
        if fail_close {
            return Err(StorageError::Other("injected close failure".into()));
        }
        self.inner.close().await
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    fn supports_directories(&self) -> bool {
        self.inner.supports_directories()
    }

    fn supports_append(&self) -> bool {
        self.inner.supports_append()
    }

    async fn open_for_write(
        &self,
        key: &ObjectKey,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteStream>, StorageError> {
        let inner = self.inner.open_for_write(key, mode).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FaultyStream {
            inner,
            faults: Arc::clone(&self.faults),
            closed: Arc::clone(&self.closed),
            writes: 0,
        }))
    }

    async fn read(&self, key: &ObjectKey) -> Result<Vec<u8>, StorageError> {
        self.inner.read(key).await
    }

    async fn exists(&self, key: &ObjectKey) -> bool {
        self.inner.exists(key).await
    }

    async fn object_len(&self, key: &ObjectKey) -> Result<u64, StorageError> {
        self.inner.object_len(key).await
    }

    async fn get_object_acl(
        &self,
        bucket: &str,
        key: &ObjectKey,
    ) -> Result<AccessControlList, StorageError> {
        self.acl_fetches.fetch_add(1, Ordering::SeqCst);
        let real = self.inner.get_object_acl(bucket, key).await?;
        let mut faults = self.faults.lock();
        if faults.stale_acl_reads > 0 {
            faults.stale_acl_reads -= 1;
            return Ok(AccessControlList::default());
        }
        Ok(faults.acl_override.clone().unwrap_or(real))
    }

    async fn bucket_owner(&self) -> Result<String, StorageError> {
        self.inner.bucket_owner().await
    }

    async fn mkdirs(&self, key: &ObjectKey) -> Result<(), StorageError> {
        self.inner.mkdirs(key).await
    }

    async fn copy_local_file(
        &self,
        local: &Path,
        dest: &ObjectKey,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        self.inner.copy_local_file(local, dest, overwrite).await
    }

    async fn delete(&self, key: &ObjectKey, recursive: bool) -> Result<bool, StorageError> {
        let fail_delete = self.faults.lock().fail_delete;
        if fail_delete {
            return Err(StorageError::S3("injected delete failure".into()));
        }
        self.inner.delete(key, recursive).await
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

/// S3 backend configuration pointing at the test MinIO.
pub fn minio_backend_config(fs_bucket: bool) -> BackendConfig {
    BackendConfig::S3 {
        endpoint: Some(
            std::env::var("BAP_TEST_S3_ENDPOINT").unwrap_or_else(|_| MINIO_ENDPOINT.to_string()),
        ),
        region: "us-east-1".to_string(),
        bucket: std::env::var("BAP_TEST_S3_BUCKET").unwrap_or_else(|_| MINIO_BUCKET.to_string()),
        force_path_style: true,
        access_key_id: Some(MINIO_ACCESS_KEY.to_string()),
        secret_access_key: Some(MINIO_SECRET_KEY.to_string()),
        fs_bucket,
    }
}

/// Check if MinIO is reachable and the test bucket answers GetBucketAcl.
pub async fn minio_available() -> bool {
    let Ok(backend) = S3Backend::new(&minio_backend_config(false)).await else {
        return false;
    };
    let result = tokio::time::timeout(Duration::from_secs(2), backend.bucket_owner()).await;
    matches!(result, Ok(Ok(_)))
}

/// Macro to skip a test if MinIO is not available.
/// Use at the start of any test that requires MinIO.
#[macro_export]
macro_rules! skip_unless_minio {
    () => {
        if !common::minio_available().await {
            eprintln!("MinIO not available, skipping test");
            return;
        }
    };
}
