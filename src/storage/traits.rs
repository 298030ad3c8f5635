//! Object store trait definitions

use crate::types::{AccessControlList, KeyValidationError, ObjectKey, WriteMode};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyValidationError),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Stream already closed: {0}")]
    StreamClosed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Insufficient storage: disk full")]
    DiskFull,

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// A scoped write handle returned by [`ObjectStore::open_for_write`].
///
/// Nothing written through a `New` stream is visible until `close` succeeds.
/// `close` is idempotent; writing after close yields `StreamClosed`.
#[async_trait]
pub trait WriteStream: Send {
    /// Write `buf`, returning how many bytes the backend accepted.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError>;

    /// Flush and release the stream.
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// Abstract object store with append and ACL support.
///
/// This trait is object-safe and is shared as `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store writes into.
    fn bucket(&self) -> &str;

    /// Whether the bucket has native directory semantics (FS bucket).
    fn supports_directories(&self) -> bool;

    /// Whether `WriteMode::Append` streams are available.
    fn supports_append(&self) -> bool;

    /// Open a stream to create (`New`) or extend (`Append`) an object.
    async fn open_for_write(
        &self,
        key: &ObjectKey,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteStream>, StorageError>;

    /// Read a whole object.
    async fn read(&self, key: &ObjectKey) -> Result<Vec<u8>, StorageError>;

    /// Check if an object or directory exists
    async fn exists(&self, key: &ObjectKey) -> bool;

    /// Length of an object in bytes.
    async fn object_len(&self, key: &ObjectKey) -> Result<u64, StorageError>;

    /// Fetch the ACL of an object, or of a directory for directory keys.
    async fn get_object_acl(
        &self,
        bucket: &str,
        key: &ObjectKey,
    ) -> Result<AccessControlList, StorageError>;

    /// Canonical id of the bucket owner.
    async fn bucket_owner(&self) -> Result<String, StorageError>;

    /// Create a directory and any missing parents.
    async fn mkdirs(&self, key: &ObjectKey) -> Result<(), StorageError>;

    /// Upload a local file to `dest`.
    async fn copy_local_file(
        &self,
        local: &Path,
        dest: &ObjectKey,
        overwrite: bool,
    ) -> Result<(), StorageError>;

    /// Delete an object or directory. Returns false if nothing was there.
    async fn delete(&self, key: &ObjectKey, recursive: bool) -> Result<bool, StorageError>;

    /// List all keys under a prefix. Directories are reported with a trailing `/`.
    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<String>, StorageError>;
}
