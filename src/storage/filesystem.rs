//! Filesystem-based object store with FS-bucket semantics and xattr ACLs

use super::acl_xattr::{self, io_to_storage_error};
use super::traits::{ObjectStore, StorageError, WriteStream};
use crate::types::{AccessControlList, ObjectKey, WriteMode};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

/// Prefix of in-flight temp files; hidden from listings.
const TEMP_PREFIX: &str = ".bap-tmp-";

/// In-flight temp files and the xattr check file are never listed.
fn is_internal_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) || name == acl_xattr::XATTR_PROBE_FILE
}

/// Async-safe path existence check (avoids blocking the Tokio runtime)
async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Async-safe directory check
async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Map an io::Error for `key`, turning ENOENT into `NotFound`.
fn key_io_error(e: std::io::Error, key: &ObjectKey) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        io_to_storage_error(e)
    }
}

/// Filesystem object store
///
/// Storage layout:
/// ```text
/// {root}/{bucket}/{key}     # object data, ACL in the `user.bap.acl` xattr
/// {root}/{bucket}/{dir}/    # directories are real directories, also with an ACL
/// ```
///
/// Every object and directory created through this backend receives the
/// canned owner ACL (`owner`, FULL_CONTROL). Appends extend the file in
/// place, so the ACL set at creation time survives any number of appends.
pub struct FilesystemBackend {
    /// Root directory holding one subdirectory per bucket
    root: PathBuf,
    bucket: String,
    owner_id: String,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    ///
    /// Creates the bucket directory and validates xattr support at startup.
    pub async fn new(root: PathBuf, bucket: &str, owner_id: &str) -> Result<Self, StorageError> {
        let backend = Self {
            root,
            bucket: bucket.to_string(),
            owner_id: owner_id.to_string(),
        };
        let bucket_dir = backend.bucket_dir();
        fs::create_dir_all(&bucket_dir).await?;
        acl_xattr::validate_xattr_support(&bucket_dir).await?;
        debug!("FilesystemBackend ready at {:?}", bucket_dir);
        Ok(backend)
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn object_path(&self, key: &ObjectKey) -> PathBuf {
        let mut path = self.bucket_dir();
        for segment in key.as_str().split('/') {
            path.push(segment);
        }
        path
    }

    fn owner_acl(&self) -> AccessControlList {
        AccessControlList::owner_full_control(&self.owner_id)
    }

    /// Create `key` and every missing ancestor as a directory with the owner ACL.
    async fn create_dirs_with_acl(&self, keys: &[ObjectKey]) -> Result<(), StorageError> {
        for dir_key in keys {
            let path = self.object_path(dir_key);
            match fs::metadata(&path).await {
                Ok(m) if m.is_dir() => continue,
                Ok(_) => return Err(StorageError::AlreadyExists(dir_key.to_string())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_to_storage_error(e)),
            }
            match fs::create_dir(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_to_storage_error(e)),
            }
            acl_xattr::write_acl(&path, &self.owner_acl()).await?;
            debug!("Created directory {}", dir_key);
        }
        Ok(())
    }

    /// Ensure all parent directories of `key` exist.
    async fn ensure_parents(&self, key: &ObjectKey) -> Result<(), StorageError> {
        if let Some(parent) = key.parent() {
            self.create_dirs_with_acl(&parent.ancestors_inclusive())
                .await?;
        }
        Ok(())
    }

    /// Recursively collect keys below `dir`, directories with a trailing '/'.
    fn list_recursive<'a>(
        bucket_dir: &'a Path,
        current_dir: &'a Path,
        results: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), StorageError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut entries = fs::read_dir(current_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(is_internal_name)
                    .unwrap_or(true);
                if hidden {
                    continue;
                }
                let relative = match path.strip_prefix(bucket_dir) {
                    Ok(r) => r.to_string_lossy().replace('\\', "/"),
                    Err(_) => continue,
                };
                if entry.file_type().await?.is_dir() {
                    results.push(format!("{}/", relative));
                    Self::list_recursive(bucket_dir, &path, results).await?;
                } else {
                    results.push(relative);
                }
            }
            Ok(())
        })
    }
}

enum FsStreamState {
    /// Data goes to a temp file next to the target and is renamed on close.
    New {
        writer: BufWriter<fs::File>,
        temp: TempPath,
        target: PathBuf,
    },
    /// Data is appended to the existing file in place.
    Append { writer: BufWriter<fs::File> },
    Closed,
}

/// Write stream over a local file.
pub struct FsWriteStream {
    key: ObjectKey,
    state: FsStreamState,
    acl: AccessControlList,
}

#[async_trait]
impl WriteStream for FsWriteStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        let writer = match &mut self.state {
            FsStreamState::New { writer, .. } | FsStreamState::Append { writer } => writer,
            FsStreamState::Closed => return Err(StorageError::StreamClosed(self.key.to_string())),
        };
        writer.write_all(buf).await.map_err(io_to_storage_error)?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        match std::mem::replace(&mut self.state, FsStreamState::Closed) {
            FsStreamState::New {
                mut writer,
                temp,
                target,
            } => {
                writer.flush().await.map_err(io_to_storage_error)?;
                writer
                    .get_ref()
                    .sync_all()
                    .await
                    .map_err(io_to_storage_error)?;
                drop(writer);
                let persist_target = target.clone();
                tokio::task::spawn_blocking(move || {
                    temp.persist(&persist_target)
                        .map_err(|e| io_to_storage_error(e.error))
                })
                .await
                .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))??;
                acl_xattr::write_acl(&target, &self.acl).await?;
                debug!("Committed new object {}", self.key);
            }
            FsStreamState::Append { mut writer } => {
                writer.flush().await.map_err(io_to_storage_error)?;
                writer
                    .get_ref()
                    .sync_all()
                    .await
                    .map_err(io_to_storage_error)?;
                debug!("Closed append stream for {}", self.key);
            }
            FsStreamState::Closed => {}
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn supports_directories(&self) -> bool {
        true
    }

    fn supports_append(&self) -> bool {
        true
    }

    #[instrument(skip(self))]
    async fn open_for_write(
        &self,
        key: &ObjectKey,
        mode: WriteMode,
    ) -> Result<Box<dyn WriteStream>, StorageError> {
        let target = self.object_path(key);
        if is_dir(&target).await {
            return Err(StorageError::AlreadyExists(format!("{} is a directory", key)));
        }

        let state = match mode {
            WriteMode::New => {
                self.ensure_parents(key).await?;
                let parent = target
                    .parent()
                    .ok_or_else(|| StorageError::Other("Object path has no parent".into()))?
                    .to_path_buf();
                let tmp = tokio::task::spawn_blocking(move || {
                    tempfile::Builder::new()
                        .prefix(TEMP_PREFIX)
                        .tempfile_in(&parent)
                        .map_err(io_to_storage_error)
                })
                .await
                .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))??;
                let (file, temp) = tmp.into_parts();
                FsStreamState::New {
                    writer: BufWriter::new(fs::File::from_std(file)),
                    temp,
                    target,
                }
            }
            WriteMode::Append => {
                let file = fs::OpenOptions::new()
                    .append(true)
                    .open(&target)
                    .await
                    .map_err(|e| key_io_error(e, key))?;
                FsStreamState::Append {
                    writer: BufWriter::new(file),
                }
            }
        };

        debug!("Opened {} stream for {}", mode, key);
        Ok(Box::new(FsWriteStream {
            key: key.clone(),
            state,
            acl: self.owner_acl(),
        }))
    }

    #[instrument(skip(self))]
    async fn read(&self, key: &ObjectKey) -> Result<Vec<u8>, StorageError> {
        let data = fs::read(self.object_path(key))
            .await
            .map_err(|e| key_io_error(e, key))?;
        debug!("Read {} ({} bytes)", key, data.len());
        Ok(data)
    }

    async fn exists(&self, key: &ObjectKey) -> bool {
        path_exists(&self.object_path(key)).await
    }

    async fn object_len(&self, key: &ObjectKey) -> Result<u64, StorageError> {
        let meta = fs::metadata(self.object_path(key))
            .await
            .map_err(|e| key_io_error(e, key))?;
        Ok(if meta.is_dir() { 0 } else { meta.len() })
    }

    #[instrument(skip(self))]
    async fn get_object_acl(
        &self,
        bucket: &str,
        key: &ObjectKey,
    ) -> Result<AccessControlList, StorageError> {
        if bucket != self.bucket {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        let path = self.object_path(key);
        if !path_exists(&path).await {
            return Err(StorageError::NotFound(key.to_string()));
        }
        acl_xattr::read_acl(&path).await
    }

    async fn bucket_owner(&self) -> Result<String, StorageError> {
        Ok(self.owner_id.clone())
    }

    #[instrument(skip(self))]
    async fn mkdirs(&self, key: &ObjectKey) -> Result<(), StorageError> {
        self.create_dirs_with_acl(&key.ancestors_inclusive()).await
    }

    #[instrument(skip(self))]
    async fn copy_local_file(
        &self,
        local: &Path,
        dest: &ObjectKey,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        if !path_exists(local).await {
            return Err(StorageError::NotFound(local.display().to_string()));
        }
        let target = self.object_path(dest);
        if is_dir(&target).await {
            return Err(StorageError::AlreadyExists(format!("{} is a directory", dest)));
        }
        if !overwrite && path_exists(&target).await {
            return Err(StorageError::AlreadyExists(dest.to_string()));
        }
        self.ensure_parents(dest).await?;

        let source = local.to_path_buf();
        let persist_target = target.clone();
        let copied = tokio::task::spawn_blocking(move || -> Result<u64, StorageError> {
            let parent = persist_target
                .parent()
                .ok_or_else(|| StorageError::Other("Object path has no parent".into()))?;
            let mut tmp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(parent)
                .map_err(io_to_storage_error)?;
            let mut input = std::fs::File::open(&source).map_err(io_to_storage_error)?;
            let copied = std::io::copy(&mut input, &mut tmp).map_err(io_to_storage_error)?;
            tmp.as_file().sync_all().map_err(io_to_storage_error)?;
            tmp.persist(&persist_target)
                .map_err(|e| io_to_storage_error(e.error))?;
            Ok(copied)
        })
        .await
        .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))??;

        acl_xattr::write_acl(&target, &self.owner_acl()).await?;
        debug!("Copied {:?} to {} ({} bytes)", local, dest, copied);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &ObjectKey, recursive: bool) -> Result<bool, StorageError> {
        let path = self.object_path(key);
        let meta = match fs::symlink_metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_to_storage_error(e)),
        };
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&path).await?;
            } else {
                let mut entries = fs::read_dir(&path).await?;
                if entries.next_entry().await?.is_some() {
                    return Err(StorageError::DirectoryNotEmpty(key.to_string()));
                }
                fs::remove_dir(&path).await?;
            }
        } else {
            fs::remove_file(&path).await?;
        }
        debug!("Deleted {} (recursive={})", key, recursive);
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<String>, StorageError> {
        let path = self.object_path(prefix);
        let meta = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_to_storage_error(e)),
        };
        if !meta.is_dir() {
            return Ok(vec![prefix.to_string()]);
        }
        let bucket_dir = self.bucket_dir();
        let mut results = Vec::new();
        Self::list_recursive(&bucket_dir, &path, &mut results).await?;
        results.sort();
        debug!("Listed {} keys under {}", results.len(), prefix);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Permission;
    use tempfile::TempDir;

    const OWNER: &str = "domainiddomainiddomainiddo000001";

    async fn backend() -> (TempDir, FilesystemBackend) {
        let dir = TempDir::new().unwrap();
        let fs = FilesystemBackend::new(dir.path().to_path_buf(), "bucket", OWNER)
            .await
            .unwrap();
        (dir, fs)
    }

    fn key(s: &str) -> ObjectKey {
        ObjectKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_new_stream_is_invisible_until_close() {
        let (_dir, fs) = backend().await;
        let k = key("a/b/obj");
        let mut stream = fs.open_for_write(&k, WriteMode::New).await.unwrap();
        stream.write(b"hello").await.unwrap();
        assert!(!fs.exists(&k).await);
        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert_eq!(fs.read(&k).await.unwrap(), b"hello");
        assert!(matches!(
            stream.write(b"x").await,
            Err(StorageError::StreamClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_new_stream_leaves_no_object_or_temp_file() {
        let (_dir, fs) = backend().await;
        let k = key("dir/partial");
        {
            let mut stream = fs.open_for_write(&k, WriteMode::New).await.unwrap();
            stream.write(b"partial").await.unwrap();
        }
        assert!(!fs.exists(&k).await);
        assert_eq!(fs.list(&key("dir")).await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_append_preserves_acl_and_extends() {
        let (_dir, fs) = backend().await;
        let k = key("obj");
        let mut s = fs.open_for_write(&k, WriteMode::New).await.unwrap();
        s.write(b"abc").await.unwrap();
        s.close().await.unwrap();

        let mut s = fs.open_for_write(&k, WriteMode::Append).await.unwrap();
        s.write(b"def").await.unwrap();
        s.close().await.unwrap();

        assert_eq!(fs.read(&k).await.unwrap(), b"abcdef");
        let acl = fs.get_object_acl("bucket", &k).await.unwrap();
        assert!(acl.contains(OWNER, &Permission::FullControl));
    }

    #[tokio::test]
    async fn test_append_to_missing_object_is_not_found() {
        let (_dir, fs) = backend().await;
        let result = fs.open_for_write(&key("nope"), WriteMode::Append).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mkdirs_sets_acl_on_every_created_level() {
        let (_dir, fs) = backend().await;
        fs.mkdirs(&key("test-root/test-obs/mkdir-zh")).await.unwrap();
        for k in ["test-root", "test-root/test-obs", "test-root/test-obs/mkdir-zh"] {
            let acl = fs.get_object_acl("bucket", &key(k)).await.unwrap();
            assert!(acl.contains(OWNER, &Permission::FullControl), "{}", k);
        }
        assert_eq!(fs.object_len(&key("test-root")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acl_for_other_bucket_is_bucket_not_found() {
        let (_dir, fs) = backend().await;
        fs.mkdirs(&key("d")).await.unwrap();
        assert!(matches!(
            fs.get_object_acl("other", &key("d")).await,
            Err(StorageError::BucketNotFound(_))
        ));
        assert!(matches!(
            fs.get_object_acl("bucket", &key("missing")).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_copy_local_file_respects_overwrite() {
        let (dir, fs) = backend().await;
        let local = dir.path().join("local_file");
        std::fs::write(&local, b"local bytes").unwrap();
        let dest = key("test-root/copylocal-huge");

        fs.copy_local_file(&local, &dest, true).await.unwrap();
        assert_eq!(fs.read(&dest).await.unwrap(), b"local bytes");
        assert!(matches!(
            fs.copy_local_file(&local, &dest, false).await,
            Err(StorageError::AlreadyExists(_))
        ));
        fs.copy_local_file(&local, &dest, true).await.unwrap();
        let acl = fs.get_object_acl("bucket", &dest).await.unwrap();
        assert!(acl.contains(OWNER, &Permission::FullControl));
    }

    #[tokio::test]
    async fn test_delete_recursive_and_not_empty() {
        let (_dir, fs) = backend().await;
        let mut s = fs
            .open_for_write(&key("root/x/y"), WriteMode::New)
            .await
            .unwrap();
        s.close().await.unwrap();

        assert!(matches!(
            fs.delete(&key("root"), false).await,
            Err(StorageError::DirectoryNotEmpty(_))
        ));
        assert_eq!(
            fs.list(&key("root")).await.unwrap(),
            vec!["root/x/".to_string(), "root/x/y".to_string()]
        );
        assert!(fs.delete(&key("root"), true).await.unwrap());
        assert!(!fs.delete(&key("root"), true).await.unwrap());
        assert!(!fs.exists(&key("root")).await);
    }

    #[tokio::test]
    async fn test_list_shows_dot_segments_but_not_internal_files() {
        let (dir, fs) = backend().await;
        let mut done = fs
            .open_for_write(&key("root/.ci/obj"), WriteMode::New)
            .await
            .unwrap();
        done.close().await.unwrap();
        let _pending = fs
            .open_for_write(&key("root/.ci/pending"), WriteMode::New)
            .await
            .unwrap();
        std::fs::write(dir.path().join("bucket/root/.bap_xattr_probe"), b"x").unwrap();

        assert_eq!(
            fs.list(&key("root")).await.unwrap(),
            vec!["root/.ci/".to_string(), "root/.ci/obj".to_string()]
        );
    }
}
