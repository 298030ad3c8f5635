//! In-process object store, used for dry runs and tests

use super::traits::{ObjectStore, StorageError, WriteStream};
use crate::types::{AccessControlList, ObjectKey, WriteMode};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
enum Entry {
    Object {
        data: Vec<u8>,
        acl: AccessControlList,
    },
    Directory {
        acl: AccessControlList,
    },
}

type Entries = Arc<Mutex<BTreeMap<ObjectKey, Entry>>>;

/// Object store backed by a map in memory.
///
/// Behaves like an FS bucket: directories are explicit entries, objects
/// carry the owner FULL_CONTROL grant, appends extend objects in place.
/// Directory support can be switched off to mimic a flat object bucket.
pub struct MemoryBackend {
    bucket: String,
    owner_id: String,
    directories: bool,
    entries: Entries,
}

impl MemoryBackend {
    pub fn new(bucket: &str, owner_id: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            owner_id: owner_id.to_string(),
            directories: true,
            entries: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Mimic a flat object bucket without directory semantics.
    pub fn without_directories(mut self) -> Self {
        self.directories = false;
        self
    }

    /// Replace the ACL of an existing entry.
    pub fn set_acl(&self, key: &ObjectKey, new_acl: AccessControlList) -> Result<(), StorageError> {
        match self.entries.lock().get_mut(key) {
            Some(Entry::Object { acl, .. }) | Some(Entry::Directory { acl }) => {
                *acl = new_acl;
                Ok(())
            }
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    fn owner_acl(&self) -> AccessControlList {
        AccessControlList::owner_full_control(&self.owner_id)
    }

    fn ensure_parents(
        entries: &mut BTreeMap<ObjectKey, Entry>,
        key: &ObjectKey,
        acl: &AccessControlList,
    ) -> Result<(), StorageError> {
        let Some(parent) = key.parent() else {
            return Ok(());
        };
        for dir in parent.ancestors_inclusive() {
            match entries.get(&dir) {
                Some(Entry::Directory { .. }) => {}
                Some(Entry::Object { .. }) => {
                    return Err(StorageError::AlreadyExists(format!("{} is an object", dir)))
                }
                None => {
                    entries.insert(dir, Entry::Directory { acl: acl.clone() });
                }
            }
        }
        Ok(())
    }
}

/// Stream that buffers writes and commits them to the map on close.
struct MemoryWriteStream {
    key: ObjectKey,
    mode: WriteMode,
    buffer: Vec<u8>,
    acl: AccessControlList,
    entries: Entries,
    closed: bool,
}

#[async_trait]
impl WriteStream for MemoryWriteStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, StorageError> {
        if self.closed {
            return Err(StorageError::StreamClosed(self.key.to_string()));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let bytes = std::mem::take(&mut self.buffer);
        let mut entries = self.entries.lock();
        match self.mode {
            WriteMode::New => {
                MemoryBackend::ensure_parents(&mut entries, &self.key, &self.acl)?;
                entries.insert(
                    self.key.clone(),
                    Entry::Object {
                        data: bytes,
                        acl: self.acl.clone(),
                    },
                );
            }
            WriteMode::Append => match entries.get_mut(&self.key) {
                Some(Entry::Object { data, .. }) => data.extend_from_slice(&bytes),
                Some(Entry::Directory { .. }) => {
                    return Err(StorageError::AlreadyExists(format!(
                        "{} is a directory",
                        self.key
                    )))
                }
                None => return Err(StorageError::NotFound(self.key.to_string())),
            },
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn supports_directories(&self) -> bool {
        self.directories
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
        {
            let entries = self.entries.lock();
            match (entries.get(key), mode) {
                (Some(Entry::Directory { .. }), _) => {
                    return Err(StorageError::AlreadyExists(format!("{} is a directory", key)))
                }
                (None, WriteMode::Append) => return Err(StorageError::NotFound(key.to_string())),
                _ => {}
            }
        }
        Ok(Box::new(MemoryWriteStream {
            key: key.clone(),
            mode,
            buffer: Vec::new(),
            acl: self.owner_acl(),
            entries: Arc::clone(&self.entries),
            closed: false,
        }))
    }

    async fn read(&self, key: &ObjectKey) -> Result<Vec<u8>, StorageError> {
        match self.entries.lock().get(key) {
            Some(Entry::Object { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory { .. }) => {
                Err(StorageError::Other(format!("{} is a directory", key)))
            }
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn exists(&self, key: &ObjectKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    async fn object_len(&self, key: &ObjectKey) -> Result<u64, StorageError> {
        match self.entries.lock().get(key) {
            Some(Entry::Object { data, .. }) => Ok(data.len() as u64),
            Some(Entry::Directory { .. }) => Ok(0),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn get_object_acl(
        &self,
        bucket: &str,
        key: &ObjectKey,
    ) -> Result<AccessControlList, StorageError> {
        if bucket != self.bucket {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        match self.entries.lock().get(key) {
            Some(Entry::Object { acl, .. }) | Some(Entry::Directory { acl }) => Ok(acl.clone()),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn bucket_owner(&self) -> Result<String, StorageError> {
        Ok(self.owner_id.clone())
    }

    #[instrument(skip(self))]
    async fn mkdirs(&self, key: &ObjectKey) -> Result<(), StorageError> {
        if !self.directories {
            return Err(StorageError::Unsupported(
                "mkdirs on a bucket without directory support".into(),
            ));
        }
        let acl = self.owner_acl();
        let mut entries = self.entries.lock();
        Self::ensure_parents(&mut entries, key, &acl)?;
        match entries.get(key) {
            Some(Entry::Object { .. }) => Err(StorageError::AlreadyExists(key.to_string())),
            Some(Entry::Directory { .. }) => Ok(()),
            None => {
                entries.insert(key.clone(), Entry::Directory { acl });
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    async fn copy_local_file(
        &self,
        local: &Path,
        dest: &ObjectKey,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let data = tokio::fs::read(local).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(local.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        let acl = self.owner_acl();
        let mut entries = self.entries.lock();
        match entries.get(dest) {
            Some(Entry::Directory { .. }) => {
                return Err(StorageError::AlreadyExists(format!("{} is a directory", dest)))
            }
            Some(Entry::Object { .. }) if !overwrite => {
                return Err(StorageError::AlreadyExists(dest.to_string()))
            }
            _ => {}
        }
        Self::ensure_parents(&mut entries, dest, &acl)?;
        debug!("Copied {:?} to {} ({} bytes)", local, dest, data.len());
        entries.insert(dest.clone(), Entry::Object { data, acl });
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &ObjectKey, recursive: bool) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock();
        let below: Vec<ObjectKey> = entries
            .keys()
            .filter(|k| *k != key && key.contains(k))
            .cloned()
            .collect();
        if !below.is_empty() && !recursive {
            return Err(StorageError::DirectoryNotEmpty(key.to_string()));
        }
        let mut removed = entries.remove(key).is_some();
        for k in below {
            removed |= entries.remove(&k).is_some();
        }
        Ok(removed)
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock();
        if let Some(Entry::Object { .. }) = entries.get(prefix) {
            return Ok(vec![prefix.to_string()]);
        }
        Ok(entries
            .iter()
            .filter(|(k, _)| *k != prefix && prefix.contains(k))
            .map(|(k, e)| match e {
                Entry::Directory { .. } => k.dir_marker(),
                Entry::Object { .. } => k.to_string(),
            })
            .collect())
    }
}
