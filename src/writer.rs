//! Chunked writer for new and appended objects
//!
//! Streams the deterministic payload into a store in chunks of at most the
//! configured buffer length. The stream is closed on every exit path; a
//! close failure during an already failing write is kept as a secondary
//! fault next to the original one.

use crate::payload::Payload;
use crate::storage::{ObjectStore, StorageError, WriteStream};
use crate::types::{ObjectKey, WriteMode};
use thiserror::Error;
use tracing::{debug, instrument};

/// A failed write or append.
///
/// `primary` is the first fault encountered. `secondary` holds a close
/// failure that happened while `primary` was already propagating; it never
/// replaces the primary fault.
#[derive(Debug, Error)]
#[error("{primary}{}", secondary_suffix(.secondary))]
pub struct WriteFault {
    #[source]
    pub primary: StorageError,
    pub secondary: Option<StorageError>,
    /// Bytes the stream accepted before the fault. Not committed.
    pub written: u64,
}

fn secondary_suffix(secondary: &Option<StorageError>) -> String {
    secondary
        .as_ref()
        .map(|e| format!(" (close also failed: {})", e))
        .unwrap_or_default()
}

impl WriteFault {
    fn new(primary: StorageError, written: u64) -> Self {
        Self {
            primary,
            secondary: None,
            written,
        }
    }
}

/// Progress of one write or append call.
///
/// Each call is an independent bounded write: the session ends when
/// `written == target`, regardless of how large the object already was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendSession {
    pub key: ObjectKey,
    /// Absolute object offset of the first byte written by this call
    pub start_offset: u64,
    pub written: u64,
    pub target: u64,
}

impl AppendSession {
    fn new(key: &ObjectKey, start_offset: u64, target: u64) -> Self {
        Self {
            key: key.clone(),
            start_offset,
            written: 0,
            target,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.target - self.written
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.target
    }
}

/// Writes deterministic payload bytes into new or existing objects.
#[derive(Debug, Clone)]
pub struct AppendWriter {
    payload: Payload,
    chunk_len: usize,
}

impl AppendWriter {
    /// `chunk_len` is clamped to at least one byte.
    pub fn new(chunk_len: usize, modulus: usize) -> Self {
        Self {
            payload: Payload::new(modulus),
            chunk_len: chunk_len.max(1),
        }
    }

    pub fn payload(&self) -> Payload {
        self.payload
    }

    /// Create (or replace) `key` with exactly `size` payload bytes.
    #[instrument(skip(self, store), fields(chunk = self.chunk_len))]
    pub async fn write(
        &self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
        size: u64,
    ) -> Result<u64, WriteFault> {
        let stream = store
            .open_for_write(key, WriteMode::New)
            .await
            .map_err(|e| WriteFault::new(e, 0))?;
        let session = AppendSession::new(key, 0, size);
        self.drive(stream, session).await
    }

    /// Add `size` payload bytes at the end of an existing object.
    ///
    /// The pattern continues from the current object length so the whole
    /// object keeps satisfying `value[i] = i mod modulus`.
    #[instrument(skip(self, store), fields(chunk = self.chunk_len))]
    pub async fn append(
        &self,
        store: &dyn ObjectStore,
        key: &ObjectKey,
        size: u64,
    ) -> Result<u64, WriteFault> {
        let start = store
            .object_len(key)
            .await
            .map_err(|e| WriteFault::new(e, 0))?;
        let stream = store
            .open_for_write(key, WriteMode::Append)
            .await
            .map_err(|e| WriteFault::new(e, 0))?;
        let session = AppendSession::new(key, start, size);
        self.drive(stream, session).await
    }

    /// Pump the session to completion, then close the stream exactly once.
    async fn drive(
        &self,
        mut stream: Box<dyn WriteStream>,
        mut session: AppendSession,
    ) -> Result<u64, WriteFault> {
        let pumped = self.pump(stream.as_mut(), &mut session).await;
        let closed = stream.close().await;

        match (pumped, closed) {
            (Ok(()), Ok(())) => {
                debug!(
                    "Wrote {} bytes to {} at offset {}",
                    session.written, session.key, session.start_offset
                );
                Ok(session.written)
            }
            (Ok(()), Err(close_err)) => Err(WriteFault::new(close_err, session.written)),
            (Err(primary), close_result) => Err(WriteFault {
                primary,
                secondary: close_result.err(),
                written: session.written,
            }),
        }
    }

    async fn pump(
        &self,
        stream: &mut dyn WriteStream,
        session: &mut AppendSession,
    ) -> Result<(), StorageError> {
        let buf_len = session.remaining().min(self.chunk_len as u64) as usize;
        let mut buf = vec![0u8; buf_len];
        while !session.is_complete() {
            let len = session.remaining().min(buf_len as u64) as usize;
            let chunk = &mut buf[..len];
            self.payload
                .fill(session.start_offset + session.written, chunk);

            let mut sent = 0;
            while sent < len {
                let n = stream.write(&chunk[sent..]).await?;
                if n == 0 {
                    return Err(StorageError::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        format!("store accepted no bytes for {}", session.key),
                    )));
                }
                if n > len - sent {
                    return Err(StorageError::Other(format!(
                        "store reported {} bytes accepted for {} but was given {}",
                        n,
                        session.key,
                        len - sent
                    )));
                }
                sent += n;
                session.written += n as u64;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn key(s: &str) -> ObjectKey {
        ObjectKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_write_then_append_continues_pattern() {
        let store = MemoryBackend::new("b", "o");
        let writer = AppendWriter::new(7, 5);
        let k = key("root/obj");

        assert_eq!(writer.write(&store, &k, 12).await.unwrap(), 12);
        assert_eq!(writer.append(&store, &k, 9).await.unwrap(), 9);

        let data = store.read(&k).await.unwrap();
        assert_eq!(data, Payload::new(5).generate(21));
    }

    #[tokio::test]
    async fn test_zero_size_write_creates_empty_object() {
        let store = MemoryBackend::new("b", "o");
        let writer = AppendWriter::new(128, 128);
        let k = key("empty");
        assert_eq!(writer.write(&store, &k, 0).await.unwrap(), 0);
        assert_eq!(store.object_len(&k).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_to_missing_object_fails_without_writing() {
        let store = MemoryBackend::new("b", "o");
        let writer = AppendWriter::new(128, 128);
        let fault = writer.append(&store, &key("missing"), 10).await.unwrap_err();
        assert!(matches!(fault.primary, StorageError::NotFound(_)));
        assert!(fault.secondary.is_none());
        assert_eq!(fault.written, 0);
    }

    #[test]
    fn test_fault_display_mentions_secondary() {
        let fault = WriteFault {
            primary: StorageError::DiskFull,
            secondary: Some(StorageError::Other("close".into())),
            written: 3,
        };
        let text = fault.to_string();
        assert!(text.starts_with("Insufficient storage"));
        assert!(text.contains("close also failed"));
    }

    #[test]
    fn test_session_accounting() {
        let mut s = AppendSession::new(&key("k"), 100, 10);
        assert_eq!(s.remaining(), 10);
        s.written = 10;
        assert!(s.is_complete());
    }
}
