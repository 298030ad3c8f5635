//! S3 object store implementation using AWS SDK
//!
//! Object ACLs are read with GetObjectAcl, the bucket owner with
//! GetBucketAcl. S3 has no append primitive, so append streams are emulated
//! by read-modify-write on close; the rewritten object receives the bucket's
//! default ACL again. Directories exist only when the bucket is configured as
//! an FS bucket, in which case they are zero-byte `key/` markers.

use super::traits::{ObjectStore, StorageError, WriteStream};
use crate::config::BackendConfig;
use crate::types::{AccessControlList, AccessGrant, ObjectKey, Permission, WriteMode};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::get_object_acl::GetObjectAclError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use std::path::Path;
use tracing::{debug, instrument};

/// S3 DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH: usize = 1000;

/// S3 object store for one bucket
pub struct S3Backend {
    client: Client,
    bucket: String,
    fs_bucket: bool,
}

/// Classify an S3 SDK error.
///
/// `NoSuchBucket` maps to `BucketNotFound`; a 403 maps to `AccessDenied`
/// (reading an ACL requires READ_ACP, which a writer may lack).
fn classify_s3_error(
    bucket: &str,
    e: &SdkError<impl std::fmt::Debug>,
    context: &str,
) -> StorageError {
    let debug_str = format!("{:?}", e);
    if debug_str.contains("NoSuchBucket") {
        return StorageError::BucketNotFound(bucket.to_string());
    }
    if let SdkError::ServiceError(ref svc) = e {
        if svc.raw().status().as_u16() == 403 {
            return StorageError::AccessDenied(format!("{} on {}", context, bucket));
        }
    }
    StorageError::S3(format!("{} failed: {}", context, e))
}

async fn put_object_bytes(
    client: &Client,
    bucket: &str,
    key: &str,
    body: Bytes,
) -> Result<(), StorageError> {
    let len = body.len();
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type("application/octet-stream")
        .send()
        .await
        .map_err(|e| classify_s3_error(bucket, &e, "put_object"))?;
    debug!("S3 PUT {}/{} ({} bytes)", bucket, key, len);
    Ok(())
}

async fn get_object_bytes(client: &Client, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
    let response = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            if let SdkError::ServiceError(service_error) = &e {
                if matches!(service_error.err(), GetObjectError::NoSuchKey(_)) {
                    return StorageError::NotFound(key.to_string());
                }
            }
            classify_s3_error(bucket, &e, "get_object")
        })?;

    let data = response
        .body
        .collect()
        .await
        .map_err(|e| StorageError::S3(format!("Failed to read response body: {}", e)))?
        .into_bytes()
        .to_vec();

    debug!("S3 GET {}/{} ({} bytes)", bucket, key, data.len());
    Ok(data)
}

impl S3Backend {
    /// Build an S3 client from a BackendConfig without creating an S3Backend.
    pub async fn build_client(config: &BackendConfig) -> Result<Client, StorageError> {
        let (endpoint, region, force_path_style, access_key_id, secret_access_key) = match config {
            BackendConfig::S3 {
                endpoint,
                region,
                force_path_style,
                access_key_id,
                secret_access_key,
                ..
            } => (
                endpoint.clone(),
                region.clone(),
                *force_path_style,
                access_key_id.clone(),
                secret_access_key.clone(),
            ),
            _ => {
                return Err(StorageError::Other(
                    "S3Backend requires S3 configuration".to_string(),
                ))
            }
        };

        // Explicit credentials only; the default AWS credential chain is never consulted
        let credentials = match (access_key_id, secret_access_key) {
            (Some(ref key_id), Some(ref secret)) => {
                Credentials::new(key_id, secret, None, None, "bucket_acl_probe-config")
            }
            _ => {
                return Err(StorageError::Other(
                    "S3 backend requires explicit credentials: set BAP_S3_ACCESS_KEY_ID and BAP_S3_SECRET_ACCESS_KEY".to_string(),
                ));
            }
        };

        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(force_path_style);

        if let Some(ref ep) = endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(ep);
        }

        Ok(Client::from_conf(s3_config_builder.build()))
    }

    /// Create a new S3 backend from configuration
    pub async fn new(config: &BackendConfig) -> Result<Self, StorageError> {
        let (bucket, fs_bucket) = match config {
            BackendConfig::S3 {
                bucket, fs_bucket, ..
            } => (bucket.clone(), *fs_bucket),
            _ => {
                return Err(StorageError::Other(
                    "S3Backend requires S3 configuration".to_string(),
                ))
            }
        };
        let client = Self::build_client(config).await?;
        debug!("S3Backend initialized for bucket {} (fs_bucket={})", bucket, fs_bucket);
        Ok(Self {
            client,
            bucket,
            fs_bucket,
        })
    }

    /// HEAD an S3 key, returning its length or `NotFound`.
    async fn head_len(&self, key: &str) -> Result<u64, StorageError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if matches!(service_error.err(), HeadObjectError::NotFound(_)) {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                classify_s3_error(&self.bucket, &e, "head_object")
            })?;
        Ok(response.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn fetch_acl(&self, bucket: &str, key: &str) -> Result<AccessControlList, StorageError> {
        let response = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if matches!(service_error.err(), GetObjectAclError::NoSuchKey(_)) {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                classify_s3_error(bucket, &e, "get_object_acl")
            })?;

        let grants = response
            .grants()
            .iter()
            .filter_map(|grant| {
                let grantee = grant.grantee()?;
                let id = grantee
                    .id()
                    .or_else(|| grantee.uri())
                    .or_else(|| grantee.email_address())?;
                let permission = grant.permission()?;
                Some(AccessGrant::new(id, Permission::from(permission.as_str())))
            })
            .collect();

        Ok(AccessControlList {
            owner: response.owner().and_then(|o| o.id()).map(str::to_string),
            grants,
        })
    }

    /// List all S3 keys starting with `prefix`, following continuation tokens.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| classify_s3_error(&self.bucket, &e, "list_objects_v2"))?;

            results.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );

            if response.is_truncated().unwrap_or(false) {
                continuation_token = response.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(results)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), StorageError> {
        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::S3(format!("Invalid delete request: {}", e)))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::S3(format!("Invalid delete request: {}", e)))?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| classify_s3_error(&self.bucket, &e, "delete_objects"))?;
            debug!("S3 batch DELETE {} keys in {}", batch.len(), self.bucket);
        }
        Ok(())
    }
}

/// Buffers a whole object and uploads it on close.
struct S3WriteStream {
    client: Client,
    bucket: String,
    key: ObjectKey,
    mode: WriteMode,
    buffer: BytesMut,
    closed: bool,
}

#[async_trait]
impl WriteStream for S3WriteStream {
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
        let tail = std::mem::take(&mut self.buffer).freeze();
        let body = match self.mode {
            WriteMode::New => tail,
            WriteMode::Append => {
                let existing =
                    get_object_bytes(&self.client, &self.bucket, self.key.as_str()).await?;
                let mut combined = BytesMut::with_capacity(existing.len() + tail.len());
                combined.extend_from_slice(&existing);
                combined.extend_from_slice(&tail);
                combined.freeze()
            }
        };
        put_object_bytes(&self.client, &self.bucket, self.key.as_str(), body).await
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn supports_directories(&self) -> bool {
        self.fs_bucket
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
        if mode == WriteMode::Append {
            self.head_len(key.as_str()).await?;
        }
        Ok(Box::new(S3WriteStream {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.clone(),
            mode,
            buffer: BytesMut::new(),
            closed: false,
        }))
    }

    #[instrument(skip(self))]
    async fn read(&self, key: &ObjectKey) -> Result<Vec<u8>, StorageError> {
        get_object_bytes(&self.client, &self.bucket, key.as_str()).await
    }

    async fn exists(&self, key: &ObjectKey) -> bool {
        if self.head_len(key.as_str()).await.is_ok() {
            return true;
        }
        self.fs_bucket && self.head_len(&key.dir_marker()).await.is_ok()
    }

    async fn object_len(&self, key: &ObjectKey) -> Result<u64, StorageError> {
        match self.head_len(key.as_str()).await {
            Err(StorageError::NotFound(_)) if self.fs_bucket => {
                self.head_len(&key.dir_marker()).await.map(|_| 0)
            }
            other => other,
        }
    }

    #[instrument(skip(self))]
    async fn get_object_acl(
        &self,
        bucket: &str,
        key: &ObjectKey,
    ) -> Result<AccessControlList, StorageError> {
        match self.fetch_acl(bucket, key.as_str()).await {
            Err(StorageError::NotFound(_)) if self.fs_bucket => {
                self.fetch_acl(bucket, &key.dir_marker()).await
            }
            other => other,
        }
    }

    async fn bucket_owner(&self) -> Result<String, StorageError> {
        let response = self
            .client
            .get_bucket_acl()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify_s3_error(&self.bucket, &e, "get_bucket_acl"))?;
        response
            .owner()
            .and_then(|o| o.id())
            .map(str::to_string)
            .ok_or_else(|| StorageError::S3(format!("Bucket {} reports no owner", self.bucket)))
    }

    #[instrument(skip(self))]
    async fn mkdirs(&self, key: &ObjectKey) -> Result<(), StorageError> {
        if !self.fs_bucket {
            return Err(StorageError::Unsupported(format!(
                "mkdirs on object bucket {}",
                self.bucket
            )));
        }
        for dir in key.ancestors_inclusive() {
            put_object_bytes(&self.client, &self.bucket, &dir.dir_marker(), Bytes::new()).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_local_file(
        &self,
        local: &Path,
        dest: &ObjectKey,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        if !tokio::fs::try_exists(local).await.unwrap_or(false) {
            return Err(StorageError::NotFound(local.display().to_string()));
        }
        if !overwrite && self.head_len(dest.as_str()).await.is_ok() {
            return Err(StorageError::AlreadyExists(dest.to_string()));
        }
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StorageError::Other(format!("Cannot read {}: {}", local.display(), e)))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(dest.as_str())
            .body(body)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| classify_s3_error(&self.bucket, &e, "put_object"))?;
        debug!("S3 upload {:?} -> {}/{}", local, self.bucket, dest);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &ObjectKey, recursive: bool) -> Result<bool, StorageError> {
        let marker = key.dir_marker();
        let below = self.list_keys(&marker).await?;
        let has_children = below.iter().any(|k| *k != marker);
        if has_children && !recursive {
            return Err(StorageError::DirectoryNotEmpty(key.to_string()));
        }

        let mut doomed = below;
        if self.head_len(key.as_str()).await.is_ok() {
            doomed.push(key.to_string());
        }
        if doomed.is_empty() {
            return Ok(false);
        }
        self.delete_keys(&doomed).await?;
        Ok(true)
    }

    async fn list(&self, prefix: &ObjectKey) -> Result<Vec<String>, StorageError> {
        let mut keys = self.list_keys(&prefix.dir_marker()).await?;
        keys.retain(|k| *k != prefix.dir_marker());
        if keys.is_empty() && self.head_len(prefix.as_str()).await.is_ok() {
            return Ok(vec![prefix.to_string()]);
        }
        keys.sort();
        Ok(keys)
    }
}
