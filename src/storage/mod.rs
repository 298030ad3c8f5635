//! Object store abstraction

mod acl_xattr;
mod filesystem;
mod memory;
mod s3;
mod traits;

pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
pub use s3::S3Backend;
pub use traits::{ObjectStore, StorageError, WriteStream};

use crate::config::BackendConfig;
use std::sync::Arc;

/// Build the store selected by the backend configuration.
pub async fn from_config(config: &BackendConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let store: Arc<dyn ObjectStore> = match config {
        BackendConfig::Filesystem {
            path,
            bucket,
            owner_id,
        } => Arc::new(FilesystemBackend::new(path.clone(), bucket, owner_id).await?),
        BackendConfig::Memory { bucket, owner_id } => {
            Arc::new(MemoryBackend::new(bucket, owner_id))
        }
        BackendConfig::S3 { .. } => Arc::new(S3Backend::new(config).await?),
    };
    Ok(store)
}
