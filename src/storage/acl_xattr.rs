//! xattr-based ACL storage for the filesystem backend.
//!
//! The access-control list of every object and directory the backend creates
//! is stored as a single `user.bap.acl` extended attribute on its inode, so
//! appends and renames carry the grants along with the data.

use super::traits::StorageError;
use crate::types::AccessControlList;
use std::path::Path;

/// The single xattr name used for ACL storage.
const XATTR_NAME: &str = "user.bap.acl";

/// Name of the file created in the bucket root to check xattr support.
pub(super) const XATTR_PROBE_FILE: &str = ".bap_xattr_probe";

/// ENOSPC raw error code on Linux and macOS.
const ENOSPC: i32 = 28;

/// Convert an io::Error into StorageError, detecting disk-full (ENOSPC).
pub(super) fn io_to_storage_error(e: std::io::Error) -> StorageError {
    if e.raw_os_error() == Some(ENOSPC) {
        StorageError::DiskFull
    } else {
        StorageError::Io(e)
    }
}

/// Read the ACL stored on a file or directory.
///
/// A path without the attribute yields an empty ACL (no grants), which the
/// verifier reports as a missing grant rather than a fault.
pub async fn read_acl(path: &Path) -> Result<AccessControlList, StorageError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || match xattr::get(&path, XATTR_NAME) {
        Ok(Some(data)) => Ok(serde_json::from_slice(&data)?),
        Ok(None) => Ok(AccessControlList::default()),
        Err(e) => Err(io_to_storage_error(e)),
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))?
}

/// Write an ACL as an xattr on a file or directory.
pub async fn write_acl(path: &Path, acl: &AccessControlList) -> Result<(), StorageError> {
    let path = path.to_path_buf();
    let json = serde_json::to_vec(acl)?;
    tokio::task::spawn_blocking(move || {
        xattr::set(&path, XATTR_NAME, &json).map_err(io_to_storage_error)
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))?
}

/// Validate that the filesystem at `root` supports extended attributes.
///
/// Creates a probe file, writes a test xattr, reads it back, then cleans up.
pub async fn validate_xattr_support(root: &Path) -> Result<(), StorageError> {
    let probe = root.join(XATTR_PROBE_FILE);

    tokio::task::spawn_blocking(move || {
        std::fs::write(&probe, b"xattr_probe").map_err(io_to_storage_error)?;

        let test_value = b"xattr_test_ok";
        let result = (|| -> Result<(), StorageError> {
            xattr::set(&probe, XATTR_NAME, test_value).map_err(io_to_storage_error)?;
            match xattr::get(&probe, XATTR_NAME).map_err(io_to_storage_error)? {
                Some(v) if v == test_value => Ok(()),
                _ => Err(StorageError::Other("xattr readback mismatch".into())),
            }
        })();

        // Always clean up probe file
        let _ = std::fs::remove_file(&probe);

        result.map_err(|_| {
            StorageError::Unsupported(
                "Filesystem at data directory does not support user extended attributes; \
                 ACLs cannot be stored (use ext4, XFS, Btrfs, tmpfs or APFS)"
                    .into(),
            )
        })
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {}", e)))?
}
