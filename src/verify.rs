//! Post-write verification: object presence, content, and ACL grants

use crate::payload::Payload;
use crate::storage::{ObjectStore, StorageError};
use crate::types::{AccessGrant, ObjectKey, Permission};
use thiserror::Error;
use tracing::{debug, warn};

/// A check that ran to completion and found the store in the wrong state.
///
/// This is the reportable outcome of a scenario, distinct from a fault
/// talking to the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("{key}: not created successfully")]
    PathMissing { key: ObjectKey },

    #[error("{key}: expected {expected} bytes, found {actual}")]
    LengthMismatch {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("{key}: byte at offset {offset} is {actual}, expected {expected}")]
    ContentMismatch {
        key: ObjectKey,
        offset: u64,
        expected: u8,
        actual: u8,
    },

    #[error("{key}: no grant ({grantee}, {permission}) among {observed:?}")]
    GrantMissing {
        key: ObjectKey,
        grantee: String,
        permission: Permission,
        observed: Vec<AccessGrant>,
    },
}

/// Result of one ACL fetch-and-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantCheck {
    pub matched: bool,
    pub observed: Vec<AccessGrant>,
}

/// Checks object ACLs for an expected (grantee, permission) pair.
///
/// Each call fetches the grant set fresh and checks it once. Object stores
/// may publish ACLs after the data becomes readable; a miss right after a
/// write can therefore be propagation delay rather than a wrong ACL.
pub struct AclVerifier;

impl AclVerifier {
    /// Fetch the grants of `key` and look for an exact match.
    pub async fn check(
        store: &dyn ObjectStore,
        key: &ObjectKey,
        grantee: &str,
        permission: &Permission,
    ) -> Result<GrantCheck, StorageError> {
        let acl = store.get_object_acl(store.bucket(), key).await?;
        let matched = acl.contains(grantee, permission);
        debug!(
            "ACL of {} has {} grants, ({}, {}) matched={}",
            key,
            acl.grants.len(),
            grantee,
            permission,
            matched
        );
        if !matched {
            warn!(
                "Grant ({}, {}) missing on {}; ACL propagation may lag the write (checked once, no retry)",
                grantee, permission, key
            );
        }
        Ok(GrantCheck {
            matched,
            observed: acl.grants,
        })
    }

    /// True iff the ACL of `key` holds `(grantee, permission)`.
    pub async fn verify_grant(
        store: &dyn ObjectStore,
        key: &ObjectKey,
        grantee: &str,
        permission: &Permission,
    ) -> Result<bool, StorageError> {
        Ok(Self::check(store, key, grantee, permission).await?.matched)
    }

    /// Like [`AclVerifier::verify_grant`] but yields a reportable failure.
    pub async fn require_grant(
        store: &dyn ObjectStore,
        key: &ObjectKey,
        grant: &AccessGrant,
    ) -> Result<Result<(), VerificationFailure>, StorageError> {
        let check = Self::check(store, key, &grant.grantee_id, &grant.permission).await?;
        Ok(if check.matched {
            Ok(())
        } else {
            Err(VerificationFailure::GrantMissing {
                key: key.clone(),
                grantee: grant.grantee_id.clone(),
                permission: grant.permission.clone(),
                observed: check.observed,
            })
        })
    }
}

/// Fail with `PathMissing` unless `key` exists.
pub async fn assert_path_exists(
    store: &dyn ObjectStore,
    key: &ObjectKey,
) -> Result<(), VerificationFailure> {
    if store.exists(key).await {
        Ok(())
    } else {
        Err(VerificationFailure::PathMissing { key: key.clone() })
    }
}

/// Re-read `key` and compare it with the payload of length `expected_len`.
///
/// The object is compared in windows of `window` bytes so the first
/// divergent offset is reported.
pub async fn verify_received_data(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    expected_len: u64,
    payload: Payload,
    window: usize,
) -> Result<Result<(), VerificationFailure>, StorageError> {
    let data = store.read(key).await?;
    let actual = data.len() as u64;
    if actual != expected_len {
        return Ok(Err(VerificationFailure::LengthMismatch {
            key: key.clone(),
            expected: expected_len,
            actual,
        }));
    }

    let window = window.max(1);
    for (idx, block) in data.chunks(window).enumerate() {
        let offset = (idx * window) as u64;
        if let Some(m) = payload.first_mismatch(block, offset) {
            return Ok(Err(VerificationFailure::ContentMismatch {
                key: key.clone(),
                offset: m.offset,
                expected: m.expected,
                actual: m.actual,
            }));
        }
    }
    debug!("Verified {} bytes of {}", actual, key);
    Ok(Ok(()))
}
