//! Resolution of the grant each scenario expects to find

use crate::storage::{ObjectStore, StorageError};
use crate::types::{AccessGrant, Permission};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Whose grant a scenario looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Whoever owns the bucket under test
    BucketOwner,
    /// A specific account id
    Account(String),
}

/// Maps a principal to the (grantee, permission) pair an ACL must contain.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn expected_grant(&self, principal: &Principal) -> Result<AccessGrant, StorageError>;
}

/// Resolves the bucket owner through the store; accounts map directly.
pub struct BucketOwnerOracle {
    store: Arc<dyn ObjectStore>,
    permission: Permission,
}

impl BucketOwnerOracle {
    pub fn new(store: Arc<dyn ObjectStore>, permission: Permission) -> Self {
        Self { store, permission }
    }
}

#[async_trait]
impl PermissionOracle for BucketOwnerOracle {
    async fn expected_grant(&self, principal: &Principal) -> Result<AccessGrant, StorageError> {
        let grantee = match principal {
            Principal::BucketOwner => self.store.bucket_owner().await?,
            Principal::Account(id) => id.clone(),
        };
        debug!("Expecting grant ({}, {})", grantee, self.permission);
        Ok(AccessGrant::new(grantee, self.permission.clone()))
    }
}

/// Always expects the same grant.
pub struct StaticOracle {
    grant: AccessGrant,
}

impl StaticOracle {
    pub fn new(grant: AccessGrant) -> Self {
        Self { grant }
    }
}

#[async_trait]
impl PermissionOracle for StaticOracle {
    async fn expected_grant(&self, _principal: &Principal) -> Result<AccessGrant, StorageError> {
        Ok(self.grant.clone())
    }
}
