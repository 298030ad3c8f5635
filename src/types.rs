//! Core types shared by the storage backends, the writer and the verifier

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when validating user-provided object keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct KeyValidationError(String);

/// Object key relative to the bucket root, e.g. `test-root/test-obs/mkdir-zh`.
///
/// Keys are path-like: segments separated by `/`, never starting or ending
/// with a slash. Directory markers are derived with [`ObjectKey::dir_marker`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey {
    path: String,
}

impl ObjectKey {
    /// Parse a key, trimming the leading slash of absolute paths
    /// (`/test-root/a` and `test-root/a` name the same object).
    pub fn parse(key: &str) -> Result<Self, KeyValidationError> {
        let trimmed = key.trim_start_matches('/').trim_end_matches('/');
        validate_key_path(trimmed)?;
        Ok(Self {
            path: trimmed.to_string(),
        })
    }

    /// Append a single path segment.
    pub fn join(&self, name: &str) -> Result<Self, KeyValidationError> {
        if name.contains('/') {
            return Err(KeyValidationError(format!(
                "Path segment must not contain '/': {}",
                name
            )));
        }
        Self::parse(&format!("{}/{}", self.path, name))
    }

    /// Parent key, or `None` for a single-segment key.
    pub fn parent(&self) -> Option<Self> {
        self.path.rfind('/').map(|idx| Self {
            path: self.path[..idx].to_string(),
        })
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Zero-byte directory marker key used by flat object buckets.
    pub fn dir_marker(&self) -> String {
        format!("{}/", self.path)
    }

    /// True if `other` equals this key or lives below it.
    pub fn contains(&self, other: &ObjectKey) -> bool {
        other.path == self.path
            || (other.path.len() > self.path.len()
                && other.path.starts_with(&self.path)
                && other.path.as_bytes()[self.path.len()] == b'/')
    }

    /// All ancestors from the top-level segment down to (and including) self.
    pub fn ancestors_inclusive(&self) -> Vec<ObjectKey> {
        let mut out = Vec::new();
        for (idx, ch) in self.path.char_indices() {
            if ch == '/' {
                out.push(Self {
                    path: self.path[..idx].to_string(),
                });
            }
        }
        out.push(self.clone());
        out
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = KeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.path
    }
}

impl FromStr for ObjectKey {
    type Err = KeyValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_key_path(value: &str) -> Result<(), KeyValidationError> {
    if value.is_empty() {
        return Err(KeyValidationError(
            "Object key must not be empty".to_string(),
        ));
    }
    if value.contains('\0') {
        return Err(KeyValidationError(
            "Key must not contain NUL bytes".to_string(),
        ));
    }
    if value.contains('\\') {
        return Err(KeyValidationError(
            "Key must not contain backslashes".to_string(),
        ));
    }

    for segment in value.split('/') {
        if segment.is_empty() {
            return Err(KeyValidationError(
                "Key must not contain empty path segments".to_string(),
            ));
        }
        if segment == "." || segment == ".." {
            return Err(KeyValidationError(
                "Key must not contain '.' or '..' path segments".to_string(),
            ));
        }
    }

    Ok(())
}

/// Permission level carried by an access grant.
///
/// Vendor-specific levels the probe does not know about are preserved in
/// `Other` so that comparisons remain exact string matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Permission {
    Read,
    Write,
    ReadAcp,
    WriteAcp,
    FullControl,
    Other(String),
}

impl Permission {
    pub fn as_str(&self) -> &str {
        match self {
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::ReadAcp => "READ_ACP",
            Permission::WriteAcp => "WRITE_ACP",
            Permission::FullControl => "FULL_CONTROL",
            Permission::Other(s) => s,
        }
    }
}

impl From<&str> for Permission {
    fn from(value: &str) -> Self {
        match value {
            "READ" => Permission::Read,
            "WRITE" => Permission::Write,
            "READ_ACP" => Permission::ReadAcp,
            "WRITE_ACP" => Permission::WriteAcp,
            "FULL_CONTROL" => Permission::FullControl,
            other => Permission::Other(other.to_string()),
        }
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Permission::from(value.as_str())
    }
}

impl From<Permission> for String {
    fn from(p: Permission) -> Self {
        p.as_str().to_string()
    }
}

impl FromStr for Permission {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Permission::from(s))
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (grantee, permission) pair attached to an object or prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessGrant {
    pub grantee_id: String,
    pub permission: Permission,
}

impl AccessGrant {
    pub fn new(grantee_id: impl Into<String>, permission: Permission) -> Self {
        Self {
            grantee_id: grantee_id.into(),
            permission,
        }
    }

    /// Exact string equality on both fields; no wildcard or hierarchy matching.
    pub fn matches(&self, grantee_id: &str, permission: &Permission) -> bool {
        self.grantee_id == grantee_id && self.permission.as_str() == permission.as_str()
    }
}

impl fmt::Display for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.grantee_id, self.permission)
    }
}

/// Access-control list as returned by a store for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub grants: Vec<AccessGrant>,
}

impl AccessControlList {
    /// Canned ACL every backend applies to objects it creates.
    pub fn owner_full_control(owner: &str) -> Self {
        Self {
            owner: Some(owner.to_string()),
            grants: vec![AccessGrant::new(owner, Permission::FullControl)],
        }
    }

    pub fn contains(&self, grantee_id: &str, permission: &Permission) -> bool {
        self.grants.iter().any(|g| g.matches(grantee_id, permission))
    }
}

/// How a write stream treats an existing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the object, replacing any previous content on commit.
    New,
    /// Add bytes at the current end of an existing object.
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::New => f.write_str("new"),
            WriteMode::Append => f.write_str("append"),
        }
    }
}
