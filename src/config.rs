//! Configuration for the bucket ACL probe

use crate::types::Permission;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Owner account used by the local backends when none is configured.
pub const DEFAULT_OWNER_ID: &str = "domainiddomainiddomainiddo000001";

/// Probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Run the scenarios at all. When false every scenario is reported as skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Storage backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Scenario parameters
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Log level filter string.
    /// Set via config file or BAP_LOG_LEVEL env var. Overridden by RUST_LOG.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Local directory with FS-bucket semantics; ACLs live in xattrs
    Filesystem {
        /// Directory holding one subdirectory per bucket
        path: PathBuf,

        #[serde(default = "default_bucket")]
        bucket: String,

        /// Account reported as bucket owner and granted FULL_CONTROL
        #[serde(default = "default_owner_id")]
        owner_id: String,
    },

    /// In-process bucket, useful for dry runs of the scenario plumbing
    Memory {
        #[serde(default = "default_bucket")]
        bucket: String,

        #[serde(default = "default_owner_id")]
        owner_id: String,
    },

    /// S3-compatible object storage
    S3 {
        /// Endpoint URL for MinIO or another S3-compatible service.
        /// If not specified, uses AWS default endpoint
        #[serde(default)]
        endpoint: Option<String>,

        #[serde(default = "default_region")]
        region: String,

        bucket: String,

        /// Use path-style URLs (required for MinIO, LocalStack)
        #[serde(default = "default_force_path_style")]
        force_path_style: bool,

        #[serde(default)]
        access_key_id: Option<String>,

        #[serde(default)]
        secret_access_key: Option<String>,

        /// Bucket has directory semantics (directory markers are created
        /// and ACL lookups fall back to them)
        #[serde(default)]
        fs_bucket: bool,
    },
}

/// Parameters of the write/append/verify scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Length of each chunk handed to the write stream
    #[serde(default = "default_chunk_buffer_size")]
    pub chunk_buffer_size: usize,

    /// Payload pattern modulus
    #[serde(default = "default_modulus")]
    pub modulus: usize,

    /// Read-back window when verifying content
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,

    /// Shared root for all keys written by one run
    #[serde(default = "default_test_root")]
    pub test_root: String,

    /// Suffix that keeps parallel runs apart
    #[serde(default)]
    pub fork_id: Option<String>,

    /// Size of the initial upload in the append scenario
    #[serde(default = "default_file_size")]
    pub file_size: u64,

    #[serde(default = "default_append_size")]
    pub append_size: u64,

    #[serde(default = "default_append_times")]
    pub append_times: u32,

    /// Size of the local file staged for the copy scenario
    #[serde(default = "default_local_file_size")]
    pub local_file_size: u64,

    /// Grantee that must appear in every ACL. Unset means "bucket owner".
    #[serde(default)]
    pub expected_grantee: Option<String>,

    #[serde(default = "default_expected_permission")]
    pub expected_permission: Permission,
}

fn default_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "bucket_acl_probe=info".to_string()
}

fn default_bucket() -> String {
    "probe-bucket".to_string()
}

fn default_owner_id() -> String {
    DEFAULT_OWNER_ID.to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

fn default_chunk_buffer_size() -> usize {
    128
}

fn default_modulus() -> usize {
    128
}

fn default_stream_buffer_size() -> usize {
    4096
}

fn default_test_root() -> String {
    "test-root".to_string()
}

fn default_file_size() -> u64 {
    1024 * 1024
}

fn default_append_size() -> u64 {
    1024
}

fn default_append_times() -> u32 {
    3
}

fn default_local_file_size() -> u64 {
    1024 * 1024
}

fn default_expected_permission() -> Permission {
    Permission::FullControl
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Filesystem {
            path: PathBuf::from("./data"),
            bucket: default_bucket(),
            owner_id: default_owner_id(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            chunk_buffer_size: default_chunk_buffer_size(),
            modulus: default_modulus(),
            stream_buffer_size: default_stream_buffer_size(),
            test_root: default_test_root(),
            fork_id: None,
            file_size: default_file_size(),
            append_size: default_append_size(),
            append_times: default_append_times(),
            local_file_size: default_local_file_size(),
            expected_grantee: None,
            expected_permission: default_expected_permission(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            backend: BackendConfig::default(),
            probe: ProbeConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl ProbeConfig {
    /// Reject parameters the writer cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "chunk_buffer_size must be greater than zero".into(),
            ));
        }
        if self.modulus == 0 {
            return Err(ConfigError::Invalid(
                "modulus must be greater than zero".into(),
            ));
        }
        if self.stream_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "stream_buffer_size must be greater than zero".into(),
            ));
        }
        if self.test_root.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("test_root must not be empty".into()));
        }
        Ok(())
    }
}

/// Parse a boolean env var value ("true"/"1").
fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v == "true" || v == "1")
}

/// Parse a numeric env var, ignoring unparseable values.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(enabled) = env_flag("BAP_ENABLED") {
            config.enabled = enabled;
        }

        if let Ok(bucket) = std::env::var("BAP_S3_BUCKET") {
            config.backend = BackendConfig::S3 {
                endpoint: std::env::var("BAP_S3_ENDPOINT").ok(),
                region: std::env::var("BAP_S3_REGION").unwrap_or_else(|_| default_region()),
                bucket,
                force_path_style: env_flag("BAP_S3_PATH_STYLE").unwrap_or(true),
                access_key_id: std::env::var("BAP_S3_ACCESS_KEY_ID").ok(),
                secret_access_key: std::env::var("BAP_S3_SECRET_ACCESS_KEY").ok(),
                fs_bucket: env_flag("BAP_S3_FS_BUCKET").unwrap_or(false),
            };
        } else if let Ok(dir) = std::env::var("BAP_DATA_DIR") {
            config.backend = BackendConfig::Filesystem {
                path: PathBuf::from(dir),
                bucket: std::env::var("BAP_BUCKET").unwrap_or_else(|_| default_bucket()),
                owner_id: std::env::var("BAP_OWNER_ID").unwrap_or_else(|_| default_owner_id()),
            };
        }

        let probe = &mut config.probe;
        if let Some(v) = env_parse("BAP_CHUNK_BUFFER_SIZE") {
            probe.chunk_buffer_size = v;
        }
        if let Some(v) = env_parse("BAP_MODULUS") {
            probe.modulus = v;
        }
        if let Ok(root) = std::env::var("BAP_TEST_ROOT") {
            probe.test_root = root;
        }
        probe.fork_id = std::env::var("BAP_FORK_ID").ok();
        if let Some(v) = env_parse("BAP_FILE_SIZE") {
            probe.file_size = v;
        }
        if let Some(v) = env_parse("BAP_APPEND_SIZE") {
            probe.append_size = v;
        }
        if let Some(v) = env_parse("BAP_APPEND_TIMES") {
            probe.append_times = v;
        }
        probe.expected_grantee = std::env::var("BAP_EXPECTED_GRANTEE").ok();
        if let Ok(p) = std::env::var("BAP_EXPECTED_PERMISSION") {
            probe.expected_permission = Permission::from(p);
        }

        if let Ok(level) = std::env::var("BAP_LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("BAP_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        for path in &["bucket_acl_probe.toml", "/etc/bucket_acl_probe/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// Serialize config to TOML string (credentials stripped).
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let mut export = self.clone();
        if let BackendConfig::S3 {
            ref mut secret_access_key,
            ..
        } = export.backend
        {
            *secret_access_key = None;
        }
        toml::to_string_pretty(&export).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
