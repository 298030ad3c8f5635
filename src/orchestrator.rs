//! Scenario driver: setup, write/append, verify, teardown
//!
//! Scenarios run strictly one after another with a single request in flight.
//! Each ends with a best-effort recursive delete of the shared test root.

use crate::config::{ConfigError, ProbeConfig};
use crate::oracle::{BucketOwnerOracle, PermissionOracle, Principal};
use crate::storage::{ObjectStore, StorageError};
use crate::types::{KeyValidationError, ObjectKey};
use crate::verify::{assert_path_exists, verify_received_data, AclVerifier, VerificationFailure};
use crate::writer::{AppendWriter, WriteFault};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Directory below the test root that holds append targets and mkdir keys.
const TEST_DIR: &str = "test-obs";
const MKDIR_NAME: &str = "mkdir-zh";
const COPY_DEST_NAME: &str = "copylocal-huge";
const LOCAL_FILE_NAME: &str = "local_file";

/// The behaviours the probe exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Upload, append several times, verify content and owner grant
    UploadAppend,
    /// Create a directory and verify its owner grant
    Mkdir,
    /// Copy a local file into the bucket and verify its owner grant
    CopyFromLocal,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::UploadAppend, Scenario::Mkdir, Scenario::CopyFromLocal];
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scenario::UploadAppend => "upload-append",
            Scenario::Mkdir => "mkdir",
            Scenario::CopyFromLocal => "copy-from-local",
        })
    }
}

/// Anything that stops a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Write(#[from] WriteFault),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    InvalidKey(#[from] KeyValidationError),

    #[error(transparent)]
    Verification(#[from] VerificationFailure),
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

/// Final state of one scenario.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    /// Not applicable to this store (or probing disabled)
    Skipped(String),
    /// Ran to completion but found the wrong state
    Failed(#[serde(serialize_with = "serialize_display")] VerificationFailure),
    /// A fault talking to the store cut the scenario short
    Aborted(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::Aborted(_))
    }
}

/// What happened in one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub outcome: Outcome,
    /// Payload bytes the store accepted, including appends
    pub bytes_committed: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Reports of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<ScenarioReport>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failure)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// Reports for a run that never touched the store.
    pub fn all_skipped(scenarios: &[Scenario], reason: &str) -> Self {
        Self {
            reports: scenarios
                .iter()
                .map(|&scenario| ScenarioReport {
                    scenario,
                    outcome: Outcome::Skipped(reason.to_string()),
                    bytes_committed: 0,
                    started_at: Utc::now(),
                    elapsed_ms: 0,
                })
                .collect(),
        }
    }
}

/// Test root for a run: the configured root, plus the fork id when several
/// probes share one bucket.
pub fn unique_test_root(base: &str, fork_id: Option<&str>) -> Result<ObjectKey, KeyValidationError> {
    let root = ObjectKey::parse(base)?;
    match fork_id {
        Some(id) if !id.is_empty() => root.join(id),
        _ => Ok(root),
    }
}

/// Log upload bandwidth in MB/s.
fn log_bandwidth(elapsed: Duration, bytes: u64) {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        info!(
            "Bandwidth = {:.3} MB/s ({} bytes in {:?})",
            bytes as f64 / secs / 1_000_000.0,
            bytes,
            elapsed
        );
    }
}

/// Drives scenarios against one store.
pub struct TestOrchestrator {
    store: Arc<dyn ObjectStore>,
    oracle: Arc<dyn PermissionOracle>,
    principal: Principal,
    probe: ProbeConfig,
    writer: AppendWriter,
    root: ObjectKey,
}

impl TestOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        oracle: Arc<dyn PermissionOracle>,
        principal: Principal,
        probe: ProbeConfig,
    ) -> Result<Self, ConfigError> {
        probe.validate()?;
        let root = unique_test_root(&probe.test_root, probe.fork_id.as_deref())
            .map_err(|e| ConfigError::Invalid(format!("test_root: {}", e)))?;
        let writer = AppendWriter::new(probe.chunk_buffer_size, probe.modulus);
        Ok(Self {
            store,
            oracle,
            principal,
            probe,
            writer,
            root,
        })
    }

    /// Orchestrator expecting the configured grantee, or the bucket owner.
    pub fn from_config(store: Arc<dyn ObjectStore>, probe: ProbeConfig) -> Result<Self, ConfigError> {
        let oracle = Arc::new(BucketOwnerOracle::new(
            Arc::clone(&store),
            probe.expected_permission.clone(),
        ));
        let principal = match &probe.expected_grantee {
            Some(id) => Principal::Account(id.clone()),
            None => Principal::BucketOwner,
        };
        Self::new(store, oracle, principal, probe)
    }

    pub fn test_root(&self) -> &ObjectKey {
        &self.root
    }

    fn test_path(&self) -> Result<ObjectKey, KeyValidationError> {
        self.root.join(TEST_DIR)
    }

    fn skip_reason(&self, scenario: Scenario) -> Option<String> {
        match scenario {
            Scenario::UploadAppend if !self.store.supports_append() => {
                Some(format!("bucket {} does not support append", self.store.bucket()))
            }
            Scenario::Mkdir if !self.store.supports_directories() => Some(format!(
                "bucket {} is not an FS bucket (no directory support)",
                self.store.bucket()
            )),
            _ => None,
        }
    }

    /// Run the scenarios in order, tearing down after each.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> RunSummary {
        let mut summary = RunSummary::default();
        for &scenario in scenarios {
            summary.reports.push(self.run(scenario).await);
        }
        summary
    }

    /// Setup → write/append → verify → teardown for one scenario.
    pub async fn run(&self, scenario: Scenario) -> ScenarioReport {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut committed = 0u64;

        let outcome = match self.skip_reason(scenario) {
            Some(reason) => {
                info!("Skipping {}: {}", scenario, reason);
                Outcome::Skipped(reason)
            }
            None => {
                info!("Running {} under {}", scenario, self.root);
                let result = self.execute(scenario, &mut committed).await;
                self.teardown().await;
                match result {
                    Ok(()) => Outcome::Passed,
                    Err(ScenarioError::Verification(failure)) => Outcome::Failed(failure),
                    Err(fault) => Outcome::Aborted(fault.to_string()),
                }
            }
        };

        match &outcome {
            Outcome::Passed => info!("{} passed", scenario),
            Outcome::Failed(f) => warn!("{} failed: {}", scenario, f),
            Outcome::Aborted(e) => warn!("{} aborted: {}", scenario, e),
            Outcome::Skipped(_) => {}
        }

        ScenarioReport {
            scenario,
            outcome,
            bytes_committed: committed,
            started_at,
            elapsed_ms: timer.elapsed().as_millis() as u64,
        }
    }

    async fn execute(&self, scenario: Scenario, committed: &mut u64) -> Result<(), ScenarioError> {
        match scenario {
            Scenario::UploadAppend => {
                self.upload_append(
                    self.probe.file_size,
                    self.probe.append_size,
                    self.probe.append_times,
                    committed,
                )
                .await
            }
            Scenario::Mkdir => self.mkdir().await,
            Scenario::CopyFromLocal => self.copy_from_local(committed).await,
        }
    }

    /// Write `file_size` bytes, append `append_size` bytes `append_times`
    /// times, then check content and the expected grant on the final object.
    pub async fn upload_append(
        &self,
        file_size: u64,
        append_size: u64,
        append_times: u32,
        committed: &mut u64,
    ) -> Result<(), ScenarioError> {
        let store = self.store.as_ref();
        let key = self.test_path()?.join(&Uuid::new_v4().to_string())?;

        let timer = Instant::now();
        *committed = self.writer.write(store, &key, file_size).await?;
        log_bandwidth(timer.elapsed(), file_size);
        assert_path_exists(store, &key).await?;

        let mut expected = file_size;
        for i in 0..append_times {
            *committed += self.writer.append(store, &key, append_size).await?;
            expected += append_size;
            debug!("Append {} of {} done, {} bytes expected", i + 1, append_times, expected);
            assert_path_exists(store, &key).await?;
        }

        verify_received_data(
            store,
            &key,
            expected,
            self.writer.payload(),
            self.probe.stream_buffer_size,
        )
        .await??;
        self.verify_acl(&key).await
    }

    /// Create `root/test-obs/mkdir-zh` and check its grant.
    pub async fn mkdir(&self) -> Result<(), ScenarioError> {
        let key = self.test_path()?.join(MKDIR_NAME)?;
        self.store.mkdirs(&key).await?;
        assert_path_exists(self.store.as_ref(), &key).await?;
        self.verify_acl(&key).await
    }

    /// Stage a local payload file, copy it to `root/copylocal-huge` with
    /// overwrite, and check the destination's grant.
    pub async fn copy_from_local(&self, committed: &mut u64) -> Result<(), ScenarioError> {
        let staging = tempfile::tempdir().map_err(StorageError::from)?;
        let local = staging.path().join(LOCAL_FILE_NAME);
        let size = usize::try_from(self.probe.local_file_size).map_err(|_| {
            StorageError::Other(format!(
                "local_file_size {} exceeds addressable memory",
                self.probe.local_file_size
            ))
        })?;
        tokio::fs::write(&local, self.writer.payload().generate(size))
            .await
            .map_err(StorageError::from)?;
        debug!("Staged {} bytes at {:?}", size, local);

        let dest = self.root.join(COPY_DEST_NAME)?;
        self.store.copy_local_file(&local, &dest, true).await?;
        *committed = self.probe.local_file_size;
        assert_path_exists(self.store.as_ref(), &dest).await?;

        let actual = self.store.object_len(&dest).await?;
        if actual != self.probe.local_file_size {
            return Err(VerificationFailure::LengthMismatch {
                key: dest,
                expected: self.probe.local_file_size,
                actual,
            }
            .into());
        }
        self.verify_acl(&dest).await
    }

    async fn verify_acl(&self, key: &ObjectKey) -> Result<(), ScenarioError> {
        let grant = self.oracle.expected_grant(&self.principal).await?;
        AclVerifier::require_grant(self.store.as_ref(), key, &grant).await??;
        Ok(())
    }

    /// Recursively delete the test root. Failures are logged, never raised.
    pub async fn teardown(&self) {
        match self.store.delete(&self.root, true).await {
            Ok(true) => debug!("Removed test root {}", self.root),
            Ok(false) => debug!("Test root {} was already gone", self.root),
            Err(e) => warn!("Teardown of {} failed: {}", self.root, e),
        }
    }
}
