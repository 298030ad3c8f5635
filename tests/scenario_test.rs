//! End-to-end scenarios through TestOrchestrator

mod common;

use bucket_acl_probe::config::ProbeConfig;
use bucket_acl_probe::oracle::{Principal, StaticOracle};
use bucket_acl_probe::orchestrator::{Outcome, Scenario, TestOrchestrator};
use bucket_acl_probe::storage::{FilesystemBackend, MemoryBackend, ObjectStore};
use bucket_acl_probe::types::{AccessGrant, Permission};
use bucket_acl_probe::verify::VerificationFailure;
use common::{key, small_probe, FaultyStore, BUCKET, OWNER};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

async fn fs_store(dir: &TempDir) -> Arc<dyn ObjectStore> {
    Arc::new(
        FilesystemBackend::new(dir.path().to_path_buf(), BUCKET, OWNER)
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_upload_append_default_sizes_on_filesystem() {
    let dir = TempDir::new().unwrap();
    let store = fs_store(&dir).await;
    let orch = TestOrchestrator::from_config(Arc::clone(&store), ProbeConfig::default()).unwrap();

    let report = orch.run(Scenario::UploadAppend).await;

    assert!(matches!(report.outcome, Outcome::Passed), "{:?}", report.outcome);
    assert_eq!(report.bytes_committed, 1_051_648);
    assert!(!store.exists(orch.test_root()).await);
}

#[tokio::test]
async fn test_mkdir_creates_nested_directory() {
    let dir = TempDir::new().unwrap();
    let store = fs_store(&dir).await;
    let orch = TestOrchestrator::from_config(Arc::clone(&store), small_probe()).unwrap();

    orch.mkdir().await.unwrap();
    assert!(store.exists(&key("test-root/test-obs/mkdir-zh")).await);
    assert!(dir.path().join(BUCKET).join("test-root/test-obs/mkdir-zh").is_dir());

    orch.teardown().await;
    assert!(!store.exists(&key("test-root")).await);
}

#[tokio::test]
async fn test_copy_from_local_overwrites_destination() {
    let dir = TempDir::new().unwrap();
    let store = fs_store(&dir).await;
    let orch = TestOrchestrator::from_config(Arc::clone(&store), small_probe()).unwrap();
    let dest = key("test-root/copylocal-huge");

    let mut committed = 0;
    orch.copy_from_local(&mut committed).await.unwrap();
    orch.copy_from_local(&mut committed).await.unwrap();

    assert_eq!(committed, 2048);
    assert_eq!(store.object_len(&dest).await.unwrap(), 2048);
    orch.teardown().await;
}

#[tokio::test]
async fn test_zero_size_upload_still_checks_grant() {
    let dir = TempDir::new().unwrap();
    let store = fs_store(&dir).await;
    let orch = TestOrchestrator::from_config(Arc::clone(&store), small_probe()).unwrap();

    let mut committed = 0;
    orch.upload_append(0, 0, 0, &mut committed).await.unwrap();
    assert_eq!(committed, 0);

    let objects = store.list(&key("test-root/test-obs")).await.unwrap();
    assert_eq!(objects.len(), 1, "{:?}", objects);
    orch.teardown().await;
}

#[tokio::test]
async fn test_all_scenarios_pass_on_filesystem() {
    let dir = TempDir::new().unwrap();
    let store = fs_store(&dir).await;
    let orch = TestOrchestrator::from_config(store, small_probe()).unwrap();

    let summary = orch.run_all(&Scenario::ALL).await;

    assert_eq!(summary.passed(), 3, "{:?}", summary);
    assert!(summary.is_success());
    assert_eq!(summary.reports[0].bytes_committed, 8 * 1024 + 3 * 512);
}

#[tokio::test]
async fn test_teardown_failure_does_not_change_outcome() {
    let faulty = Arc::new(FaultyStore::memory());
    faulty.configure(|f| f.fail_delete = true);
    let store: Arc<dyn ObjectStore> = faulty.clone();
    let orch = TestOrchestrator::from_config(Arc::clone(&store), small_probe()).unwrap();

    let report = orch.run(Scenario::CopyFromLocal).await;

    assert!(matches!(report.outcome, Outcome::Passed), "{:?}", report.outcome);
    assert!(store.exists(&key("test-root/copylocal-huge")).await);
}

#[tokio::test]
async fn test_flat_bucket_skips_mkdir_only() {
    let store: Arc<dyn ObjectStore> =
        Arc::new(MemoryBackend::new(BUCKET, OWNER).without_directories());
    let orch = TestOrchestrator::from_config(store, small_probe()).unwrap();

    let summary = orch.run_all(&Scenario::ALL).await;

    assert!(matches!(summary.reports[0].outcome, Outcome::Passed));
    assert!(matches!(summary.reports[1].outcome, Outcome::Skipped(_)));
    assert!(matches!(summary.reports[2].outcome, Outcome::Passed));
    assert_eq!((summary.passed(), summary.skipped(), summary.failed()), (2, 1, 0));
}

#[tokio::test]
async fn test_write_fault_aborts_and_still_tears_down() {
    let faulty = Arc::new(FaultyStore::memory());
    faulty.configure(|f| f.fail_write_after = Some(2));
    let store: Arc<dyn ObjectStore> = faulty.clone();
    let orch = TestOrchestrator::from_config(Arc::clone(&store), small_probe()).unwrap();

    let report = orch.run(Scenario::UploadAppend).await;

    match &report.outcome {
        Outcome::Aborted(msg) => assert!(msg.contains("injected write"), "{}", msg),
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(faulty.closed.load(Ordering::SeqCst), 1);
    assert!(report.outcome.is_failure());
    assert!(!store.exists(orch.test_root()).await);
}

#[tokio::test]
async fn test_lagging_acl_is_reported_as_failure_without_retry() {
    let faulty = Arc::new(FaultyStore::memory());
    faulty.configure(|f| f.stale_acl_reads = 1);
    let store: Arc<dyn ObjectStore> = faulty.clone();
    let orch = TestOrchestrator::from_config(store, small_probe()).unwrap();

    let report = orch.run(Scenario::Mkdir).await;

    assert!(matches!(
        report.outcome,
        Outcome::Failed(VerificationFailure::GrantMissing { .. })
    ));
    assert_eq!(faulty.acl_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fork_id_isolates_test_root() {
    let dir = TempDir::new().unwrap();
    let store = fs_store(&dir).await;
    let probe = ProbeConfig {
        fork_id: Some("fork-3".into()),
        ..small_probe()
    };
    let orch = TestOrchestrator::from_config(Arc::clone(&store), probe).unwrap();
    assert_eq!(orch.test_root().as_str(), "test-root/fork-3");

    orch.mkdir().await.unwrap();
    assert!(store.exists(&key("test-root/fork-3/test-obs/mkdir-zh")).await);
    orch.teardown().await;
    assert!(!store.exists(&key("test-root/fork-3")).await);
}

#[tokio::test]
async fn test_static_oracle_expectation_is_used() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new(BUCKET, OWNER));
    let oracle = Arc::new(StaticOracle::new(AccessGrant::new(OWNER, Permission::Write)));
    let orch = TestOrchestrator::new(store, oracle, Principal::BucketOwner, small_probe()).unwrap();

    let report = orch.run(Scenario::CopyFromLocal).await;

    match report.outcome {
        Outcome::Failed(VerificationFailure::GrantMissing {
            grantee,
            permission,
            observed,
            ..
        }) => {
            assert_eq!(grantee, OWNER);
            assert_eq!(permission, Permission::Write);
            assert_eq!(observed, vec![AccessGrant::new(OWNER, Permission::FullControl)]);
        }
        other => panic!("expected grant failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_report_json_names_each_scenario() {
    let store: Arc<dyn ObjectStore> =
        Arc::new(MemoryBackend::new(BUCKET, OWNER).without_directories());
    let orch = TestOrchestrator::from_config(store, small_probe()).unwrap();
    let summary = orch.run_all(&Scenario::ALL).await;

    let json = serde_json::to_value(&summary).unwrap();
    let names: Vec<_> = json["reports"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["scenario"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["upload-append", "mkdir", "copy-from-local"]);
    assert_eq!(json["reports"][1]["outcome"]["status"], "skipped");
    assert_eq!(json["reports"][0]["outcome"]["status"], "passed");
}
