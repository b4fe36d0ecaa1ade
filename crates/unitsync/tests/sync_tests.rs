//! Tests for the manifest sync driver used by `watch`.

mod common;

use std::time::Duration;

use common::{ResourceBuilder, TestHarness};
use unitsync::status::is_ready;
use unitsync::transport::memory::Operation;
use unitsync::{ManifestLoader, ManifestSync, MemoryInitSystem, RetryBackoff, TransportError};

fn sync_for(harness: &TestHarness, write: bool) -> ManifestSync {
    ManifestSync::new(
        ManifestLoader::new(harness.manifest_dir.clone()),
        write,
        RetryBackoff::new(Duration::from_secs(1), Duration::from_secs(8)),
    )
}

#[tokio::test]
async fn test_unchanged_spec_is_not_reapplied() {
    let harness = TestHarness::new(MemoryInitSystem::new().with_unit("a.service"));
    harness.write_manifest(
        "host.yaml",
        &ResourceBuilder::new("host").unit("a.service", "started").build(),
    );
    let mut sync = sync_for(&harness, false);

    assert_eq!(sync.apply_changed(&harness.reconciler).await.unwrap().len(), 1);
    assert!(sync.apply_changed(&harness.reconciler).await.unwrap().is_empty());
    assert!(sync.retry_pending(&harness.reconciler).await.unwrap().is_empty());

    assert_eq!(harness.system.sessions_opened(), 1);
    assert_eq!(sync.retry_at(), None);
}

#[tokio::test]
async fn test_edited_spec_is_reapplied() {
    let harness = TestHarness::new(
        MemoryInitSystem::new()
            .with_unit("a.service")
            .with_unit("b.service"),
    );
    let path = harness.write_manifest(
        "host.yaml",
        &ResourceBuilder::new("host").unit("a.service", "started").build(),
    );
    let mut sync = sync_for(&harness, true);
    sync.apply_changed(&harness.reconciler).await.unwrap();
    assert!(sync.is_own_write(&path));

    harness.write_manifest(
        "host.yaml",
        &ResourceBuilder::new("host")
            .unit("a.service", "started")
            .unit("b.service", "enabled")
            .build(),
    );
    assert!(!sync.is_own_write(&path));

    let synced = sync.apply_changed(&harness.reconciler).await.unwrap();
    assert_eq!(synced.len(), 1);
    assert_eq!(synced[0].entry.resource.status.units.len(), 2);
    assert_eq!(harness.system.call_count(Operation::Enable), 1);
}

#[tokio::test]
async fn test_failed_write_back_does_not_retrigger_and_retries_back_off() {
    let harness = TestHarness::new(
        MemoryInitSystem::new()
            .with_unit("a.service")
            .with_connect_error("Connection refused"),
    );
    let path = harness.write_manifest(
        "host.yaml",
        &ResourceBuilder::new("host").unit("a.service", "started").build(),
    );
    let mut sync = sync_for(&harness, true);

    let synced = sync.apply_changed(&harness.reconciler).await.unwrap();
    assert!(matches!(synced[0].result, Err(TransportError::Connect(_))));
    assert!(sync.is_own_write(&path));
    assert_eq!(sync.pending_retries(), 1);
    assert_eq!(sync.retry_delay(), Some(Duration::from_secs(1)));

    // The status write-back alone needs no pass and keeps the schedule.
    let retry_at = sync.retry_at();
    assert!(sync.apply_changed(&harness.reconciler).await.unwrap().is_empty());
    assert_eq!(sync.retry_at(), retry_at);

    let synced = sync.retry_pending(&harness.reconciler).await.unwrap();
    assert_eq!(synced.len(), 1);
    assert_eq!(sync.retry_delay(), Some(Duration::from_secs(2)));

    harness.system.clear_connect_error();
    let synced = sync.retry_pending(&harness.reconciler).await.unwrap();
    assert!(synced[0].result.is_ok());
    assert_eq!(sync.pending_retries(), 0);
    assert_eq!(sync.retry_at(), None);
    assert_eq!(harness.system.sessions_opened(), 1);

    let on_disk = ManifestLoader::new(path.clone()).load().unwrap();
    assert!(is_ready(&on_disk[0].resource));
}

#[tokio::test]
async fn test_failed_pass_is_retried_without_write() {
    let harness = TestHarness::new(
        MemoryInitSystem::new()
            .with_unit("a.service")
            .with_disconnect("connection reset by peer"),
    );
    harness.write_manifest(
        "host.yaml",
        &ResourceBuilder::new("host").unit("a.service", "started").build(),
    );
    let mut sync = sync_for(&harness, false);

    let synced = sync.apply_changed(&harness.reconciler).await.unwrap();
    assert_eq!(
        synced[0].result.as_ref().unwrap_err(),
        &TransportError::Disconnected("connection reset by peer".to_string())
    );
    assert_eq!(sync.pending_retries(), 1);

    let synced = sync.retry_pending(&harness.reconciler).await.unwrap();
    assert_eq!(synced.len(), 1);
    assert_eq!(harness.system.call_count(Operation::Start), 2);
}

#[tokio::test]
async fn test_removed_manifest_drops_pending_retry() {
    let harness = TestHarness::new(
        MemoryInitSystem::new()
            .with_unit("a.service")
            .with_connect_error("Connection refused"),
    );
    let path = harness.write_manifest(
        "host.yaml",
        &ResourceBuilder::new("host").unit("a.service", "started").build(),
    );
    let mut sync = sync_for(&harness, false);
    sync.apply_changed(&harness.reconciler).await.unwrap();
    assert_eq!(sync.pending_retries(), 1);

    std::fs::remove_file(&path).unwrap();

    assert!(sync.retry_pending(&harness.reconciler).await.unwrap().is_empty());
    assert_eq!(sync.pending_retries(), 0);
    assert_eq!(sync.retry_at(), None);
}
