//! Tests for loading manifests from disk and writing published status back.

mod common;

use common::{ResourceBuilder, TestHarness};
use unitsync::{
    ActivationMode, EnableMode, LoaderError, ManifestLoader, MemoryInitSystem, SystemdResource,
};

#[test]
fn test_load_directory_sorted_and_skips_hidden() {
    let harness = TestHarness::new(MemoryInitSystem::permissive());
    harness.write_manifest(
        "zeta.yaml",
        &ResourceBuilder::new("zeta").unit("a.service", "started").build(),
    );
    harness.write_manifest(
        "alpha.yml",
        &ResourceBuilder::new("alpha").unit("b.service", "stopped").build(),
    );
    harness.write_raw("notes.txt", "not a manifest");
    std::fs::create_dir_all(harness.manifest_dir.join(".git")).unwrap();
    harness.write_raw(".git/config.yaml", "garbage: [");

    let entries = ManifestLoader::new(&harness.manifest_dir).load().unwrap();

    let names: Vec<&str> = entries.iter().map(|e| e.resource.name()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn test_load_single_file() {
    let harness = TestHarness::new(MemoryInitSystem::permissive());
    let path = harness.write_raw(
        "host.yaml",
        r#"
apiVersion: unitsync.io/v1alpha1
kind: Systemd
metadata:
  name: host
spec:
  services:
    - name: nginx.service
      desiredState: enabled-and-started
      activationMode: fail
      enableMode: persistent
"#,
    );

    let entries = ManifestLoader::new(&path).load().unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, path);
    let unit = &entries[0].resource.spec.units[0];
    assert_eq!(unit.activation_mode, Some(ActivationMode::Fail));
    assert_eq!(unit.enable_mode, Some(EnableMode::Persistent));
}

#[test]
fn test_duplicate_resource_names_rejected() {
    let harness = TestHarness::new(MemoryInitSystem::permissive());
    let resource = ResourceBuilder::new("host").unit("a.service", "started").build();
    harness.write_manifest("one.yaml", &resource);
    harness.write_manifest("two.yaml", &resource);

    let err = ManifestLoader::new(&harness.manifest_dir).load().unwrap_err();
    assert!(matches!(err, LoaderError::DuplicateName(name) if name == "host"));
}

#[test]
fn test_missing_path() {
    let harness = TestHarness::new(MemoryInitSystem::permissive());
    let err = ManifestLoader::new(harness.manifest_dir.join("absent.yaml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, LoaderError::NotFound(_)));
}

#[test]
fn test_invalid_unit_name_reports_path() {
    let harness = TestHarness::new(MemoryInitSystem::permissive());
    let path = harness.write_manifest(
        "bad.yaml",
        &ResourceBuilder::new("bad").unit("no-suffix", "started").build(),
    );

    let err = ManifestLoader::new(&path).load().unwrap_err();
    match err {
        LoaderError::InvalidResource { path: p, message } => {
            assert_eq!(p, path);
            assert!(message.contains("no-suffix"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_apply_and_write_back_status() {
    let harness = TestHarness::new(MemoryInitSystem::new().with_unit("nginx.service"));
    let path = harness.write_manifest(
        "host.yaml",
        &ResourceBuilder::new("host")
            .unit("nginx.service", "enabled-and-started")
            .unit("ghost.service", "started")
            .build(),
    );
    let loader = ManifestLoader::new(&path);
    let mut entry = loader.load().unwrap().remove(0);

    harness
        .reconciler
        .reconcile_resource(&mut entry.resource)
        .await
        .unwrap();
    loader.write(&entry.resource, &entry.path).unwrap();

    let reloaded: SystemdResource = loader.load_file(&path).unwrap();
    assert_eq!(reloaded.spec, entry.resource.spec);
    assert_eq!(reloaded.status.units.len(), 2);
    assert_eq!(reloaded.status.units[0].error, "");
    assert_eq!(
        reloaded.status.units[1].error,
        "Unit ghost.service not found."
    );
    assert_eq!(reloaded.status.conditions.len(), 1);
}
