//! Test harness for isolated reconciliation runs.
//!
//! The `TestHarness` owns an in-memory init system and a reconciler bound to
//! it, plus a temporary directory for manifest files.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use unitsync::{BatchReconciler, MemoryInitSystem, SystemdResource, UnitExecutor};

/// Job timeout used by harness reconcilers.
pub const TEST_JOB_TIMEOUT: Duration = Duration::from_secs(10);

/// Test harness providing an isolated init system and manifest directory.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory for manifest files.
    pub manifest_dir: PathBuf,
    /// The simulated init system. Clones share state with the reconciler's.
    pub system: MemoryInitSystem,
    pub reconciler: BatchReconciler,
}

impl TestHarness {
    /// Create a harness around the given init system.
    pub fn new(system: MemoryInitSystem) -> Self {
        Self::with_timeout(system, Some(TEST_JOB_TIMEOUT))
    }

    /// Create a harness with a custom job timeout.
    pub fn with_timeout(system: MemoryInitSystem, job_timeout: Option<Duration>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let manifest_dir = temp_dir.path().join("manifests");
        std::fs::create_dir_all(&manifest_dir).expect("Failed to create manifest dir");

        let reconciler =
            BatchReconciler::new(Arc::new(system.clone()), UnitExecutor::new(job_timeout));

        Self {
            temp_dir,
            manifest_dir,
            system,
            reconciler,
        }
    }

    /// Write a manifest into the manifest directory and return its path.
    pub fn write_manifest(&self, file_name: &str, resource: &SystemdResource) -> PathBuf {
        let path = self.manifest_dir.join(file_name);
        std::fs::write(&path, super::builders::manifest_yaml(resource))
            .expect("Failed to write manifest");
        path
    }

    /// Write raw YAML into the manifest directory and return its path.
    pub fn write_raw(&self, file_name: &str, content: &str) -> PathBuf {
        let path = self.manifest_dir.join(file_name);
        std::fs::write(&path, content).expect("Failed to write manifest");
        path
    }
}
