//! Init-system transport boundary.
//!
//! The reconciler only talks to the init system through [`InitSystem`], a
//! session opened by a [`Connector`] at the start of every pass. Two
//! implementations ship with the crate:
//! - [`dbus::DbusConnector`]: the systemd manager over D-Bus (feature `dbus`)
//! - [`memory::MemoryInitSystem`]: an in-memory simulation for tests and dry runs

#[cfg(feature = "dbus")]
pub mod dbus;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{CallError, TransportError};
use crate::resource::ActivationMode;

/// A change applied to the unit file tree by an enable/disable call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFileChange {
    /// `symlink` or `unlink`.
    pub change_type: String,
    pub file_name: String,
    pub destination: String,
}

/// Result of an enable call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnableResult {
    pub carries_install_info: bool,
    pub changes: Vec<UnitFileChange>,
}

/// One entry of the init system's job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEntry {
    pub id: u32,
    pub unit: String,
    pub job_type: String,
    /// Job state, e.g. `waiting` or `running`.
    pub status: String,
}

/// A job accepted by the init system whose completion is still pending.
#[derive(Debug)]
pub struct PendingJob {
    /// Job identifier (object path for D-Bus).
    pub job: String,
    completion: oneshot::Receiver<String>,
}

impl PendingJob {
    /// Creates a pending job that resolves when `completion` receives the
    /// job's terminal result.
    pub fn new(job: impl Into<String>, completion: oneshot::Receiver<String>) -> Self {
        Self {
            job: job.into(),
            completion,
        }
    }

    /// Creates a job that already finished with `result`.
    pub fn completed(job: impl Into<String>, result: impl Into<String>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result.into());
        Self::new(job, rx)
    }

    /// Waits for the terminal result (`done`, `failed`, `canceled`, ...).
    ///
    /// Returns `None` if the sender side went away without a result, which
    /// happens when the session is closed while the job is still running.
    pub async fn wait(self) -> Option<String> {
        self.completion.await.ok()
    }
}

/// A session with the init system, scoped to one reconciliation pass.
///
/// Call failures are per-unit and returned as [`CallError`]. Only the job
/// listing and closing the session report [`TransportError`]s.
#[async_trait]
pub trait InitSystem: Send + Sync {
    async fn enable_unit_files(
        &self,
        names: &[String],
        persistent: bool,
        force: bool,
    ) -> Result<EnableResult, CallError>;

    async fn disable_unit_files(
        &self,
        names: &[String],
        persistent: bool,
    ) -> Result<Vec<UnitFileChange>, CallError>;

    async fn start_unit(&self, name: &str, mode: ActivationMode) -> Result<PendingJob, CallError>;

    async fn stop_unit(&self, name: &str, mode: ActivationMode) -> Result<PendingJob, CallError>;

    async fn list_jobs(&self) -> Result<Vec<JobEntry>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens init-system sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn InitSystem>, TransportError>;
}
