//! Unit operation executor.
//!
//! Drives one unit through the init-system calls its desired state requires
//! and reports the outcome. Per-unit failures are recorded in the outcome;
//! only a failing job listing aborts with a [`TransportError`].

use std::time::Duration;

use serde::Serialize;
use tracing::Instrument;

use crate::error::{TransportError, UnitError};
use crate::resource::{DesiredStatus, UnitSpec, UnitStatus};
use crate::transport::{InitSystem, PendingJob};

/// The job result the init system reports for a successful job.
pub const JOB_DONE: &str = "done";

/// Default time to wait for a single job to complete.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of reconciling one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOutcome {
    pub name: String,
    /// State of the unit's job as listed after the operation, empty if none.
    pub observed_status: String,
    pub desired_status: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<UnitError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<UnitError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl UnitOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<UnitOutcome> for UnitStatus {
    fn from(outcome: UnitOutcome) -> Self {
        UnitStatus {
            name: outcome.name,
            status: outcome.observed_status,
            desired_status: outcome.desired_status,
            error: outcome.error.map(|e| e.to_string()).unwrap_or_default(),
        }
    }
}

/// Whether a job's terminal result must be `done` for the step to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobCheck {
    RequireDone,
    AcceptAny,
}

/// Executes the operation sequence for a single unit.
#[derive(Debug, Clone)]
pub struct UnitExecutor {
    job_timeout: Option<Duration>,
}

impl Default for UnitExecutor {
    fn default() -> Self {
        Self::new(Some(DEFAULT_JOB_TIMEOUT))
    }
}

impl UnitExecutor {
    /// Creates an executor. `None` waits for job completion indefinitely.
    pub fn new(job_timeout: Option<Duration>) -> Self {
        Self { job_timeout }
    }

    /// Reconciles one unit through `session`.
    ///
    /// Returns `Err` only when the post-operation job lookup fails; every
    /// other failure ends up in [`UnitOutcome::error`].
    pub async fn execute(
        &self,
        session: &dyn InitSystem,
        unit: &UnitSpec,
    ) -> Result<UnitOutcome, TransportError> {
        let span = tracing::info_span!(
            "execute_unit",
            unit = %unit.name,
            desired = %unit.desired_status
        );
        self.execute_inner(session, unit).instrument(span).await
    }

    async fn execute_inner(
        &self,
        session: &dyn InitSystem,
        unit: &UnitSpec,
    ) -> Result<UnitOutcome, TransportError> {
        let unit = unit.with_defaults();

        let error = self.dispatch(session, &unit).await.err();
        if let Some(e) = &error {
            log::warn!("Unit {} failed to reach {}: {}", unit.name, unit.desired_status, e);
        }

        let jobs = session.list_jobs().await?;
        let observed_status = jobs
            .into_iter()
            .find(|job| job.unit == unit.name)
            .map(|job| job.status)
            .unwrap_or_default();

        Ok(UnitOutcome {
            name: unit.name.clone(),
            observed_status,
            desired_status: unit.desired_status.to_string(),
            error,
        })
    }

    async fn dispatch(&self, session: &dyn InitSystem, unit: &UnitSpec) -> Result<(), UnitError> {
        match &unit.desired_status {
            DesiredStatus::Enabled => self.enable(session, unit).await,
            DesiredStatus::Disabled => self.disable(session, unit).await,
            DesiredStatus::Started => self.start(session, unit).await,
            DesiredStatus::Stopped => self.stop(session, unit).await,
            DesiredStatus::EnabledAndStarted => {
                self.enable(session, unit).await?;
                self.start(session, unit).await
            }
            DesiredStatus::DisabledAndStopped => {
                self.disable(session, unit).await?;
                self.stop(session, unit).await
            }
            DesiredStatus::Unrecognized(value) => {
                log::debug!(
                    "Unrecognized desired state '{}' for {}, nothing to do",
                    value,
                    unit.name
                );
                Ok(())
            }
        }
    }

    async fn enable(&self, session: &dyn InitSystem, unit: &UnitSpec) -> Result<(), UnitError> {
        let persistent = unit.enable_mode().is_persistent();
        log::debug!("Enabling {} (persistent: {})", unit.name, persistent);
        let result = session
            .enable_unit_files(std::slice::from_ref(&unit.name), persistent, false)
            .await?;
        log::debug!("Enabled {}: {} change(s)", unit.name, result.changes.len());
        Ok(())
    }

    async fn disable(&self, session: &dyn InitSystem, unit: &UnitSpec) -> Result<(), UnitError> {
        let persistent = unit.enable_mode().is_persistent();
        log::debug!("Disabling {} (persistent: {})", unit.name, persistent);
        let changes = session
            .disable_unit_files(std::slice::from_ref(&unit.name), persistent)
            .await?;
        log::debug!("Disabled {}: {} change(s)", unit.name, changes.len());
        Ok(())
    }

    async fn start(&self, session: &dyn InitSystem, unit: &UnitSpec) -> Result<(), UnitError> {
        let mode = unit.activation_mode();
        log::debug!("Starting {} (mode: {})", unit.name, mode);
        let job = session.start_unit(&unit.name, mode).await?;
        self.await_job(job, JobCheck::RequireDone).await
    }

    async fn stop(&self, session: &dyn InitSystem, unit: &UnitSpec) -> Result<(), UnitError> {
        let mode = unit.activation_mode();
        log::debug!("Stopping {} (mode: {})", unit.name, mode);
        let job = session.stop_unit(&unit.name, mode).await?;
        // Stop jobs are not checked against `done`.
        self.await_job(job, JobCheck::AcceptAny).await
    }

    async fn await_job(&self, job: PendingJob, check: JobCheck) -> Result<(), UnitError> {
        let id = job.job.clone();
        let result = match self.job_timeout {
            Some(timeout) => tokio::time::timeout(timeout, job.wait())
                .await
                .map_err(|_| UnitError::JobTimeout {
                    job: id.clone(),
                    secs: timeout.as_secs(),
                })?,
            None => job.wait().await,
        };

        let result = result.ok_or_else(|| UnitError::JobAbandoned(id.clone()))?;
        log::debug!("Job {} finished with result '{}'", id, result);

        if check == JobCheck::RequireDone && result != JOB_DONE {
            return Err(UnitError::JobNotDone(result));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::resource::{ActivationMode, EnableMode};
    use crate::transport::memory::{MemoryInitSystem, Operation};

    fn executor() -> UnitExecutor {
        UnitExecutor::new(Some(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_enabled_issues_single_enable() {
        let system = MemoryInitSystem::new().with_unit("nginx.service");
        let unit = UnitSpec::new("nginx.service", DesiredStatus::Enabled);

        let outcome = executor().execute(&system, &unit).await.unwrap();

        assert!(outcome.is_ok());
        assert_eq!(outcome.desired_status, "enabled");
        assert_eq!(system.call_count(Operation::Enable), 1);
        assert_eq!(system.calls().len(), 1);
        assert_eq!(system.enable_mode_of("nginx.service"), Some(EnableMode::Runtime));
    }

    #[tokio::test]
    async fn test_persistent_enable_mode_is_forwarded() {
        let system = MemoryInitSystem::new().with_unit("nginx.service");
        let unit = UnitSpec::new("nginx.service", DesiredStatus::Disabled)
            .with_enable_mode(EnableMode::Persistent);

        executor().execute(&system, &unit).await.unwrap();

        let calls = system.calls_for("nginx.service");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, Operation::Disable);
        assert_eq!(calls[0].persistent, Some(true));
    }

    #[tokio::test]
    async fn test_started_with_failed_job_records_signal() {
        let system = MemoryInitSystem::new()
            .with_unit("broken.service")
            .with_job_result("broken.service", "failed")
            .with_listed_job("broken.service", "running");
        let unit = UnitSpec::new("broken.service", DesiredStatus::Started);

        let outcome = executor().execute(&system, &unit).await.unwrap();

        assert_eq!(
            outcome.error,
            Some(UnitError::JobNotDone("failed".to_string()))
        );
        let message = outcome.error.as_ref().unwrap().to_string();
        assert_eq!(message, "job != done with status: failed");
        assert_eq!(outcome.observed_status, "running");
    }

    #[tokio::test]
    async fn test_stopped_accepts_any_signal() {
        let system = MemoryInitSystem::new()
            .with_active_unit("worker.service")
            .with_job_result("worker.service", "canceled");
        let unit = UnitSpec::new("worker.service", DesiredStatus::Stopped);

        let outcome = executor().execute(&system, &unit).await.unwrap();

        assert!(outcome.is_ok());
        assert_eq!(system.call_count(Operation::Stop), 1);
    }

    #[tokio::test]
    async fn test_enable_failure_skips_start() {
        let system = MemoryInitSystem::new()
            .with_unit("nginx.service")
            .with_failing_call(Operation::Enable, "nginx.service", "Access denied");
        let unit = UnitSpec::new("nginx.service", DesiredStatus::EnabledAndStarted);

        let outcome = executor().execute(&system, &unit).await.unwrap();

        assert_eq!(
            outcome.error,
            Some(UnitError::Call(CallError::new("Access denied")))
        );
        assert_eq!(system.call_count(Operation::Start), 0);
    }

    #[tokio::test]
    async fn test_disable_failure_skips_stop() {
        let system = MemoryInitSystem::new();
        let unit = UnitSpec::new("ghost.service", DesiredStatus::DisabledAndStopped);

        let outcome = executor().execute(&system, &unit).await.unwrap();

        assert_eq!(
            outcome.error.map(|e| e.to_string()).as_deref(),
            Some("Unit ghost.service not found.")
        );
        assert_eq!(system.call_count(Operation::Stop), 0);
    }

    #[tokio::test]
    async fn test_enabled_and_started_runs_in_order() {
        let system = MemoryInitSystem::new().with_unit("nginx.service");
        let unit = UnitSpec::new("nginx.service", DesiredStatus::EnabledAndStarted)
            .with_activation_mode(ActivationMode::Fail);

        let outcome = executor().execute(&system, &unit).await.unwrap();

        assert!(outcome.is_ok());
        let ops: Vec<Operation> = system.calls().iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec![Operation::Enable, Operation::Start]);
        assert_eq!(system.calls()[1].mode, Some(ActivationMode::Fail));
        assert!(system.is_enabled("nginx.service"));
        assert!(system.is_active("nginx.service"));
    }

    #[tokio::test]
    async fn test_unrecognized_status_is_noop_with_lookup() {
        let system = MemoryInitSystem::new()
            .with_unit("nginx.service")
            .with_listed_job("nginx.service", "waiting");
        let unit = UnitSpec::new("nginx.service", "restarted");

        let outcome = executor().execute(&system, &unit).await.unwrap();

        assert!(outcome.is_ok());
        assert!(system.calls().is_empty());
        assert_eq!(outcome.observed_status, "waiting");
        assert_eq!(outcome.desired_status, "restarted");
    }

    #[tokio::test]
    async fn test_lookup_failure_is_transport_error() {
        let system = MemoryInitSystem::new()
            .with_unit("nginx.service")
            .with_list_jobs_error("connection reset");
        let unit = UnitSpec::new("nginx.service", DesiredStatus::Started);

        let err = executor().execute(&system, &unit).await.unwrap_err();
        assert_eq!(err, TransportError::ListJobs("connection reset".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_is_recorded_per_unit() {
        let system = MemoryInitSystem::new()
            .with_unit("slow.service")
            .with_hanging_jobs("slow.service");
        let unit = UnitSpec::new("slow.service", DesiredStatus::Started);

        let outcome = UnitExecutor::new(Some(Duration::from_secs(30)))
            .execute(&system, &unit)
            .await
            .unwrap();

        assert!(matches!(
            outcome.error,
            Some(UnitError::JobTimeout { secs: 30, .. })
        ));
        assert_eq!(outcome.observed_status, "running");
    }

    #[tokio::test]
    async fn test_defaults_match_explicit_modes() {
        let implicit_system = MemoryInitSystem::new().with_unit("a.service");
        let explicit_system = MemoryInitSystem::new().with_unit("a.service");

        let implicit = UnitSpec::new("a.service", DesiredStatus::EnabledAndStarted);
        let explicit = implicit
            .clone()
            .with_activation_mode(ActivationMode::Replace)
            .with_enable_mode(EnableMode::Runtime);

        let a = executor().execute(&implicit_system, &implicit).await.unwrap();
        let b = executor().execute(&explicit_system, &explicit).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(implicit_system.calls(), explicit_system.calls());
    }
}
