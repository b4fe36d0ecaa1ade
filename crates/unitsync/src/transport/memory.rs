//! In-memory init system.
//!
//! Simulates unit-file enablement, active units and job completion without
//! talking to a real service manager. Every behavior can be scripted
//! (job results, failing calls, failing connects or job listings, jobs that
//! never complete) and every call is recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{Connector, EnableResult, InitSystem, JobEntry, PendingJob, UnitFileChange};
use crate::error::{CallError, TransportError};
use crate::resource::{ActivationMode, EnableMode};

/// An init-system operation, as recorded by [`MemoryInitSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Enable,
    Disable,
    Start,
    Stop,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub unit: String,
    pub persistent: Option<bool>,
    pub mode: Option<ActivationMode>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Accept any unit name instead of only registered ones.
    permissive: bool,
    known: HashSet<String>,
    enabled: HashMap<String, EnableMode>,
    active: HashSet<String>,
    job_results: HashMap<String, String>,
    failing_calls: HashMap<(Operation, String), String>,
    hanging: HashSet<String>,
    held: Vec<oneshot::Sender<String>>,
    listed_jobs: Vec<JobEntry>,
    connect_error: Option<String>,
    list_jobs_error: Option<TransportError>,
    list_jobs_budget: Option<usize>,
    calls: Vec<Call>,
    next_job_id: u32,
    sessions_opened: usize,
    sessions_closed: usize,
}

/// In-memory init system. Cloning shares the underlying state, so a clone
/// kept by a test observes everything the reconciler did through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryInitSystem {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryInitSystem {
    /// Creates an init system that only knows the units registered through
    /// [`with_unit`](Self::with_unit).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an init system that accepts any unit name.
    pub fn permissive() -> Self {
        let system = Self::default();
        system.state().permissive = true;
        system
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a unit file.
    pub fn with_unit(self, name: impl Into<String>) -> Self {
        self.state().known.insert(name.into());
        self
    }

    /// Registers a unit that is already enabled.
    pub fn with_enabled_unit(self, name: impl Into<String>, mode: EnableMode) -> Self {
        let name = name.into();
        {
            let mut state = self.state();
            state.known.insert(name.clone());
            state.enabled.insert(name, mode);
        }
        self
    }

    /// Registers a unit that is already active.
    pub fn with_active_unit(self, name: impl Into<String>) -> Self {
        let name = name.into();
        {
            let mut state = self.state();
            state.known.insert(name.clone());
            state.active.insert(name);
        }
        self
    }

    /// Scripts the terminal result of start/stop jobs for a unit.
    pub fn with_job_result(self, unit: impl Into<String>, result: impl Into<String>) -> Self {
        self.state().job_results.insert(unit.into(), result.into());
        self
    }

    /// Makes a call fail with the given message.
    pub fn with_failing_call(
        self,
        operation: Operation,
        unit: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.state()
            .failing_calls
            .insert((operation, unit.into()), message.into());
        self
    }

    /// Makes start/stop jobs of a unit never complete until the session is closed.
    pub fn with_hanging_jobs(self, unit: impl Into<String>) -> Self {
        self.state().hanging.insert(unit.into());
        self
    }

    /// Adds an entry to the job list returned by `list_jobs`.
    pub fn with_listed_job(self, unit: impl Into<String>, status: impl Into<String>) -> Self {
        {
            let mut state = self.state();
            state.next_job_id += 1;
            let id = state.next_job_id;
            state.listed_jobs.push(JobEntry {
                id,
                unit: unit.into(),
                job_type: "start".to_string(),
                status: status.into(),
            });
        }
        self
    }

    /// Makes every `connect` fail.
    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        self.state().connect_error = Some(message.into());
        self
    }

    /// Lets a failing `connect` succeed again.
    pub fn clear_connect_error(&self) {
        self.state().connect_error = None;
    }

    /// Makes every `list_jobs` fail.
    pub fn with_list_jobs_error(self, message: impl Into<String>) -> Self {
        self.state().list_jobs_error = Some(TransportError::ListJobs(message.into()));
        self
    }

    /// Makes every `list_jobs` fail as if the bus connection dropped.
    pub fn with_disconnect(self, message: impl Into<String>) -> Self {
        self.state().list_jobs_error = Some(TransportError::Disconnected(message.into()));
        self
    }

    /// Lets `list_jobs` succeed `successes` times, then fail with `message`.
    pub fn with_list_jobs_error_after(self, successes: usize, message: impl Into<String>) -> Self {
        {
            let mut state = self.state();
            state.list_jobs_budget = Some(successes);
            state.list_jobs_error = Some(TransportError::ListJobs(message.into()));
        }
        self
    }

    /// All calls issued so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Number of calls of the given operation.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Calls issued for one unit, in order.
    pub fn calls_for(&self, unit: &str) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.unit == unit)
            .cloned()
            .collect()
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        self.state().enabled.contains_key(unit)
    }

    pub fn enable_mode_of(&self, unit: &str) -> Option<EnableMode> {
        self.state().enabled.get(unit).copied()
    }

    pub fn is_active(&self, unit: &str) -> bool {
        self.state().active.contains(unit)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state().sessions_closed
    }

    fn record(
        state: &mut MemoryState,
        operation: Operation,
        unit: &str,
        persistent: Option<bool>,
        mode: Option<ActivationMode>,
    ) -> Result<(), CallError> {
        state.calls.push(Call {
            operation,
            unit: unit.to_string(),
            persistent,
            mode,
        });

        if let Some(message) = state.failing_calls.get(&(operation, unit.to_string())) {
            return Err(CallError::new(message.clone()));
        }
        if !state.permissive && !state.known.contains(unit) {
            return Err(CallError::new(format!("Unit {} not found.", unit)));
        }
        Ok(())
    }

    fn unit_file_dir(persistent: bool) -> &'static str {
        if persistent {
            "/etc/systemd/system/multi-user.target.wants"
        } else {
            "/run/systemd/system/multi-user.target.wants"
        }
    }

    fn queue_job(
        state: &mut MemoryState,
        unit: &str,
        job_type: &str,
        result: String,
    ) -> PendingJob {
        state.next_job_id += 1;
        let job = state.next_job_id.to_string();

        if state.hanging.contains(unit) {
            let (tx, rx) = oneshot::channel();
            state.held.push(tx);
            let id = state.next_job_id;
            state.listed_jobs.push(JobEntry {
                id,
                unit: unit.to_string(),
                job_type: job_type.to_string(),
                status: "running".to_string(),
            });
            return PendingJob::new(job, rx);
        }

        PendingJob::completed(job, result)
    }
}

#[async_trait]
impl InitSystem for MemoryInitSystem {
    async fn enable_unit_files(
        &self,
        names: &[String],
        persistent: bool,
        _force: bool,
    ) -> Result<EnableResult, CallError> {
        let mut state = self.state();
        let mut changes = Vec::new();
        for name in names {
            Self::record(&mut state, Operation::Enable, name, Some(persistent), None)?;
            let mode = if persistent {
                EnableMode::Persistent
            } else {
                EnableMode::Runtime
            };
            if state.enabled.insert(name.clone(), mode) != Some(mode) {
                changes.push(UnitFileChange {
                    change_type: "symlink".to_string(),
                    file_name: format!("{}/{}", Self::unit_file_dir(persistent), name),
                    destination: format!("/usr/lib/systemd/system/{}", name),
                });
            }
        }
        Ok(EnableResult {
            carries_install_info: true,
            changes,
        })
    }

    async fn disable_unit_files(
        &self,
        names: &[String],
        persistent: bool,
    ) -> Result<Vec<UnitFileChange>, CallError> {
        let mut state = self.state();
        let mut changes = Vec::new();
        for name in names {
            Self::record(&mut state, Operation::Disable, name, Some(persistent), None)?;
            if let Some(mode) = state.enabled.remove(name) {
                changes.push(UnitFileChange {
                    change_type: "unlink".to_string(),
                    file_name: format!("{}/{}", Self::unit_file_dir(mode.is_persistent()), name),
                    destination: String::new(),
                });
            }
        }
        Ok(changes)
    }

    async fn start_unit(&self, name: &str, mode: ActivationMode) -> Result<PendingJob, CallError> {
        let mut state = self.state();
        Self::record(&mut state, Operation::Start, name, None, Some(mode))?;

        let result = state
            .job_results
            .get(name)
            .cloned()
            .unwrap_or_else(|| "done".to_string());
        if result == "done" && !state.hanging.contains(name) {
            state.active.insert(name.to_string());
        }
        Ok(Self::queue_job(&mut state, name, "start", result))
    }

    async fn stop_unit(&self, name: &str, mode: ActivationMode) -> Result<PendingJob, CallError> {
        let mut state = self.state();
        Self::record(&mut state, Operation::Stop, name, None, Some(mode))?;

        let result = state
            .job_results
            .get(name)
            .cloned()
            .unwrap_or_else(|| "done".to_string());
        if !state.hanging.contains(name) {
            state.active.remove(name);
        }
        Ok(Self::queue_job(&mut state, name, "stop", result))
    }

    async fn list_jobs(&self) -> Result<Vec<JobEntry>, TransportError> {
        let mut state = self.state();
        match state.list_jobs_budget {
            Some(0) | None => {
                if let Some(error) = &state.list_jobs_error {
                    return Err(error.clone());
                }
            }
            Some(remaining) => state.list_jobs_budget = Some(remaining - 1),
        }
        Ok(state.listed_jobs.clone())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.sessions_closed += 1;
        // Dropping the held senders abandons every job still pending.
        state.held.clear();
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryInitSystem {
    async fn connect(&self) -> Result<Box<dyn InitSystem>, TransportError> {
        let mut state = self.state();
        if let Some(message) = &state.connect_error {
            return Err(TransportError::Connect(message.clone()));
        }
        state.sessions_opened += 1;
        Ok(Box::new(self.clone()))
    }
}
