//! systemd manager over D-Bus.
//!
//! Job completion is correlated through the manager's `JobRemoved` signal:
//! the signal stream is opened before `StartUnit`/`StopUnit` is issued, and a
//! background task forwards the result of the matching job object path.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use super::{Connector, EnableResult, InitSystem, JobEntry, PendingJob, UnitFileChange};
use crate::config::BusKind;
use crate::error::{CallError, TransportError};
use crate::resource::ActivationMode;

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
trait Manager {
    fn subscribe(&self) -> zbus::Result<()>;

    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn enable_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
        force: bool,
    ) -> zbus::Result<(bool, Vec<(String, String, String)>)>;

    fn disable_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
    ) -> zbus::Result<Vec<(String, String, String)>>;

    #[allow(clippy::type_complexity)]
    fn list_jobs(
        &self,
    ) -> zbus::Result<Vec<(u32, String, String, String, OwnedObjectPath, OwnedObjectPath)>>;

    #[zbus(signal)]
    fn job_removed(
        &self,
        id: u32,
        job: OwnedObjectPath,
        unit: String,
        result: String,
    ) -> zbus::Result<()>;
}

/// Opens a D-Bus session with the systemd manager.
#[derive(Debug, Clone, Default)]
pub struct DbusConnector {
    bus: BusKind,
}

impl DbusConnector {
    pub fn new(bus: BusKind) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Connector for DbusConnector {
    async fn connect(&self) -> Result<Box<dyn InitSystem>, TransportError> {
        let connection = match self.bus {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        }
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        let manager = ManagerProxy::new(&connection)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        // Without a subscription systemd does not emit JobRemoved to us.
        manager
            .subscribe()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        log::debug!("Connected to systemd manager on {:?} bus", self.bus);
        Ok(Box::new(DbusInitSystem {
            connection,
            manager,
        }))
    }
}

/// A live D-Bus session.
pub struct DbusInitSystem {
    connection: Connection,
    manager: ManagerProxy<'static>,
}

impl DbusInitSystem {
    async fn queue_job<F>(&self, unit: &str, call: F) -> Result<PendingJob, CallError>
    where
        F: std::future::Future<Output = zbus::Result<OwnedObjectPath>>,
    {
        let mut removed = self
            .manager
            .receive_job_removed()
            .await
            .map_err(|e| CallError::new(e.to_string()))?;

        let job = call.await.map_err(|e| CallError::new(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let expected = job.clone();
        let unit = unit.to_string();
        tokio::spawn(async move {
            while let Some(signal) = removed.next().await {
                let args = match signal.args() {
                    Ok(args) => args,
                    Err(e) => {
                        log::debug!("Skipping malformed JobRemoved signal: {}", e);
                        continue;
                    }
                };
                if args.job == expected {
                    log::debug!("Job {} for {} finished: {}", args.id, unit, args.result);
                    let _ = tx.send(args.result);
                    return;
                }
            }
            log::debug!("JobRemoved stream ended before job {} completed", expected.as_str());
        });

        Ok(PendingJob::new(job.as_str(), rx))
    }
}

/// I/O failures mean the bus connection itself is gone.
fn list_jobs_error(e: zbus::Error) -> TransportError {
    match e {
        zbus::Error::InputOutput(_) => TransportError::Disconnected(e.to_string()),
        other => TransportError::ListJobs(other.to_string()),
    }
}

fn to_changes(changes: Vec<(String, String, String)>) -> Vec<UnitFileChange> {
    changes
        .into_iter()
        .map(|(change_type, file_name, destination)| UnitFileChange {
            change_type,
            file_name,
            destination,
        })
        .collect()
}

#[async_trait]
impl InitSystem for DbusInitSystem {
    async fn enable_unit_files(
        &self,
        names: &[String],
        persistent: bool,
        force: bool,
    ) -> Result<EnableResult, CallError> {
        let files: Vec<&str> = names.iter().map(String::as_str).collect();
        let (carries_install_info, changes) = self
            .manager
            .enable_unit_files(&files, !persistent, force)
            .await
            .map_err(|e| CallError::new(e.to_string()))?;
        Ok(EnableResult {
            carries_install_info,
            changes: to_changes(changes),
        })
    }

    async fn disable_unit_files(
        &self,
        names: &[String],
        persistent: bool,
    ) -> Result<Vec<UnitFileChange>, CallError> {
        let files: Vec<&str> = names.iter().map(String::as_str).collect();
        let changes = self
            .manager
            .disable_unit_files(&files, !persistent)
            .await
            .map_err(|e| CallError::new(e.to_string()))?;
        Ok(to_changes(changes))
    }

    async fn start_unit(&self, name: &str, mode: ActivationMode) -> Result<PendingJob, CallError> {
        self.queue_job(name, self.manager.start_unit(name, mode.as_str()))
            .await
    }

    async fn stop_unit(&self, name: &str, mode: ActivationMode) -> Result<PendingJob, CallError> {
        self.queue_job(name, self.manager.stop_unit(name, mode.as_str()))
            .await
    }

    async fn list_jobs(&self) -> Result<Vec<JobEntry>, TransportError> {
        let jobs = self
            .manager
            .list_jobs()
            .await
            .map_err(list_jobs_error)?;
        Ok(jobs
            .into_iter()
            .map(|(id, unit, job_type, status, _, _)| JobEntry {
                id,
                unit,
                job_type,
                status,
            })
            .collect())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connection
            .clone()
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
