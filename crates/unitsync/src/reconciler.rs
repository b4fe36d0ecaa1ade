//! Batch reconciler: connect → execute every unit → close.
//!
//! One init-system session per pass. Units are processed strictly in input
//! order, one at a time, because job completion is awaited on the same
//! session before the next call is issued.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::error::TransportError;
use crate::executor::{UnitExecutor, UnitOutcome};
use crate::resource::{SystemdResource, UnitSpec};
use crate::status;
use crate::transport::{Connector, InitSystem};

/// Result of a successful reconciliation pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePass {
    /// One outcome per input unit, in input order.
    pub outcomes: Vec<UnitOutcome>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

impl ReconcilePass {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Reconciles batches of units against the init system.
pub struct BatchReconciler {
    connector: Arc<dyn Connector>,
    executor: UnitExecutor,
    /// Serializes passes issued through the same reconciler.
    pass_lock: Mutex<()>,
}

impl BatchReconciler {
    /// Creates a new reconciler.
    pub fn new(connector: Arc<dyn Connector>, executor: UnitExecutor) -> Self {
        Self {
            connector,
            executor,
            pass_lock: Mutex::new(()),
        }
    }

    /// Runs one pass and returns one outcome per unit.
    ///
    /// A transport error aborts the pass: remaining units are skipped and no
    /// outcomes are returned.
    pub async fn reconcile_all(
        &self,
        units: &[UnitSpec],
    ) -> Result<Vec<UnitOutcome>, TransportError> {
        self.run_pass(units).await.map(|pass| pass.outcomes)
    }

    /// Like [`reconcile_all`](Self::reconcile_all), with pass statistics.
    pub async fn run_pass(&self, units: &[UnitSpec]) -> Result<ReconcilePass, TransportError> {
        let _guard = self.pass_lock.lock().await;
        let started = Instant::now();

        let session = self.connector.connect().await.map_err(|e| {
            log::error!("Failed to connect to init system: {}", e);
            e
        })?;

        let result = self.execute_all(session.as_ref(), units).await;

        if let Err(e) = session.close().await {
            log::warn!("Failed to close init system session: {}", e);
        }

        let outcomes = result?;
        let pass = ReconcilePass {
            outcomes,
            duration: started.elapsed(),
        };
        log::info!(
            "Reconciled {} unit(s) in {:?}: {} ok, {} failed",
            pass.outcomes.len(),
            pass.duration,
            pass.succeeded(),
            pass.failed()
        );
        Ok(pass)
    }

    async fn execute_all(
        &self,
        session: &dyn InitSystem,
        units: &[UnitSpec],
    ) -> Result<Vec<UnitOutcome>, TransportError> {
        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            match self.executor.execute(session, unit).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    log::error!("Aborting pass at unit {}: {}", unit.name, e);
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    /// Reconciles a `Systemd` resource and publishes the result into its
    /// status.
    ///
    /// On success the unit statuses are replaced and `Ready` is set to true.
    /// On a transport error the previously published unit statuses are kept
    /// and `Ready` is set to false.
    pub async fn reconcile_resource(
        &self,
        resource: &mut SystemdResource,
    ) -> Result<ReconcilePass, TransportError> {
        let span = tracing::info_span!("reconcile_resource", resource = %resource.name());
        let result = self
            .run_pass(&resource.spec.units)
            .instrument(span)
            .await;

        match &result {
            Ok(pass) => status::publish_success(resource, pass.outcomes.clone()),
            Err(e) => status::publish_failure(resource, e),
        }
        result
    }
}
