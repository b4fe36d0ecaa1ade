//! Subcommand implementations.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use unitsync::status::is_ready;
use unitsync::{
    AgentConfig, BatchReconciler, Connector, LoaderError, ManifestLoader, ManifestSync,
    ManifestWatcher, MemoryInitSystem, RetryBackoff, SyncedResource, UnitExecutor, UnitStatus,
    UnitSyncError,
};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Per-resource result printed by `apply`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplyReport {
    resource: String,
    ready: bool,
    services: Vec<UnitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Outcome of one `apply` run across all manifests.
#[derive(Debug, Default)]
pub struct ApplySummary {
    pub resources: usize,
    pub failed_passes: usize,
    pub failed_units: usize,
}

/// Builds the reconciler for the configured transport.
pub fn build_reconciler(
    config: &AgentConfig,
    simulate: bool,
) -> Result<BatchReconciler, UnitSyncError> {
    let connector: Arc<dyn Connector> = if simulate {
        log::info!("Simulating init system, no changes will be made to the host");
        Arc::new(MemoryInitSystem::permissive())
    } else {
        dbus_connector(config)?
    };
    Ok(BatchReconciler::new(
        connector,
        UnitExecutor::new(config.job_timeout()),
    ))
}

#[cfg(feature = "dbus")]
fn dbus_connector(config: &AgentConfig) -> Result<Arc<dyn Connector>, UnitSyncError> {
    Ok(Arc::new(unitsync::transport::dbus::DbusConnector::new(
        config.bus,
    )))
}

#[cfg(not(feature = "dbus"))]
fn dbus_connector(_config: &AgentConfig) -> Result<Arc<dyn Connector>, UnitSyncError> {
    Err(unitsync::TransportError::Connect(
        "built without D-Bus support, use --simulate".to_string(),
    )
    .into())
}

/// Wraps a loader into a sync driver using the configured retry backoff.
pub fn manifest_sync(config: &AgentConfig, loader: ManifestLoader, write: bool) -> ManifestSync {
    ManifestSync::new(
        loader,
        write,
        RetryBackoff::new(config.retry_initial(), config.retry_max()),
    )
}

/// Loads and validates manifests, printing a line per resource.
pub fn validate(loader: &ManifestLoader) -> Result<usize, UnitSyncError> {
    let entries = loader.load()?;
    for entry in &entries {
        println!(
            "{}: {} ({} unit(s))",
            entry.path.display(),
            entry.resource.name(),
            entry.resource.spec.units.len()
        );
    }
    Ok(entries.len())
}

/// Runs one pass per manifest and prints the published status.
pub async fn apply(
    reconciler: &BatchReconciler,
    sync: &mut ManifestSync,
    output: OutputFormat,
) -> Result<ApplySummary, UnitSyncError> {
    let synced = sync.apply_changed(reconciler).await?;
    print_reports(&synced, output);
    Ok(summarize(&synced))
}

fn summarize(synced: &[SyncedResource]) -> ApplySummary {
    let mut summary = ApplySummary {
        resources: synced.len(),
        ..ApplySummary::default()
    };
    for resource in synced {
        match &resource.result {
            Ok(pass) => summary.failed_units += pass.failed(),
            Err(_) => summary.failed_passes += 1,
        }
    }
    summary
}

fn print_reports(synced: &[SyncedResource], output: OutputFormat) {
    let reports: Vec<ApplyReport> = synced
        .iter()
        .map(|s| ApplyReport {
            resource: s.entry.resource.name().to_string(),
            ready: is_ready(&s.entry.resource),
            services: s.entry.resource.status.units.clone(),
            error: s.result.as_ref().err().map(|e| e.to_string()),
        })
        .collect();

    let rendered = match output {
        OutputFormat::Yaml => serde_yaml::to_string(&reports).map_err(|e| e.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(&reports).map_err(|e| e.to_string()),
    };
    match rendered {
        Ok(text) => println!("{}", text.trim_end()),
        Err(e) => log::error!("Failed to render report: {}", e),
    }
}

fn report_sync(result: Result<Vec<SyncedResource>, LoaderError>, output: OutputFormat) {
    match result {
        Ok(synced) if synced.is_empty() => {}
        Ok(synced) => print_reports(&synced, output),
        Err(e) => log::error!("Failed to load manifests: {}", e),
    }
}

async fn sleep_until_retry(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Applies once, then re-applies changed manifests and retries failed passes
/// until Ctrl-C.
pub async fn watch(
    reconciler: &BatchReconciler,
    mut sync: ManifestSync,
    debounce: Duration,
    output: OutputFormat,
) -> Result<(), UnitSyncError> {
    report_sync(sync.apply_changed(reconciler).await, output);

    let watcher = Arc::new(ManifestWatcher::new(sync.loader().root(), debounce));
    let mut changes = watcher.subscribe();

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<()>();
    let shutdown = watcher.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Relaxed);
        let _ = stop_tx.send(());
    }) {
        log::warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let handle = {
        let watcher = Arc::clone(&watcher);
        std::thread::spawn(move || watcher.watch())
    };

    loop {
        let retry_at = sync.retry_at();
        tokio::select! {
            _ = stop_rx.recv() => {
                log::info!("Shutting down");
                break;
            }
            _ = sleep_until_retry(retry_at) => {
                report_sync(sync.retry_pending(reconciler).await, output);
            }
            event = changes.recv() => match event {
                Ok(event) if sync.is_own_write(&event.path) => {
                    log::debug!("Ignoring status write to {}", event.path.display());
                }
                Ok(event) => {
                    log::info!("Manifest {:?}: {}", event.change_type, event.path.display());
                    report_sync(sync.apply_changed(reconciler).await, output);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Missed {} change event(s), re-checking all manifests", skipped);
                    report_sync(sync.apply_changed(reconciler).await, output);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    watcher.stop();
    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(result)) => result?,
        _ => log::warn!("Manifest watcher thread did not shut down cleanly"),
    }
    Ok(())
}
