//! Manifest sync driver state for `watch`.
//!
//! Tracks the spec last applied per resource, the content last written back
//! to each manifest, and which resources need another pass after a transport
//! failure. Retries back off exponentially. Manifest events only re-apply
//! changed specs; pending retries run on the retry timer.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{LoaderError, TransportError};
use crate::loader::{ManifestEntry, ManifestLoader};
use crate::reconciler::{BatchReconciler, ReconcilePass};
use crate::resource::SystemdSpec;

/// Doubling delay between retries, capped at `max`.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    initial: Duration,
    max: Duration,
    attempts: u32,
}

impl RetryBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempts: 0,
        }
    }

    /// Returns the delay before the next attempt and counts the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self
            .initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max));
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// One manifest applied during a sync.
#[derive(Debug)]
pub struct SyncedResource {
    /// The entry with its freshly published status.
    pub entry: ManifestEntry,
    pub result: Result<ReconcilePass, TransportError>,
}

/// Decides which manifests need a pass and when to retry failed ones.
pub struct ManifestSync {
    loader: ManifestLoader,
    write: bool,
    applied: HashMap<String, SystemdSpec>,
    written: HashMap<PathBuf, String>,
    pending: HashSet<String>,
    backoff: RetryBackoff,
    retry: Option<(Instant, Duration)>,
}

impl ManifestSync {
    /// Creates a driver. With `write`, published status is persisted back
    /// into each manifest file.
    pub fn new(loader: ManifestLoader, write: bool, backoff: RetryBackoff) -> Self {
        Self {
            loader,
            write,
            applied: HashMap::new(),
            written: HashMap::new(),
            pending: HashSet::new(),
            backoff,
            retry: None,
        }
    }

    pub fn loader(&self) -> &ManifestLoader {
        &self.loader
    }

    /// Resources waiting for a retry.
    pub fn pending_retries(&self) -> usize {
        self.pending.len()
    }

    /// When the next retry is due, if any.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry.map(|(at, _)| at)
    }

    /// Delay the current retry was scheduled with.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry.map(|(_, delay)| delay)
    }

    /// True if `path` still holds exactly what this driver last wrote there.
    pub fn is_own_write(&self, path: &Path) -> bool {
        match self.written.get(&path_key(path)) {
            Some(expected) => fs::read_to_string(path)
                .map(|content| &content == expected)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Applies every manifest whose spec differs from the last applied one.
    pub async fn apply_changed(
        &mut self,
        reconciler: &BatchReconciler,
    ) -> Result<Vec<SyncedResource>, LoaderError> {
        self.run(reconciler, false).await
    }

    /// Like [`apply_changed`](Self::apply_changed), plus every resource
    /// whose last pass failed on the transport.
    pub async fn retry_pending(
        &mut self,
        reconciler: &BatchReconciler,
    ) -> Result<Vec<SyncedResource>, LoaderError> {
        self.run(reconciler, true).await
    }

    async fn run(
        &mut self,
        reconciler: &BatchReconciler,
        include_pending: bool,
    ) -> Result<Vec<SyncedResource>, LoaderError> {
        let entries = self.loader.load()?;
        {
            let present: HashSet<&str> = entries.iter().map(|e| e.resource.name()).collect();
            self.applied.retain(|name, _| present.contains(name.as_str()));
            self.pending.retain(|name| present.contains(name.as_str()));
        }

        let no_pending = HashSet::new();
        let pending = if include_pending {
            &self.pending
        } else {
            &no_pending
        };
        let due = select_due(&self.applied, pending, entries);
        if due.is_empty() {
            log::debug!("No manifest needs a pass");
        }

        let mut synced = Vec::with_capacity(due.len());
        for mut entry in due {
            let name = entry.resource.name().to_string();
            let result = reconciler.reconcile_resource(&mut entry.resource).await;
            match &result {
                Ok(_) => {
                    self.pending.remove(&name);
                }
                Err(e) if e.is_retryable() => {
                    log::warn!("Pass for {} failed, will retry: {}", name, e);
                    self.pending.insert(name.clone());
                }
                Err(e) => {
                    log::error!("Pass for {} failed: {}", name, e);
                    self.pending.remove(&name);
                }
            }
            self.applied.insert(name, entry.resource.spec.clone());

            if self.write {
                let content = self.loader.write(&entry.resource, &entry.path)?;
                self.written.insert(path_key(&entry.path), content);
                log::debug!("Wrote status to {}", entry.path.display());
            }

            synced.push(SyncedResource { entry, result });
        }

        self.schedule_retry(include_pending);
        Ok(synced)
    }

    fn schedule_retry(&mut self, retried: bool) {
        if self.pending.is_empty() {
            self.backoff.reset();
            self.retry = None;
            return;
        }
        if retried || self.retry.is_none() {
            let delay = self.backoff.next_delay();
            log::info!(
                "Retrying {} resource(s) in {:?} (attempt {})",
                self.pending.len(),
                delay,
                self.backoff.attempts()
            );
            self.retry = Some((Instant::now() + delay, delay));
        }
    }
}

/// Entries whose spec differs from the last applied one, plus the named
/// pending ones. Input order is kept.
pub fn select_due(
    applied: &HashMap<String, SystemdSpec>,
    pending: &HashSet<String>,
    entries: Vec<ManifestEntry>,
) -> Vec<ManifestEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            let name = entry.resource.name();
            pending.contains(name) || applied.get(name) != Some(&entry.resource.spec)
        })
        .collect()
}

fn path_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
