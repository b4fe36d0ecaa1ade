//! File system watcher for manifest changes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use tokio::sync::broadcast;

use crate::error::LoaderError;

/// Event emitted when a manifest changes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestChangeEvent {
    pub change_type: ChangeType,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Created or modified; the debouncer merges both.
    Modified,
    Deleted,
}

/// Watches a manifest file or directory.
pub struct ManifestWatcher {
    root: PathBuf,
    debounce: Duration,
    sender: broadcast::Sender<ManifestChangeEvent>,
    shutdown: Arc<AtomicBool>,
}

impl ManifestWatcher {
    pub fn new(root: impl Into<PathBuf>, debounce: Duration) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            root: root.into(),
            debounce,
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a receiver for change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ManifestChangeEvent> {
        self.sender.subscribe()
    }

    /// Starts watching. Blocks until [`stop`](Self::stop) is called.
    pub fn watch(&self) -> Result<(), LoaderError> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> = new_debouncer(self.debounce, tx)
            .map_err(|e| LoaderError::WatchError(e.to_string()))?;

        // Editors replace files on save, so a single file is watched through
        // its parent directory.
        let (target, mode) = if self.root.is_file() {
            let parent = self
                .root
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            (parent.to_path_buf(), RecursiveMode::NonRecursive)
        } else {
            (self.root.clone(), RecursiveMode::Recursive)
        };

        debouncer
            .watcher()
            .watch(&target, mode)
            .map_err(|e| LoaderError::WatchError(e.to_string()))?;

        log::info!("Watching manifests at {}", self.root.display());

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if let Some(change) = self.process_event(event) {
                            let _ = self.sender.send(change);
                        }
                    }
                }
                Ok(Err(e)) => log::error!("Watch error: {}", e),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        log::info!("Stopped watching manifests");
        Ok(())
    }

    fn process_event(&self, event: DebouncedEvent) -> Option<ManifestChangeEvent> {
        let path = event.path;

        if self.root.is_file() || !self.root.exists() {
            if path.file_name() != self.root.file_name() {
                return None;
            }
        } else {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                return None;
            }
        }

        let change_type = if path.exists() {
            ChangeType::Modified
        } else {
            ChangeType::Deleted
        };

        Some(ManifestChangeEvent { change_type, path })
    }

    /// Signals the watcher to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Returns a handle that stops the watcher from another thread.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}
