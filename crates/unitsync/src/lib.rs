pub mod config;
pub mod error;
pub mod executor;
pub mod loader;
pub mod reconciler;
pub mod resource;
pub mod status;
pub mod sync;
pub mod transport;
pub mod watcher;

pub use config::{load_config, AgentConfig, BusKind, LogFormat};
pub use error::{CallError, ConfigError, LoaderError, Result, TransportError, UnitError, UnitSyncError};
pub use executor::{UnitExecutor, UnitOutcome};
pub use loader::{ManifestEntry, ManifestLoader};
pub use reconciler::{BatchReconciler, ReconcilePass};
pub use resource::{
    ActivationMode, DesiredStatus, EnableMode, SystemdResource, SystemdSpec, SystemdStatus,
    UnitSpec, UnitStatus, API_VERSION, KIND,
};
pub use sync::{ManifestSync, RetryBackoff, SyncedResource};
pub use transport::memory::MemoryInitSystem;
pub use transport::{Connector, InitSystem};
pub use watcher::{ManifestChangeEvent, ManifestWatcher};
