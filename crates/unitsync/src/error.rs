use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnitSyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Manifest error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Hard failures of the init-system connection.
///
/// These abort the whole reconciliation pass; nothing produced by the pass
/// can be trusted once the transport is broken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to the init system: {0}")]
    Connect(String),

    #[error("Failed to list init system jobs: {0}")]
    ListJobs(String),

    #[error("Failed to close init system connection: {0}")]
    Close(String),

    #[error("Init system connection lost: {0}")]
    Disconnected(String),
}

impl TransportError {
    /// Returns true if retrying the whole pass later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_)
                | TransportError::ListJobs(_)
                | TransportError::Disconnected(_)
        )
    }
}

/// Failure of a single init-system call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CallError {
    pub message: String,
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Per-unit operational failure, recorded in the unit outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("{0}")]
    Call(#[from] CallError),

    #[error("job != done with status: {0}")]
    JobNotDone(String),

    #[error("timed out after {secs}s waiting for job {job}")]
    JobTimeout { job: String, secs: u64 },

    #[error("job {0} was abandoned before completion")]
    JobAbandoned(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors raised while reading, validating or writing `Systemd` manifests.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Manifest path not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Failed to serialize YAML: {0}")]
    SerializeYaml(String),

    #[error("Invalid API version '{version}', expected '{expected}'")]
    InvalidApiVersion { version: String, expected: String },

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("Invalid resource in '{path}': {message}")]
    InvalidResource { path: PathBuf, message: String },

    #[error("Duplicate resource name '{0}'")]
    DuplicateName(String),

    #[error("Watch error: {0}")]
    WatchError(String),
}

pub type Result<T> = std::result::Result<T, UnitSyncError>;
