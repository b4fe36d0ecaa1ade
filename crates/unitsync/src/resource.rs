//! K8s-style `Systemd` resource: desired units in `spec`, outcomes in `status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The API version of `Systemd` resources.
pub const API_VERSION: &str = "unitsync.io/v1alpha1";

/// The kind name of `Systemd` resources.
pub const KIND: &str = "Systemd";

/// Desired state of a unit.
///
/// Values outside the known set are kept verbatim in `Unrecognized` so that a
/// manifest carrying a newer or misspelled state still loads and reconciles
/// as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DesiredStatus {
    Enabled,
    Disabled,
    Started,
    Stopped,
    EnabledAndStarted,
    DisabledAndStopped,
    Unrecognized(String),
}

impl DesiredStatus {
    /// Returns the textual form used in manifests and status reports.
    pub fn as_str(&self) -> &str {
        match self {
            DesiredStatus::Enabled => "enabled",
            DesiredStatus::Disabled => "disabled",
            DesiredStatus::Started => "started",
            DesiredStatus::Stopped => "stopped",
            DesiredStatus::EnabledAndStarted => "enabled-and-started",
            DesiredStatus::DisabledAndStopped => "disabled-and-stopped",
            DesiredStatus::Unrecognized(s) => s,
        }
    }

    /// Returns all recognized desired states.
    pub fn all() -> &'static [DesiredStatus] {
        &[
            DesiredStatus::Enabled,
            DesiredStatus::Disabled,
            DesiredStatus::Started,
            DesiredStatus::Stopped,
            DesiredStatus::EnabledAndStarted,
            DesiredStatus::DisabledAndStopped,
        ]
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, DesiredStatus::Unrecognized(_))
    }
}

impl From<String> for DesiredStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "enabled" => DesiredStatus::Enabled,
            "disabled" => DesiredStatus::Disabled,
            "started" => DesiredStatus::Started,
            "stopped" => DesiredStatus::Stopped,
            "enabled-and-started" => DesiredStatus::EnabledAndStarted,
            "disabled-and-stopped" => DesiredStatus::DisabledAndStopped,
            _ => DesiredStatus::Unrecognized(s),
        }
    }
}

impl From<&str> for DesiredStatus {
    fn from(s: &str) -> Self {
        DesiredStatus::from(s.to_string())
    }
}

impl From<DesiredStatus> for String {
    fn from(status: DesiredStatus) -> Self {
        match status {
            DesiredStatus::Unrecognized(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for DesiredStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the init system resolves conflicts with already queued jobs when
/// starting or stopping a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationMode {
    /// Start the unit and its dependencies, replacing conflicting queued jobs.
    #[default]
    Replace,
    /// Fail if the request would change an already queued job.
    Fail,
    /// Start the unit and stop every unit that is not one of its dependencies.
    Isolate,
    /// Start the unit but ignore all of its dependencies.
    IgnoreDependencies,
    /// Start the unit but ignore its requirement dependencies only.
    IgnoreRequirements,
}

impl ActivationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationMode::Replace => "replace",
            ActivationMode::Fail => "fail",
            ActivationMode::Isolate => "isolate",
            ActivationMode::IgnoreDependencies => "ignore-dependencies",
            ActivationMode::IgnoreRequirements => "ignore-requirements",
        }
    }
}

impl std::fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActivationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(ActivationMode::Replace),
            "fail" => Ok(ActivationMode::Fail),
            "isolate" => Ok(ActivationMode::Isolate),
            "ignore-dependencies" => Ok(ActivationMode::IgnoreDependencies),
            "ignore-requirements" => Ok(ActivationMode::IgnoreRequirements),
            _ => Err(format!("Unknown activation mode: {}", s)),
        }
    }
}

/// Whether enable/disable operations survive a reboot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnableMode {
    /// Volatile, under `/run`.
    #[default]
    Runtime,
    /// Durable, under `/etc`.
    Persistent,
}

impl EnableMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnableMode::Runtime => "runtime",
            EnableMode::Persistent => "persistent",
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, EnableMode::Persistent)
    }
}

impl std::fmt::Display for EnableMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state of a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    /// Unit name, e.g. `nginx.service`.
    pub name: String,

    /// Desired state of the unit.
    #[serde(rename = "desiredState")]
    pub desired_status: DesiredStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_mode: Option<ActivationMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_mode: Option<EnableMode>,
}

impl UnitSpec {
    /// Creates a unit spec with unset activation and enable modes.
    pub fn new(name: impl Into<String>, desired_status: impl Into<DesiredStatus>) -> Self {
        Self {
            name: name.into(),
            desired_status: desired_status.into(),
            activation_mode: None,
            enable_mode: None,
        }
    }

    pub fn with_activation_mode(mut self, mode: ActivationMode) -> Self {
        self.activation_mode = Some(mode);
        self
    }

    pub fn with_enable_mode(mut self, mode: EnableMode) -> Self {
        self.enable_mode = Some(mode);
        self
    }

    /// Returns a copy with unset modes filled in with their defaults.
    pub fn with_defaults(&self) -> Self {
        Self {
            name: self.name.clone(),
            desired_status: self.desired_status.clone(),
            activation_mode: Some(self.activation_mode.unwrap_or_default()),
            enable_mode: Some(self.enable_mode.unwrap_or_default()),
        }
    }

    /// The effective activation mode.
    pub fn activation_mode(&self) -> ActivationMode {
        self.activation_mode.unwrap_or_default()
    }

    /// The effective enable mode.
    pub fn enable_mode(&self) -> EnableMode {
        self.enable_mode.unwrap_or_default()
    }
}

/// Metadata for a resource, following K8s conventions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Desired state of the host's units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemdSpec {
    #[serde(rename = "services", default)]
    pub units: Vec<UnitSpec>,
}

/// Status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A K8s-style status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub last_transition_time: DateTime<Utc>,
}

/// Condition type set after every reconciliation pass.
pub const READY_CONDITION: &str = "Ready";

/// Reported state of a single unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    pub name: String,

    /// State of the unit's current job, empty when there is none.
    #[serde(rename = "state", default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    #[serde(rename = "desiredState", default, skip_serializing_if = "String::is_empty")]
    pub desired_status: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Observed state of the host's units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemdStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(rename = "services", default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<UnitStatus>,
}

impl SystemdStatus {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.units.is_empty()
    }

    /// Returns the condition of the given type, if set.
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Minimal header used to check `apiVersion` and `kind` before full parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHeader {
    pub api_version: String,
    pub kind: String,
}

/// The `Systemd` resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemdResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: SystemdSpec,

    #[serde(default, skip_serializing_if = "SystemdStatus::is_empty")]
    pub status: SystemdStatus,
}

impl SystemdResource {
    /// Creates a new resource with the given units and an empty status.
    pub fn new(name: impl Into<String>, units: Vec<UnitSpec>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ObjectMeta::new(name),
            spec: SystemdSpec { units },
            status: SystemdStatus::default(),
        }
    }

    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}
