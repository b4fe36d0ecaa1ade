//! Builder patterns for creating test resources programmatically.

#![allow(dead_code)]

use unitsync::{ActivationMode, DesiredStatus, EnableMode, SystemdResource, UnitSpec};

/// Builder for creating `SystemdResource` instances.
pub struct ResourceBuilder {
    name: String,
    units: Vec<UnitSpec>,
}

impl ResourceBuilder {
    /// Create a new builder for a resource with no units.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            units: vec![],
        }
    }

    /// Add a unit with default modes.
    pub fn unit(mut self, name: &str, desired: &str) -> Self {
        self.units.push(UnitSpec::new(name, DesiredStatus::from(desired)));
        self
    }

    /// Add a unit with explicit modes.
    pub fn unit_with_modes(
        mut self,
        name: &str,
        desired: &str,
        activation: ActivationMode,
        enable: EnableMode,
    ) -> Self {
        self.units.push(
            UnitSpec::new(name, DesiredStatus::from(desired))
                .with_activation_mode(activation)
                .with_enable_mode(enable),
        );
        self
    }

    /// Build the resource.
    pub fn build(self) -> SystemdResource {
        SystemdResource::new(self.name, self.units)
    }
}

/// Renders a manifest as YAML, the way it would be stored on disk.
pub fn manifest_yaml(resource: &SystemdResource) -> String {
    serde_yaml::to_string(resource).expect("resource serializes")
}
