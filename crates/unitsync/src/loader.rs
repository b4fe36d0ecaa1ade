//! Manifest loader for `Systemd` resources stored as YAML.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::error::LoaderError;
use crate::resource::{ResourceHeader, SystemdResource, API_VERSION, KIND};

type Result<T> = std::result::Result<T, LoaderError>;

/// Longest unit name systemd accepts.
const UNIT_NAME_MAX: usize = 255;

fn unit_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[A-Za-z0-9:_.\\@-]+\.(service|socket|device|mount|automount|swap|target|path|timer|slice|scope)$",
        )
        .expect("unit name pattern is valid")
    })
}

/// A resource together with the file it was loaded from.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub resource: SystemdResource,
    pub path: PathBuf,
}

/// Loads `Systemd` manifests from a file or a directory tree.
pub struct ManifestLoader {
    root: PathBuf,
}

impl ManifestLoader {
    /// Creates a loader for a manifest file or directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads every manifest under the root, sorted by resource name.
    ///
    /// Hidden files and directories are skipped. Resource names must be
    /// unique across all files.
    pub fn load(&self) -> Result<Vec<ManifestEntry>> {
        if !self.root.exists() {
            return Err(LoaderError::NotFound(self.root.clone()));
        }

        if self.root.is_file() {
            let resource = self.load_file(&self.root)?;
            return Ok(vec![ManifestEntry {
                resource,
                path: self.root.clone(),
            }]);
        }

        let mut entries: Vec<ManifestEntry> = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            if let Ok(relative) = path.strip_prefix(&self.root) {
                let hidden = relative.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
                });
                if hidden {
                    continue;
                }
            }

            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                continue;
            }

            let resource = self.load_file(path).map_err(|e| {
                log::warn!("Failed to load {}: {}", path.display(), e);
                e
            })?;

            if entries
                .iter()
                .any(|existing| existing.resource.name() == resource.name())
            {
                return Err(LoaderError::DuplicateName(resource.name().to_string()));
            }

            entries.push(ManifestEntry {
                resource,
                path: path.to_path_buf(),
            });
        }

        entries.sort_by(|a, b| a.resource.name().cmp(b.resource.name()));
        log::debug!(
            "Loaded {} manifest(s) from {}",
            entries.len(),
            self.root.display()
        );
        Ok(entries)
    }

    /// Loads and validates a single manifest file.
    pub fn load_file(&self, path: &Path) -> Result<SystemdResource> {
        let content = fs::read_to_string(path).map_err(|e| LoaderError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        parse_resource(&content, path)
    }

    /// Writes a resource, including its status, back to `path` and returns
    /// the written content.
    pub fn write(&self, resource: &SystemdResource, path: &Path) -> Result<String> {
        let content =
            serde_yaml::to_string(resource).map_err(|e| LoaderError::SerializeYaml(e.to_string()))?;

        fs::write(path, &content).map_err(|e| LoaderError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(content)
    }
}

/// Parses and validates a resource from YAML content.
pub fn parse_resource(content: &str, path: &Path) -> Result<SystemdResource> {
    let header: ResourceHeader =
        serde_yaml::from_str(content).map_err(|e| LoaderError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if header.api_version != API_VERSION {
        return Err(LoaderError::InvalidApiVersion {
            version: header.api_version,
            expected: API_VERSION.to_string(),
        });
    }
    if header.kind != KIND {
        return Err(LoaderError::UnknownKind(header.kind));
    }

    let resource: SystemdResource =
        serde_yaml::from_str(content).map_err(|e| LoaderError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    validate_resource(&resource).map_err(|message| LoaderError::InvalidResource {
        path: path.to_path_buf(),
        message,
    })?;

    Ok(resource)
}

/// Checks the fields the reconciler relies on.
pub fn validate_resource(resource: &SystemdResource) -> std::result::Result<(), String> {
    if resource.metadata.name.trim().is_empty() {
        return Err("metadata.name must not be empty".to_string());
    }

    let mut seen = HashSet::new();
    for (index, unit) in resource.spec.units.iter().enumerate() {
        if unit.name.is_empty() {
            return Err(format!("spec.services[{}].name must not be empty", index));
        }
        if unit.name.len() > UNIT_NAME_MAX || !unit_name_regex().is_match(&unit.name) {
            return Err(format!(
                "spec.services[{}].name '{}' is not a valid unit name",
                index, unit.name
            ));
        }
        if !seen.insert(unit.name.as_str()) {
            return Err(format!("unit '{}' is listed more than once", unit.name));
        }
        if !unit.desired_status.is_recognized() {
            log::warn!(
                "Unit {} has unrecognized desired state '{}', it will not be changed",
                unit.name,
                unit.desired_status
            );
        }
    }

    Ok(())
}
