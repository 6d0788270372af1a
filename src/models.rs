// src/models.rs

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_PACKAGING, DEFAULT_SCOPE};

// --- SOURCE LOCATIONS (for diagnostics) ---

/// Points at the place in a descriptor a model element came from.
/// Line/column are only known when the reader reports them; the source
/// path is filled in by the engine after every successful read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputLocation {
    pub source: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl InputLocation {
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            line: None,
            column: None,
        }
    }
}

// --- ORDERED PROPERTIES ---

/// An ordered string-to-string map. Declaration order is preserved so that
/// merges and interpolation stay deterministic across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(Vec<(String, String)>);

impl Properties {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces a value, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Adds entries from `other`; existing keys keep their current value.
    pub fn merge_keep_existing(&mut self, other: &Self) {
        for (k, v) in other.iter() {
            if !self.contains_key(k) {
                self.0.push((k.to_string(), v.to_string()));
            }
        }
    }

    /// Adds entries from `other`; collisions take the incoming value.
    pub fn merge_override(&mut self, other: &Self) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PropertiesVisitor;

        impl<'de> Visitor<'de> for PropertiesVisitor {
            type Value = Properties;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of string properties")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut props = Properties::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    props.insert(key, value);
                }
                Ok(props)
            }
        }

        deserializer.deserialize_map(PropertiesVisitor)
    }
}

// --- DESCRIPTOR MODEL ---

/// Reference to the descriptor a model inherits from.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Parent {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    /// Filesystem hint for workspace-local resolution, relative to the
    /// child's descriptor. Defaults to `..` when absent.
    pub relative_path: Option<String>,
}

impl Parent {
    /// The dedup identity used for parent-cycle detection.
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.group_id.as_deref().unwrap_or(""),
            self.artifact_id.as_deref().unwrap_or(""),
            self.version.as_deref().unwrap_or("")
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Exclusion {
    pub group_id: String,
    pub artifact_id: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Dependency {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    /// Artifact kind ("lib", "aggregate", ...). Defaults to "lib".
    pub kind: Option<String>,
    pub classifier: Option<String>,
    pub scope: Option<String>,
    pub optional: Option<bool>,
    #[serde(default)]
    pub exclusions: Vec<Exclusion>,
}

impl Dependency {
    /// Key used to match a declaration against a management entry:
    /// `group:artifact:kind[:classifier]`.
    pub fn management_key(&self) -> String {
        let mut key = format!(
            "{}:{}:{}",
            self.group_id.as_deref().unwrap_or(""),
            self.artifact_id.as_deref().unwrap_or(""),
            self.kind.as_deref().unwrap_or(DEFAULT_PACKAGING)
        );
        if let Some(classifier) = &self.classifier {
            key.push(':');
            key.push_str(classifier);
        }
        key
    }

    /// The coordinate triplet (missing fields rendered empty), used for
    /// import-cycle tracking.
    pub fn coordinate_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.group_id.as_deref().unwrap_or(""),
            self.artifact_id.as_deref().unwrap_or(""),
            self.version.as_deref().unwrap_or("")
        )
    }

    pub fn effective_scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(DEFAULT_SCOPE)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct DependencyManagement {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct PluginExecution {
    pub id: Option<String>,
    pub phase: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub configuration: Properties,
}

impl PluginExecution {
    /// Executions merge by id when both sides declare one, otherwise by
    /// their goal set.
    pub fn merge_key(&self) -> String {
        match &self.id {
            Some(id) => format!("id:{id}"),
            None => format!("goals:{}", self.goals.join(",")),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Plugin {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub configuration: Properties,
    #[serde(default)]
    pub executions: Vec<PluginExecution>,
}

impl Plugin {
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.group_id.as_deref().unwrap_or(""),
            self.artifact_id.as_deref().unwrap_or("")
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct PluginManagement {
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Resource {
    pub directory: Option<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    pub filtering: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Build {
    pub directory: Option<String>,
    pub source_directory: Option<String>,
    pub output_directory: Option<String>,
    pub final_name: Option<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
    pub plugin_management: Option<PluginManagement>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Reporting {
    pub output_directory: Option<String>,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
}

// --- PROFILES ---

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct PropertyActivation {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct OsActivation {
    pub name: Option<String>,
    pub family: Option<String>,
    pub arch: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct FileActivation {
    pub exists: Option<String>,
    pub missing: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Activation {
    pub active_by_default: Option<bool>,
    pub property: Option<PropertyActivation>,
    pub os: Option<OsActivation>,
    pub file: Option<FileActivation>,
}

impl Activation {
    /// Whether any conditional activator is configured (the default flag
    /// does not count; it is handled by the selector's default bucket).
    pub fn has_conditions(&self) -> bool {
        self.property.is_some() || self.os.is_some() || self.file.is_some()
    }
}

/// Where a profile was declared. Project-sourced default-active profiles
/// are suppressed when any other project-sourced profile activates;
/// externally supplied ones never are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProfileSource {
    #[default]
    Project,
    External,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub id: String,
    pub activation: Option<Activation>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    pub dependency_management: Option<DependencyManagement>,
    pub build: Option<Build>,
    pub reporting: Option<Reporting>,
    #[serde(skip)]
    pub source: ProfileSource,
}

// --- THE MODEL ---

/// A project descriptor. Raw as authored, or effective once the engine has
/// run the full pipeline over it. Transforms never mutate a shared model;
/// every stage returns a new value.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub schema_version: Option<String>,
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub packaging: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub parent: Option<Parent>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    pub dependency_management: Option<DependencyManagement>,
    pub build: Option<Build>,
    pub reporting: Option<Reporting>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub subprojects: Vec<String>,
    /// Absolute path of the descriptor this model was read from, if any.
    #[serde(skip)]
    pub descriptor_path: Option<PathBuf>,
}

impl Model {
    /// Group id, falling back to the parent reference when inherited.
    pub fn effective_group_id(&self) -> Option<&str> {
        self.group_id
            .as_deref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.group_id.as_deref()))
    }

    /// Version, falling back to the parent reference when inherited.
    pub fn effective_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or_else(|| self.parent.as_ref().and_then(|p| p.version.as_deref()))
    }

    pub fn effective_packaging(&self) -> &str {
        self.packaging.as_deref().unwrap_or(DEFAULT_PACKAGING)
    }

    /// `group:artifact:version` with `[unknown]` placeholders, for
    /// diagnostics and contributing-model-id lists.
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.effective_group_id().unwrap_or("[unknown-group]"),
            self.artifact_id.as_deref().unwrap_or("[unknown-artifact]"),
            self.effective_version().unwrap_or("[unknown-version]")
        )
    }

    /// Directory containing this model's descriptor.
    pub fn project_dir(&self) -> Option<&Path> {
        self.descriptor_path.as_deref().and_then(Path::parent)
    }

    pub fn location(&self) -> InputLocation {
        match &self.descriptor_path {
            Some(path) => InputLocation::from_source(path.display().to_string()),
            None => InputLocation::default(),
        }
    }
}
