// src/core/sources.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use toml::Value;

use crate::constants::DESCRIPTOR_FILENAME;
use crate::models::Model;

/// Opaque handle to a raw descriptor's location. Supports re-resolution
/// relative to itself (sibling/parent lookups for workspace resolution).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelSource {
    path: PathBuf,
}

impl ModelSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = dunce::canonicalize(&path).unwrap_or(path);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn location(&self) -> String {
        self.path.display().to_string()
    }

    /// Resolves a path relative to this source's directory; when the target
    /// is a directory, looks for an existing descriptor inside it.
    pub fn resolve_relative(
        &self,
        relative: &str,
        reader: &dyn DescriptorReader,
    ) -> Option<Self> {
        let base = self.path.parent()?;
        let target = base.join(relative);
        let descriptor = if target.is_dir() {
            reader.locate_existing_descriptor(&target)?
        } else if target.is_file() {
            target
        } else {
            return None;
        };
        Some(Self::from_path(descriptor))
    }
}

/// A raw model paired with the source it was read from. Created once per
/// distinct path or coordinate and shared read-only for the session.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub model: Arc<Model>,
    pub source: ModelSource,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Non-readable descriptor '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Non-parseable descriptor '{path}': {message}")]
    Parse {
        path: String,
        line: Option<u32>,
        column: Option<u32>,
        message: String,
    },
}

/// Capability: read a raw descriptor from a source and locate descriptors
/// on disk. The engine treats the textual format as opaque.
pub trait DescriptorReader: Send + Sync {
    /// Reads a raw model. In strict mode, any structural mismatch is an
    /// error; in lenient mode the reader recovers what it can.
    fn read(&self, source: &ModelSource, strict: bool) -> Result<Model, SourceError>;

    /// Returns the descriptor file for `dir`, if one exists.
    fn locate_existing_descriptor(&self, dir: &Path) -> Option<PathBuf>;
}

/// Capability: map coordinates to a source outside the workspace. The two
/// failure kinds are distinguished so callers can phrase diagnostics.
pub trait CoordinateResolver: Send + Sync {
    fn resolve(
        &self,
        group_id: &str,
        artifact_id: &str,
        version: &str,
    ) -> Result<ModelSource, CoordinateError>;
}

#[derive(Error, Debug)]
pub enum CoordinateError {
    #[error("{group_id}:{artifact_id}:{version} not found")]
    NotFound {
        group_id: String,
        artifact_id: String,
        version: String,
    },
    #[error("{group_id}:{artifact_id}:{version} is ambiguous: {detail}")]
    Ambiguous {
        group_id: String,
        artifact_id: String,
        version: String,
        detail: String,
    },
    #[error("no coordinate resolver is configured")]
    NoResolver,
}

/// Capability: supply the built-in baseline model for a schema version.
pub trait SuperModelProvider: Send + Sync {
    fn super_model(&self, schema_version: &str) -> Model;
}

/// Caller-supplied hook applied once per raw-model read (two-phase builds
/// use this to pre-resolve workspace-internal coordinates). Must be
/// idempotent and side-effect free with respect to the session caches.
pub type RawModelTransformer = dyn Fn(&Model, &Path) -> Model + Send + Sync;

// --- BUNDLED TOML READER ---

/// Default [`DescriptorReader`] backed by serde + TOML. Lenient mode
/// re-reads the document as a plain value tree and salvages the scalar
/// identity fields, so a malformed descriptor still yields a model the
/// pipeline can attribute problems to.
#[derive(Debug, Default)]
pub struct TomlDescriptorReader;

impl TomlDescriptorReader {
    fn read_strict(&self, text: &str, path: &Path) -> Result<Model, SourceError> {
        toml::from_str(text).map_err(|e| parse_error(path, text, e))
    }

    fn read_lenient(&self, text: &str, path: &Path) -> Result<Model, SourceError> {
        let value: Value = toml::from_str(text).map_err(|e| parse_error(path, text, e))?;
        let table = match value {
            Value::Table(table) => table,
            _ => {
                return Err(SourceError::Parse {
                    path: path.display().to_string(),
                    line: None,
                    column: None,
                    message: "descriptor root is not a table".to_string(),
                });
            }
        };

        let str_of = |key: &str| -> Option<String> {
            table.get(key).and_then(Value::as_str).map(str::to_string)
        };
        let mut model = Model {
            schema_version: str_of("schema_version"),
            group_id: str_of("group_id"),
            artifact_id: str_of("artifact_id"),
            version: str_of("version"),
            packaging: str_of("packaging"),
            name: str_of("name"),
            url: str_of("url"),
            ..Default::default()
        };
        // Any well-formed sub-table is still worth keeping.
        if let Some(parent) = table.get("parent") {
            model.parent = parent.clone().try_into().ok();
        }
        if let Some(props) = table.get("properties") {
            if let Ok(props) = props.clone().try_into() {
                model.properties = props;
            }
        }
        Ok(model)
    }
}

impl DescriptorReader for TomlDescriptorReader {
    fn read(&self, source: &ModelSource, strict: bool) -> Result<Model, SourceError> {
        let path = source.path();
        let text = fs::read_to_string(path).map_err(|e| SourceError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut model = if strict {
            self.read_strict(&text, path)?
        } else {
            self.read_lenient(&text, path)?
        };
        model.descriptor_path = Some(path.to_path_buf());
        Ok(model)
    }

    fn locate_existing_descriptor(&self, dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(DESCRIPTOR_FILENAME);
        candidate.is_file().then_some(candidate)
    }
}

fn parse_error(path: &Path, text: &str, error: toml::de::Error) -> SourceError {
    let (line, column) = error
        .span()
        .map(|span| line_col(text, span.start))
        .map_or((None, None), |(l, c)| (Some(l), Some(c)));
    SourceError::Parse {
        path: path.display().to_string(),
        line,
        column,
        message: error.message().to_string(),
    }
}

fn line_col(text: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut column = 1u32;
    for (i, ch) in text.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

// --- SUPER-MODEL BASELINE ---

/// Built-in baseline every lineage terminates at: standard build layout,
/// no identity of its own.
#[derive(Debug, Default)]
pub struct DefaultSuperModelProvider;

impl SuperModelProvider for DefaultSuperModelProvider {
    fn super_model(&self, schema_version: &str) -> Model {
        use crate::models::Build;
        Model {
            schema_version: Some(schema_version.to_string()),
            build: Some(Build {
                directory: Some("build".to_string()),
                source_directory: Some("src".to_string()),
                output_directory: Some("build/out".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
