// src/constants.rs

/// The name of a project's descriptor file.
pub const DESCRIPTOR_FILENAME: &str = "stratum.toml";

/// The schema version assumed when a descriptor declares none.
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

/// Schema versions this engine knows how to resolve.
pub const KNOWN_SCHEMA_VERSIONS: &[&str] = &["1.0", "1.1"];

/// The packaging kind a parent descriptor must declare.
pub const PACKAGING_AGGREGATE: &str = "aggregate";

/// The packaging kind assumed when a descriptor declares none.
pub const DEFAULT_PACKAGING: &str = "lib";

/// The dependency scope assumed when a declaration omits it.
pub const DEFAULT_SCOPE: &str = "build";

/// The scope marking a management entry as a BOM-style import.
pub const SCOPE_IMPORT: &str = "import";

/// Expression prefix for the current model's own fields.
pub const PROJECT_PREFIX: &str = "project.";

/// Deprecated alias for [`PROJECT_PREFIX`]; resolves, but records a warning.
pub const LEGACY_PROJECT_PREFIX: &str = "model.";

/// Property naming the timestamp format used by `${build.timestamp}`.
pub const BUILD_TIMESTAMP_FORMAT_PROPERTY: &str = "build.timestamp.format";

/// Default pattern for `${build.timestamp}` (ISO-8601, UTC).
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Hard ceiling on nested `${...}` expansions before giving up.
pub const MAX_INTERPOLATION_DEPTH: u32 = 32;
