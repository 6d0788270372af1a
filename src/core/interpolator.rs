// src/core/interpolator.rs

use std::collections::HashMap;
use std::path::Path;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::constants::{
    BUILD_TIMESTAMP_FORMAT_PROPERTY, DEFAULT_TIMESTAMP_FORMAT, LEGACY_PROJECT_PREFIX,
    MAX_INTERPOLATION_DEPTH, PROJECT_PREFIX,
};
use crate::core::paths;
use crate::core::problems::{Problem, ProblemCollector, Severity};
use crate::models::{Model, Properties};

lazy_static! {
    // Finds any ${...} token; all resolution logic lives in the expansion
    // engine, not the regex.
    static ref TOKEN_RE: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();
}

/// Expression keys whose resolved values must be re-anchored at the
/// project base directory.
const TRANSLATED_PATH_KEYS: &[&str] = &[
    "build.directory",
    "build.source_directory",
    "build.output_directory",
    "reporting.output_directory",
];

/// Expression keys whose resolved values are URLs to normalize.
const URL_KEYS: &[&str] = &["url"];

/// Everything the value sources need besides the model itself.
pub struct InterpolationContext<'a> {
    pub project_dir: Option<&'a Path>,
    pub root_dir: Option<&'a Path>,
    pub user_properties: &'a Properties,
    pub system_properties: &'a Properties,
    pub session_start: DateTime<Utc>,
}

/// Resolves `${...}` tokens against the layered value sources:
/// built-in paths, timestamp, prefixed self-reference, user properties,
/// model properties, system properties, environment, unprefixed fallback.
/// Unresolvable tokens are left verbatim. Results are memoized per input
/// string for the lifetime of one interpolation batch.
pub struct Interpolator<'a> {
    model: &'a Model,
    ctx: &'a InterpolationContext<'a>,
    memo: HashMap<String, String>,
    // Canonical expressions currently being expanded, for cycle detection.
    stack: Vec<String>,
}

impl<'a> Interpolator<'a> {
    pub fn new(model: &'a Model, ctx: &'a InterpolationContext<'a>) -> Self {
        Self {
            model,
            ctx,
            memo: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Expands every token in `input`. A string with no `${` comes back
    /// unchanged (and untouched by the memo).
    pub fn interpolate(&mut self, input: &str, problems: &mut ProblemCollector) -> String {
        if !input.contains("${") {
            return input.to_string();
        }
        if let Some(cached) = self.memo.get(input) {
            return cached.clone();
        }
        let result = self.expand(input, 0, problems);
        self.memo.insert(input.to_string(), result.clone());
        result
    }

    fn expand(&mut self, input: &str, depth: u32, problems: &mut ProblemCollector) -> String {
        if depth >= MAX_INTERPOLATION_DEPTH {
            problems.add(Problem::new(
                Severity::Error,
                format!(
                    "Expression expansion exceeded {MAX_INTERPOLATION_DEPTH} levels while \
                     resolving '{input}'"
                ),
            ));
            return input.to_string();
        }

        let mut output = String::with_capacity(input.len());
        let mut last_end = 0;
        for caps in TOKEN_RE.captures_iter(input) {
            let (Some(full), Some(token)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let expr = token.as_str().trim();
            output.push_str(&input[last_end..full.start()]);

            match self.resolve(expr, depth, problems) {
                Some(value) => output.push_str(&value),
                // Unresolved tokens are not an error; they stay verbatim.
                None => output.push_str(full.as_str()),
            }
            last_end = full.end();
        }
        output.push_str(&input[last_end..]);
        output
    }

    fn resolve(&mut self, expr: &str, depth: u32, problems: &mut ProblemCollector) -> Option<String> {
        let bare = strip_project_prefix(expr);

        // Prefix-aware recursion guard: ${project.version} and ${version}
        // are the same expression for cycle purposes.
        if self.stack.iter().any(|e| e == bare) {
            problems.add(Problem::new(
                Severity::Error,
                format!(
                    "Detected cycle in expression '${{{expr}}}': {} -> {bare}",
                    self.stack.join(" -> ")
                ),
            ));
            return None;
        }
        self.stack.push(bare.to_string());
        let raw = self.lookup(expr, bare, problems);
        // The looked-up value may itself contain tokens.
        let value = raw.map(|v| self.expand(&v, depth + 1, problems));
        self.stack.pop();

        let value = value.map(|v| self.post_process(bare, v));
        if value.is_some() && expr.starts_with(LEGACY_PROJECT_PREFIX) {
            problems.add(Problem::new(
                Severity::Warning,
                format!(
                    "The expression ${{{expr}}} is deprecated. Please use \
                     ${{{PROJECT_PREFIX}{bare}}} instead."
                ),
            ));
        }
        value
    }

    /// First match wins, in the layered source order.
    fn lookup(&self, expr: &str, bare: &str, problems: &mut ProblemCollector) -> Option<String> {
        if let Some(value) = self.builtin_value(bare, problems) {
            return Some(value);
        }
        if expr.starts_with(PROJECT_PREFIX) || expr.starts_with(LEGACY_PROJECT_PREFIX) {
            if let Some(value) = model_accessor(self.model, bare) {
                return Some(value);
            }
        }
        if let Some(value) = self.ctx.user_properties.get(expr) {
            return Some(value.to_string());
        }
        if let Some(value) = self.model.properties.get(expr) {
            return Some(value.to_string());
        }
        if let Some(value) = self.ctx.system_properties.get(expr) {
            return Some(value.to_string());
        }
        if let Some(var) = expr.strip_prefix("env.") {
            if let Some(value) = self.ctx.system_properties.get(expr) {
                return Some(value.to_string());
            }
            if let Ok(value) = std::env::var(var) {
                return Some(value);
            }
        }
        // Unprefixed self-reference is the last resort.
        model_accessor(self.model, bare)
    }

    /// The built-in pseudo-properties: basedir, base_uri, build timestamp
    /// and the workspace root directory.
    fn builtin_value(&self, bare: &str, problems: &mut ProblemCollector) -> Option<String> {
        match bare {
            "basedir" => self.ctx.project_dir.map(path_display),
            "basedir.uri" => self.ctx.project_dir.map(path_uri),
            "base_uri" => self.ctx.project_dir.map(path_uri),
            "build.timestamp" => Some(self.formatted_timestamp(problems)),
            "root_directory" => self.ctx.root_dir.map(path_display),
            "root_directory.uri" => self.ctx.root_dir.map(path_uri),
            _ => None,
        }
    }

    /// The format pattern comes from descriptor properties, so it is
    /// untrusted input; a pattern chrono cannot parse falls back to the
    /// default instead of panicking inside `format()`.
    fn formatted_timestamp(&self, problems: &mut ProblemCollector) -> String {
        let pattern = self
            .model
            .properties
            .get(BUILD_TIMESTAMP_FORMAT_PROPERTY)
            .unwrap_or(DEFAULT_TIMESTAMP_FORMAT);
        let pattern = if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            problems.add(Problem::new(
                Severity::Warning,
                format!(
                    "Invalid '{BUILD_TIMESTAMP_FORMAT_PROPERTY}' pattern '{pattern}'; \
                     falling back to '{DEFAULT_TIMESTAMP_FORMAT}'"
                ),
            ));
            DEFAULT_TIMESTAMP_FORMAT
        } else {
            pattern
        };
        self.ctx.session_start.format(pattern).to_string()
    }

    /// Post-substitution fixups: recognized path keys are aligned to the
    /// project directory, recognized URL keys are normalized.
    fn post_process(&self, bare: &str, value: String) -> String {
        if TRANSLATED_PATH_KEYS.contains(&bare) {
            if let Some(dir) = self.ctx.project_dir {
                return paths::align_to_base_dir(&value, dir);
            }
        }
        if URL_KEYS.contains(&bare) {
            return paths::normalize_url(&value);
        }
        value
    }
}

fn strip_project_prefix(expr: &str) -> &str {
    expr.strip_prefix(PROJECT_PREFIX)
        .or_else(|| expr.strip_prefix(LEGACY_PROJECT_PREFIX))
        .unwrap_or(expr)
}

fn path_display(path: &Path) -> String {
    dunce::simplified(path).display().to_string()
}

fn path_uri(path: &Path) -> String {
    let display = path.display().to_string().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

/// The enumerated accessor table behind `${project.*}`: an explicit map
/// from dotted paths to extraction functions. Unknown paths are a clean
/// "not found", never a failure.
fn model_accessor(model: &Model, path: &str) -> Option<String> {
    let owned = |value: &str| Some(value.to_string());
    match path {
        "group_id" => model.effective_group_id().and_then(owned),
        "artifact_id" => model.artifact_id.as_deref().and_then(owned),
        "version" => model.effective_version().and_then(owned),
        "packaging" => owned(model.effective_packaging()),
        "name" => model.name.as_deref().and_then(owned),
        "url" => model.url.as_deref().and_then(owned),
        "id" => Some(model.id()),
        "parent.group_id" => model
            .parent
            .as_ref()
            .and_then(|p| p.group_id.as_deref())
            .and_then(owned),
        "parent.artifact_id" => model
            .parent
            .as_ref()
            .and_then(|p| p.artifact_id.as_deref())
            .and_then(owned),
        "parent.version" => model
            .parent
            .as_ref()
            .and_then(|p| p.version.as_deref())
            .and_then(owned),
        "build.directory" => model
            .build
            .as_ref()
            .and_then(|b| b.directory.as_deref())
            .and_then(owned),
        "build.source_directory" => model
            .build
            .as_ref()
            .and_then(|b| b.source_directory.as_deref())
            .and_then(owned),
        "build.output_directory" => model
            .build
            .as_ref()
            .and_then(|b| b.output_directory.as_deref())
            .and_then(owned),
        "build.final_name" => model
            .build
            .as_ref()
            .and_then(|b| b.final_name.as_deref())
            .and_then(owned),
        "reporting.output_directory" => model
            .reporting
            .as_ref()
            .and_then(|r| r.output_directory.as_deref())
            .and_then(owned),
        _ => None,
    }
}

/// Interpolates every string field of the model. Plugin configuration
/// blocks are deliberately left alone; they are expanded by a dedicated
/// later stage only when plugin processing is enabled.
pub fn interpolate_model(
    model: &Model,
    ctx: &InterpolationContext<'_>,
    problems: &mut ProblemCollector,
) -> Model {
    fn fix(
        value: &mut Option<String>,
        interpolator: &mut Interpolator<'_>,
        problems: &mut ProblemCollector,
    ) {
        if let Some(v) = value {
            *v = interpolator.interpolate(v, problems);
        }
    }

    let mut interpolator = Interpolator::new(model, ctx);
    let mut out = model.clone();

    fix(&mut out.group_id, &mut interpolator, problems);
    fix(&mut out.version, &mut interpolator, problems);
    fix(&mut out.packaging, &mut interpolator, problems);
    fix(&mut out.name, &mut interpolator, problems);
    fix(&mut out.url, &mut interpolator, problems);
    if let Some(parent) = &mut out.parent {
        fix(&mut parent.version, &mut interpolator, problems);
    }

    out.properties = out
        .properties
        .iter()
        .map(|(k, v)| (k.to_string(), interpolator.interpolate(v, problems)))
        .collect();

    for dep in &mut out.dependencies {
        interpolate_dependency(dep, &mut interpolator, problems);
    }
    if let Some(mgmt) = &mut out.dependency_management {
        for dep in &mut mgmt.dependencies {
            interpolate_dependency(dep, &mut interpolator, problems);
        }
    }
    if let Some(build) = &mut out.build {
        fix(&mut build.directory, &mut interpolator, problems);
        fix(&mut build.source_directory, &mut interpolator, problems);
        fix(&mut build.output_directory, &mut interpolator, problems);
        fix(&mut build.final_name, &mut interpolator, problems);
        for resource in &mut build.resources {
            fix(&mut resource.directory, &mut interpolator, problems);
        }
        for plugin in &mut build.plugins {
            fix(&mut plugin.version, &mut interpolator, problems);
        }
        if let Some(mgmt) = &mut build.plugin_management {
            for plugin in &mut mgmt.plugins {
                fix(&mut plugin.version, &mut interpolator, problems);
            }
        }
    }
    if let Some(reporting) = &mut out.reporting {
        fix(&mut reporting.output_directory, &mut interpolator, problems);
    }
    out
}

fn interpolate_dependency(
    dep: &mut crate::models::Dependency,
    interpolator: &mut Interpolator<'_>,
    problems: &mut ProblemCollector,
) {
    for value in [
        &mut dep.group_id,
        &mut dep.artifact_id,
        &mut dep.version,
        &mut dep.scope,
        &mut dep.classifier,
    ] {
        if let Some(v) = value {
            *v = interpolator.interpolate(v, problems);
        }
    }
}

/// Expands `${...}` references inside plugin configuration blocks. This is
/// the plugin-processing stage the main pass skips.
pub fn expand_plugin_configuration(
    model: &Model,
    ctx: &InterpolationContext<'_>,
    problems: &mut ProblemCollector,
) -> Model {
    let mut interpolator = Interpolator::new(model, ctx);
    let mut out = model.clone();
    if let Some(build) = &mut out.build {
        for plugin in &mut build.plugins {
            plugin.configuration = plugin
                .configuration
                .iter()
                .map(|(k, v)| (k.to_string(), interpolator.interpolate(v, problems)))
                .collect();
            for execution in &mut plugin.executions {
                execution.configuration = execution
                    .configuration
                    .iter()
                    .map(|(k, v)| (k.to_string(), interpolator.interpolate(v, problems)))
                    .collect();
            }
        }
    }
    out
}
