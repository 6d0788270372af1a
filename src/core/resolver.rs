// src/core/resolver.rs

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;

use crate::constants::{
    DEFAULT_SCHEMA_VERSION, PACKAGING_AGGREGATE, SCOPE_IMPORT,
};
use crate::core::activation::ActivationContext;
use crate::core::context::{ContextError, SessionContext, TAG_FILE, TAG_IMPORT, TAG_RAW};
use crate::core::interpolator::{self, InterpolationContext};
use crate::core::management;
use crate::core::normalizer;
use crate::core::paths;
use crate::core::problems::{Problem, ProblemCollector, Severity};
use crate::core::profiles;
use crate::core::sources::{
    CoordinateResolver, DefaultSuperModelProvider, DescriptorReader, ModelData, ModelSource,
    RawModelTransformer, SourceError, SuperModelProvider, TomlDescriptorReader,
};
use crate::core::validator;
use crate::core::version::{self, Version, VersionRange};
use crate::core::inheritance;
use crate::models::{Model, Parent, Profile, ProfileSource, Properties};

/// Model id under which the built-in baseline model is registered in
/// resolution results.
const SUPER_MODEL_ID: &str = "";

// --- PUBLIC SURFACE ---

/// The resolution engine: immutable configuration shared by every session.
/// Collaborators are trait objects so callers can swap descriptor formats,
/// external coordinate lookup and the baseline model.
pub struct Engine {
    reader: Arc<dyn DescriptorReader>,
    resolver: Option<Arc<dyn CoordinateResolver>>,
    super_models: Arc<dyn SuperModelProvider>,
    transformer: Option<Arc<RawModelTransformer>>,
    process_plugins: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            reader: Arc::new(TomlDescriptorReader),
            resolver: None,
            super_models: Arc::new(DefaultSuperModelProvider),
            transformer: None,
            process_plugins: true,
        }
    }

    pub fn with_reader(mut self, reader: Arc<dyn DescriptorReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_coordinate_resolver(mut self, resolver: Arc<dyn CoordinateResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_super_models(mut self, provider: Arc<dyn SuperModelProvider>) -> Self {
        self.super_models = provider;
        self
    }

    /// Installs the raw-model hook used by two-phase builds.
    pub fn with_transformer(mut self, transformer: Arc<RawModelTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_plugin_processing(mut self, enabled: bool) -> Self {
        self.process_plugins = enabled;
        self
    }

    /// Opens a session: one shared cache scope for any number of builds.
    pub fn new_session(&self) -> Session<'_> {
        Session {
            engine: self,
            context: Arc::new(SessionContext::new()),
            start: Utc::now(),
        }
    }
}

/// What to resolve and under which environment.
#[derive(Clone)]
pub struct ResolveRequest {
    pub source: ModelSource,
    pub active_profile_ids: HashSet<String>,
    pub inactive_profile_ids: HashSet<String>,
    pub user_properties: Properties,
    pub system_properties: Properties,
    /// Profiles supplied from outside any descriptor (tagged External).
    pub external_profiles: Vec<Profile>,
    /// Root used for `${root_directory}` and the workspace index.
    pub workspace_root: Option<PathBuf>,
}

impl ResolveRequest {
    pub fn new(source: ModelSource) -> Self {
        Self {
            source,
            active_profile_ids: HashSet::new(),
            inactive_profile_ids: HashSet::new(),
            user_properties: Properties::new(),
            system_properties: Properties::new(),
            external_profiles: Vec::new(),
            workspace_root: None,
        }
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_external_profiles(mut self, profiles: Vec<Profile>) -> Self {
        self.external_profiles = profiles
            .into_iter()
            .map(|mut p| {
                p.source = ProfileSource::External;
                p
            })
            .collect();
        self
    }
}

/// A finished resolution: the effective model plus everything a caller
/// needs to trace where it came from.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    pub effective: Model,
    /// Contributing model ids, leaf first; the baseline model is listed
    /// last under the empty id.
    pub model_ids: Vec<String>,
    pub raw_models: HashMap<String, Arc<Model>>,
    pub active_profiles: HashMap<String, Vec<String>>,
    pub problems: Vec<Problem>,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("model resolution failed with {} problem(s)", problems.len())]
    Build {
        problems: Vec<Problem>,
        /// Whatever was assembled before resolution failed, when the
        /// pipeline got far enough to produce anything.
        partial: Option<Box<ResolveResult>>,
    },
}

impl ResolveError {
    pub fn problems(&self) -> &[Problem] {
        match self {
            Self::Build { problems, .. } => problems,
        }
    }
}

/// Raw model plus its activated form, the output of resolution phase one.
/// Feeding it back into [`Session::build_from_file_model`] completes the
/// pipeline.
#[derive(Clone)]
pub struct FileModel {
    pub raw: Arc<Model>,
    pub activated: Model,
    pub active_profiles: Vec<String>,
    source: ModelSource,
    /// Problems collected during phase one, replayed when the build is
    /// completed later so both entry points report the same set.
    problems: Vec<Problem>,
}

/// One build scope: shares caches, problem-free by itself; each build call
/// gets its own collector.
pub struct Session<'a> {
    engine: &'a Engine,
    context: Arc<SessionContext>,
    start: DateTime<Utc>,
}

// Pipeline stages bail out with this marker once a Fatal problem has been
// collected; the details live in the collector.
struct FatalAbort;

impl<'a> Session<'a> {
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Single-phase resolution: phase one and two back to back.
    pub fn build(&self, request: &ResolveRequest) -> Result<ResolveResult, ResolveError> {
        let mut problems = ProblemCollector::new();
        let file_model = match self.read_file_model_inner(request, &mut problems) {
            Ok(file_model) => file_model,
            Err(FatalAbort) => return Err(failed(problems, None)),
        };
        self.finish_build(file_model, request, problems)
    }

    /// Phase one: raw read, normalization and profile activation of the
    /// requested descriptor only. Lineage is untouched.
    pub fn read_file_model(&self, request: &ResolveRequest) -> Result<FileModel, ResolveError> {
        let mut problems = ProblemCollector::new();
        match self.read_file_model_inner(request, &mut problems) {
            Ok(file_model) if !problems.has_errors() => Ok(file_model),
            Ok(_) | Err(FatalAbort) => Err(failed(problems, None)),
        }
    }

    /// Phase two: completes a build from a previously inspected file model.
    /// With no transformer installed the result is identical to [`build`].
    pub fn build_from_file_model(
        &self,
        file_model: &FileModel,
        request: &ResolveRequest,
    ) -> Result<ResolveResult, ResolveError> {
        let mut problems = ProblemCollector::new();
        for problem in &file_model.problems {
            problems.add(problem.clone());
        }
        self.finish_build(file_model.clone(), request, problems)
    }

    /// Resolves every project reachable from the request's descriptor via
    /// subproject aggregation, in parallel, sharing this session's caches.
    pub fn build_workspace(
        &self,
        request: &ResolveRequest,
    ) -> Vec<(ModelSource, Result<ResolveResult, ResolveError>)> {
        let mut discovery = ProblemCollector::new();
        let sources = self.collect_workspace_sources(request, &mut discovery);
        let discovery_problems = discovery.into_problems();

        let mut results: Vec<(ModelSource, Result<ResolveResult, ResolveError>)> = sources
            .into_par_iter()
            .map(|source| {
                let mut sub_request = request.clone();
                sub_request.source = source.clone();
                (source, self.build(&sub_request))
            })
            .collect();

        // Aggregation problems belong to the root project's entry.
        if !discovery_problems.is_empty() {
            if let Some((_, result)) = results.first_mut() {
                match result {
                    Ok(ok) => {
                        ok.problems.splice(0..0, discovery_problems);
                    }
                    Err(ResolveError::Build { problems, .. }) => {
                        problems.splice(0..0, discovery_problems);
                    }
                }
            }
        }
        results
    }

    // --- PHASE ONE ---

    fn read_file_model_inner(
        &self,
        request: &ResolveRequest,
        problems: &mut ProblemCollector,
    ) -> Result<FileModel, FatalAbort> {
        if let Some(root) = &request.workspace_root {
            self.context
                .index_workspace(root, self.engine.reader.as_ref());
        }

        let data = self.read_raw(&request.source, TAG_FILE, problems)?;
        let mut raw = (*data.model).clone();
        self.complete_parent_coordinates(&mut raw, problems);
        self.discover_subprojects(&mut raw);
        override_model_properties(&mut raw, &request.user_properties);

        validator::validate_raw(&raw, problems);
        if problems.has_fatal() {
            return Err(FatalAbort);
        }

        let (activated, active_profiles) =
            self.activate_file_model(&raw, request, true, problems);
        Ok(FileModel {
            raw: Arc::new(raw),
            activated,
            active_profiles,
            source: data.source.clone(),
            problems: problems.problems().to_vec(),
        })
    }

    /// Reads a raw model through the session cache. Strict parse failures
    /// are retried leniently (WARNING); an unreadable or unsalvageable
    /// descriptor is FATAL.
    fn read_raw(
        &self,
        source: &ModelSource,
        tag: &'static str,
        problems: &mut ProblemCollector,
    ) -> Result<ModelData, FatalAbort> {
        let cell = self.context.source_cell(source, tag);
        let reader = Arc::clone(&self.engine.reader);
        let transformer = self.engine.transformer.clone();
        let mut recovered: Option<Problem> = None;
        let source_for_compute = source.clone();

        let computed = cell.get_or_compute(|| -> Result<ModelData, String> {
            log::debug!("reading descriptor {}", source_for_compute.location());
            let model = match reader.read(&source_for_compute, true) {
                Ok(model) => model,
                Err(SourceError::Parse {
                    path,
                    line,
                    column,
                    message,
                }) => {
                    let salvaged = reader
                        .read(&source_for_compute, false)
                        .map_err(|e| e.to_string())?;
                    let mut warning = Problem::new(
                        Severity::Warning,
                        format!("Malformed descriptor '{path}' was read leniently: {message}"),
                    );
                    warning.line = line;
                    warning.column = column;
                    warning.source = Some(path);
                    recovered = Some(warning);
                    salvaged
                }
                Err(error) => return Err(error.to_string()),
            };
            let model = match &transformer {
                Some(transform) => {
                    let dir = source_for_compute
                        .path()
                        .parent()
                        .map(PathBuf::from)
                        .unwrap_or_default();
                    transform(&model, &dir)
                }
                None => model,
            };
            Ok(ModelData {
                model: Arc::new(model),
                source: source_for_compute.clone(),
            })
        });

        if let Some(warning) = recovered {
            problems.add(warning);
        }
        match computed {
            Ok(data) => Ok((*data).clone()),
            Err(ContextError::Failed(message)) => {
                problems.add(
                    Problem::new(Severity::Fatal, message)
                        .with_location(&crate::models::InputLocation::from_source(
                            source.location(),
                        )),
                );
                Err(FatalAbort)
            }
            Err(error) => {
                problems.add(Problem::new(Severity::Fatal, error.to_string()));
                Err(FatalAbort)
            }
        }
    }

    /// Fills a partial parent reference (missing group or version) from the
    /// descriptor its relative path points at.
    fn complete_parent_coordinates(&self, model: &mut Model, problems: &mut ProblemCollector) {
        let Some(parent) = &model.parent else {
            return;
        };
        if parent.group_id.is_some() && parent.version.is_some() {
            return;
        }
        let relative = parent.relative_path.clone().unwrap_or_else(|| "..".into());
        let Some(source) = model
            .descriptor_path
            .as_deref()
            .map(ModelSource::from_path)
            .and_then(|s| s.resolve_relative(&relative, self.engine.reader.as_ref()))
        else {
            return;
        };
        let mut scratch = ProblemCollector::new();
        let Ok(data) = self.read_raw(&source, TAG_RAW, &mut scratch) else {
            return;
        };
        let parent_model = data.model;
        if let Some(parent) = &mut model.parent {
            if parent.group_id.is_none() {
                parent.group_id = parent_model.effective_group_id().map(str::to_string);
            }
            if parent.version.is_none() {
                parent.version = parent_model.effective_version().map(str::to_string);
            }
            log::debug!(
                "completed parent reference to {} from {}",
                parent.id(),
                source.location()
            );
        }
        problems.absorb(scratch);
    }

    /// An aggregate project that lists no subprojects gets every immediate
    /// child directory holding a descriptor.
    fn discover_subprojects(&self, model: &mut Model) {
        if model.effective_packaging() != PACKAGING_AGGREGATE || !model.subprojects.is_empty() {
            return;
        }
        let Some(dir) = model.project_dir() else {
            return;
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut found: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter(|e| {
                self.engine
                    .reader
                    .locate_existing_descriptor(&e.path())
                    .is_some()
            })
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        found.sort();
        if !found.is_empty() {
            log::debug!("discovered subprojects for {}: {found:?}", model.id());
            model.subprojects = found;
        }
    }

    /// Normalizes duplicates and applies active profiles. External profiles
    /// participate only at the requested leaf.
    fn activate_file_model(
        &self,
        raw: &Model,
        request: &ResolveRequest,
        include_external: bool,
        problems: &mut ProblemCollector,
    ) -> (Model, Vec<String>) {
        let normalized = normalizer::merge_duplicates(raw, problems);
        let ctx = ActivationContext {
            active_ids: request.active_profile_ids.clone(),
            inactive_ids: request.inactive_profile_ids.clone(),
            user_properties: request.user_properties.clone(),
            system_properties: request.system_properties.clone(),
            project_dir: normalized.project_dir().map(PathBuf::from),
        };
        let mut candidates = normalized.profiles.clone();
        if include_external {
            candidates.extend(request.external_profiles.iter().cloned());
        }
        let active = profiles::select_active(&candidates, &ctx, problems);
        let mut activated = normalized;
        for profile in &active {
            activated = profiles::inject_profile(&activated, profile);
        }
        let ids: Vec<String> = active.into_iter().map(|p| p.id).collect();
        if !ids.is_empty() {
            log::debug!("profiles active for {}: {ids:?}", activated.id());
        }
        (activated, ids)
    }

    // --- PHASE TWO ---

    fn finish_build(
        &self,
        file_model: FileModel,
        request: &ResolveRequest,
        mut problems: ProblemCollector,
    ) -> Result<ResolveResult, ResolveError> {
        match self.build_effective(&file_model, request, &mut problems) {
            Ok(mut result) => {
                result.problems = problems.into_problems();
                if result
                    .problems
                    .iter()
                    .any(|p| p.severity >= Severity::Error)
                {
                    Err(ResolveError::Build {
                        problems: result.problems.clone(),
                        partial: Some(Box::new(result)),
                    })
                } else {
                    Ok(result)
                }
            }
            Err(FatalAbort) => Err(failed(problems, None)),
        }
    }

    fn build_effective(
        &self,
        file_model: &FileModel,
        request: &ResolveRequest,
        problems: &mut ProblemCollector,
    ) -> Result<ResolveResult, FatalAbort> {
        // Lineage, leaf first. Each member is its activated model; the raw
        // form is retained for the result.
        let mut lineage: Vec<Model> = vec![file_model.activated.clone()];
        let mut model_ids: Vec<String> = vec![file_model.raw.id()];
        let mut raw_models: HashMap<String, Arc<Model>> = HashMap::new();
        let mut active_profiles: HashMap<String, Vec<String>> = HashMap::new();
        raw_models.insert(file_model.raw.id(), Arc::clone(&file_model.raw));
        active_profiles.insert(file_model.raw.id(), file_model.active_profiles.clone());

        let mut seen_parents: HashSet<String> = HashSet::new();
        seen_parents.insert(file_model.raw.id());
        let mut current = (*file_model.raw).clone();
        let mut current_source = file_model.source.clone();

        while let Some(parent_ref) = current.parent.clone() {
            if !seen_parents.insert(parent_ref.id()) {
                problems.add(
                    Problem::new(
                        Severity::Fatal,
                        format!("The parents form a cycle: {}", cycle_rendering(&model_ids, &parent_ref)),
                    )
                    .with_model_id(current.id()),
                );
                return Err(FatalAbort);
            }

            let parent_data =
                self.resolve_parent(&current, &current_source, &parent_ref, problems)?;
            let parent_raw = (*parent_data.model).clone();

            if parent_raw.effective_packaging() != PACKAGING_AGGREGATE {
                problems.add(
                    Problem::new(
                        Severity::Error,
                        format!(
                            "Invalid packaging for parent '{}': must be '{PACKAGING_AGGREGATE}' \
                             but is '{}'",
                            parent_ref.id(),
                            parent_raw.effective_packaging()
                        ),
                    )
                    .with_model_id(current.id()),
                );
            }
            if let Err(error) = self
                .context
                .add_project_edge(&current.id(), &parent_raw.id())
            {
                problems.add(
                    Problem::new(Severity::Fatal, error.to_string()).with_model_id(current.id()),
                );
                return Err(FatalAbort);
            }

            let (activated, ids) = self.activate_file_model(&parent_raw, request, false, problems);
            let parent_id = parent_raw.id();
            model_ids.push(parent_id.clone());
            raw_models.insert(parent_id.clone(), Arc::new(parent_raw.clone()));
            active_profiles.insert(parent_id, ids);
            lineage.push(activated);
            current_source = parent_data.source.clone();
            current = parent_raw;
        }

        // Baseline terminator.
        let schema = current
            .schema_version
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string());
        let super_model = self.engine.super_models.super_model(&schema);
        model_ids.push(SUPER_MODEL_ID.to_string());
        raw_models.insert(SUPER_MODEL_ID.to_string(), Arc::new(super_model.clone()));
        active_profiles.insert(SUPER_MODEL_ID.to_string(), Vec::new());
        lineage.push(super_model);

        // Fold ancestors into the leaf.
        let mut assembled = match lineage.pop() {
            Some(root) => root,
            None => Model::default(),
        };
        while let Some(child) = lineage.pop() {
            assembled = inheritance::assemble(&child, &assembled);
        }
        assembled.descriptor_path.clone_from(&file_model.raw.descriptor_path);

        // Interpolation over the assembled model.
        let project_dir = assembled.project_dir().map(PathBuf::from);
        let interpolation = InterpolationContext {
            project_dir: project_dir.as_deref(),
            root_dir: request.workspace_root.as_deref(),
            user_properties: &request.user_properties,
            system_properties: &request.system_properties,
            session_start: self.start,
        };
        let mut effective = interpolator::interpolate_model(&assembled, &interpolation, problems);
        effective = paths::align_model_paths(&effective);
        effective = paths::normalize_model_urls(&effective);
        effective = management::apply_plugin_management(&effective);

        let mut import_stack: Vec<String> = vec![effective.id()];
        self.import_dependency_management(&mut effective, request, &mut import_stack, problems);
        effective = management::apply_dependency_management(&effective);
        effective = normalizer::inject_default_values(&effective);
        if self.engine.process_plugins {
            effective = interpolator::expand_plugin_configuration(
                &effective,
                &interpolation,
                problems,
            );
        }
        validator::validate_effective(&effective, problems);

        Ok(ResolveResult {
            effective,
            model_ids,
            raw_models,
            active_profiles,
            problems: Vec::new(),
        })
    }

    /// Parent resolution: workspace-local first (relative path, GA match,
    /// version or range check), external coordinate lookup as fallback.
    /// An unresolvable parent is FATAL.
    fn resolve_parent(
        &self,
        child: &Model,
        child_source: &ModelSource,
        parent_ref: &Parent,
        problems: &mut ProblemCollector,
    ) -> Result<ModelData, FatalAbort> {
        // A ranged parent reference demands literal child coordinates so the
        // chosen parent cannot drift between builds, no matter where the
        // parent ends up being resolved from.
        if parent_ref.version.as_deref().is_some_and(version::is_range) {
            let inconstant = child.version.as_deref().is_some_and(|v| v.contains("${"))
                || child.group_id.as_deref().is_some_and(|g| g.contains("${"));
            if inconstant {
                problems.add(
                    Problem::new(
                        Severity::Fatal,
                        "Version must be a constant when the parent reference uses a range"
                            .to_string(),
                    )
                    .with_model_id(child.id())
                    .with_location(&child.location()),
                );
                return Err(FatalAbort);
            }
        }

        if let Some(local) = self.resolve_parent_locally(child_source, parent_ref, problems)? {
            return Ok(local);
        }

        let group = parent_ref.group_id.as_deref().unwrap_or("");
        let artifact = parent_ref.artifact_id.as_deref().unwrap_or("");
        let version_ref = parent_ref.version.as_deref().unwrap_or("");

        // Reactor projects away from the relative-path hint are still
        // eligible; the workspace index finds them by coordinates.
        for source in self.context.workspace_sources(group, artifact) {
            let mut scratch = ProblemCollector::new();
            let Ok(data) = self.read_raw(&source, TAG_RAW, &mut scratch) else {
                continue;
            };
            if parent_version_acceptable(&data.model, parent_ref.version.as_deref()) {
                log::debug!(
                    "parent {} resolved through the workspace index at {}",
                    parent_ref.id(),
                    data.source.location()
                );
                return Ok(data);
            }
        }

        let Some(resolver) = &self.engine.resolver else {
            problems.add(
                Problem::new(
                    Severity::Fatal,
                    format!(
                        "Non-resolvable parent '{}': no workspace match and no coordinate \
                         resolver configured",
                        parent_ref.id()
                    ),
                )
                .with_model_id(child.id())
                .with_location(&child.location()),
            );
            return Err(FatalAbort);
        };
        match resolver.resolve(group, artifact, version_ref) {
            Ok(source) => self.read_raw(&source, TAG_RAW, problems),
            Err(error) => {
                problems.add(
                    Problem::new(
                        Severity::Fatal,
                        format!("Non-resolvable parent '{}'", parent_ref.id()),
                    )
                    .with_model_id(child.id())
                    .with_location(&child.location())
                    .with_cause(&error),
                );
                Err(FatalAbort)
            }
        }
    }

    fn resolve_parent_locally(
        &self,
        child_source: &ModelSource,
        parent_ref: &Parent,
        problems: &mut ProblemCollector,
    ) -> Result<Option<ModelData>, FatalAbort> {
        let relative = parent_ref
            .relative_path
            .clone()
            .unwrap_or_else(|| "..".into());
        let Some(candidate) =
            child_source.resolve_relative(&relative, self.engine.reader.as_ref())
        else {
            return Ok(None);
        };
        let data = self.read_raw(&candidate, TAG_RAW, problems)?;
        let model = &data.model;

        let ga_matches = model.effective_group_id() == parent_ref.group_id.as_deref()
            && model.artifact_id.as_deref() == parent_ref.artifact_id.as_deref();
        if !ga_matches {
            return Ok(None);
        }

        if parent_version_acceptable(model, parent_ref.version.as_deref()) {
            Ok(Some(data.clone()))
        } else {
            log::debug!(
                "workspace parent {} at {} does not satisfy '{}'; trying elsewhere",
                model.id(),
                data.source.location(),
                parent_ref.version.as_deref().unwrap_or("")
            );
            Ok(None)
        }
    }

    // --- MANAGEMENT IMPORTS ---

    /// Replaces `kind = "aggregate", scope = "import"` management entries
    /// with the referenced project's effective dependency management.
    /// Earlier entries win over later imports; import cycles are reported
    /// once and skipped.
    fn import_dependency_management(
        &self,
        model: &mut Model,
        request: &ResolveRequest,
        import_stack: &mut Vec<String>,
        problems: &mut ProblemCollector,
    ) {
        let Some(mgmt) = &model.dependency_management else {
            return;
        };
        let (imports, mut kept): (Vec<_>, Vec<_>) = mgmt
            .dependencies
            .iter()
            .cloned()
            .partition(|d| {
                d.kind.as_deref() == Some(PACKAGING_AGGREGATE)
                    && d.scope.as_deref() == Some(SCOPE_IMPORT)
            });
        if imports.is_empty() {
            return;
        }

        for import in imports {
            let coordinate = import.coordinate_id();
            if import_stack.contains(&coordinate) {
                problems.add(
                    Problem::new(
                        Severity::Error,
                        format!(
                            "Import cycle detected: {} -> {coordinate}",
                            import_stack.join(" -> ")
                        ),
                    )
                    .with_model_id(model.id()),
                );
                continue;
            }
            import_stack.push(coordinate.clone());
            let imported =
                self.load_imported_management(model, &import, request, import_stack, problems);
            import_stack.pop();

            let Some(imported) = imported else {
                continue;
            };
            let filtered = management::filter_imported(&imported, &import.exclusions);
            for dep in filtered {
                let key = dep.management_key();
                if !kept.iter().any(|k| k.management_key() == key) {
                    kept.push(dep);
                }
            }
        }
        model.dependency_management = Some(crate::models::DependencyManagement {
            dependencies: kept,
        });
    }

    fn load_imported_management(
        &self,
        importer: &Model,
        import: &crate::models::Dependency,
        request: &ResolveRequest,
        import_stack: &mut Vec<String>,
        problems: &mut ProblemCollector,
    ) -> Option<Vec<crate::models::Dependency>> {
        let group = import.group_id.as_deref().unwrap_or("");
        let artifact = import.artifact_id.as_deref().unwrap_or("");
        let Some(version) = import.version.as_deref() else {
            problems.add(
                Problem::new(
                    Severity::Error,
                    format!(
                        "Missing version for imported management '{}'",
                        import.management_key()
                    ),
                )
                .with_model_id(importer.id()),
            );
            return None;
        };

        if let Err(error) = self
            .context
            .add_project_edge(&importer.id(), &import.coordinate_id())
        {
            problems.add(
                Problem::new(Severity::Error, error.to_string()).with_model_id(importer.id()),
            );
            return None;
        }

        // Workspace projects take precedence over external lookup; leaning
        // on a reactor-internal import is legal but fragile, so it warns.
        let workspace = self.context.workspace_sources(group, artifact);
        let source = if let Some(source) = workspace.first() {
            problems.add(
                Problem::new(
                    Severity::Warning,
                    format!(
                        "Management import '{group}:{artifact}:{version}' resolved against a \
                         workspace project"
                    ),
                )
                .with_model_id(importer.id()),
            );
            source.clone()
        } else {
            let Some(resolver) = &self.engine.resolver else {
                problems.add(
                    Problem::new(
                        Severity::Error,
                        format!(
                            "Non-resolvable management import '{group}:{artifact}:{version}': \
                             no coordinate resolver configured"
                        ),
                    )
                    .with_model_id(importer.id()),
                );
                return None;
            };
            match resolver.resolve(group, artifact, version) {
                Ok(source) => source,
                Err(error) => {
                    problems.add(
                        Problem::new(
                            Severity::Error,
                            format!(
                                "Non-resolvable management import \
                                 '{group}:{artifact}:{version}'"
                            ),
                        )
                        .with_model_id(importer.id())
                        .with_cause(&error),
                    );
                    return None;
                }
            }
        };

        let cell =
            self.context
                .coordinate_cell(group, artifact, version, TAG_IMPORT);
        let mut nested_problems = ProblemCollector::new();
        let computed = cell.get_or_compute(|| -> Result<ModelData, String> {
            let model = self
                .build_management_model(&source, request, import_stack, &mut nested_problems)
                .ok_or_else(|| {
                    format!("failed to build imported model {group}:{artifact}:{version}")
                })?;
            Ok(ModelData {
                model: Arc::new(model),
                source: source.clone(),
            })
        });
        problems.absorb(nested_problems);

        match computed {
            Ok(data) => Some(
                data.model
                    .dependency_management
                    .as_ref()
                    .map(|m| m.dependencies.clone())
                    .unwrap_or_default(),
            ),
            Err(error) => {
                problems.add(
                    Problem::new(Severity::Error, error.to_string())
                        .with_model_id(importer.id()),
                );
                None
            }
        }
    }

    /// Management-only nested build: lineage, assembly and interpolation of
    /// the imported project, including its own imports, without the leaf
    /// post-processing stages.
    fn build_management_model(
        &self,
        source: &ModelSource,
        request: &ResolveRequest,
        import_stack: &mut Vec<String>,
        problems: &mut ProblemCollector,
    ) -> Option<Model> {
        let data = self.read_raw(source, TAG_RAW, problems).ok()?;
        let mut lineage: Vec<Model> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut current = (*data.model).clone();
        let mut current_source = data.source.clone();
        seen.insert(current.id());
        lineage.push(self.activate_file_model(&current, request, false, problems).0);

        while let Some(parent_ref) = current.parent.clone() {
            if !seen.insert(parent_ref.id()) {
                problems.add(Problem::new(
                    Severity::Error,
                    format!("The parents of imported model '{}' form a cycle", data.model.id()),
                ));
                return None;
            }
            let parent_data = self
                .resolve_parent(&current, &current_source, &parent_ref, problems)
                .ok()?;
            let parent_raw = (*parent_data.model).clone();
            lineage.push(self.activate_file_model(&parent_raw, request, false, problems).0);
            current_source = parent_data.source.clone();
            current = parent_raw;
        }
        let schema = current
            .schema_version
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string());
        lineage.push(self.engine.super_models.super_model(&schema));

        let mut assembled = lineage.pop()?;
        while let Some(child) = lineage.pop() {
            assembled = inheritance::assemble(&child, &assembled);
        }
        assembled.descriptor_path.clone_from(&data.model.descriptor_path);

        let project_dir = assembled.project_dir().map(PathBuf::from);
        let interpolation = InterpolationContext {
            project_dir: project_dir.as_deref(),
            root_dir: request.workspace_root.as_deref(),
            user_properties: &request.user_properties,
            system_properties: &request.system_properties,
            session_start: self.start,
        };
        let mut effective = interpolator::interpolate_model(&assembled, &interpolation, problems);
        self.import_dependency_management(&mut effective, request, import_stack, problems);
        Some(effective)
    }

    // --- WORKSPACE DISCOVERY ---

    /// The requested descriptor plus every descriptor reachable through
    /// subproject aggregation, depth first. Revisiting a directory is an
    /// aggregation cycle (ERROR) and stops that branch.
    fn collect_workspace_sources(
        &self,
        request: &ResolveRequest,
        problems: &mut ProblemCollector,
    ) -> Vec<ModelSource> {
        let mut ordered: Vec<ModelSource> = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut stack: Vec<ModelSource> = vec![request.source.clone()];

        while let Some(source) = stack.pop() {
            if !visited.insert(source.path().to_path_buf()) {
                problems.add(Problem::new(
                    Severity::Error,
                    format!(
                        "Aggregation cycle: '{}' is listed as a subproject more than once",
                        source.location()
                    ),
                ));
                continue;
            }
            let mut scratch = ProblemCollector::new();
            let Ok(data) = self.read_raw(&source, TAG_RAW, &mut scratch) else {
                problems.absorb(scratch);
                ordered.push(source);
                continue;
            };
            ordered.push(source.clone());

            let mut model = (*data.model).clone();
            self.discover_subprojects(&mut model);
            // Reverse keeps depth-first traversal in declaration order.
            for sub in model.subprojects.iter().rev() {
                if let Some(child) =
                    source.resolve_relative(sub, self.engine.reader.as_ref())
                {
                    stack.push(child);
                } else {
                    problems.add(
                        Problem::new(
                            Severity::Error,
                            format!("Missing subproject descriptor for '{sub}'"),
                        )
                        .with_model_id(model.id()),
                    );
                }
            }
        }
        ordered
    }
}

/// Whether a candidate parent model satisfies the reference's version,
/// treating brackets as a range and anything else as an exact match.
fn parent_version_acceptable(model: &Model, version_ref: Option<&str>) -> bool {
    let Some(version_ref) = version_ref else {
        return true;
    };
    let actual = model.effective_version().unwrap_or("");
    if version::is_range(version_ref) {
        VersionRange::parse(version_ref)
            .ok()
            .zip(Version::parse(actual).ok())
            .is_some_and(|(range, version)| range.contains(&version))
    } else {
        actual == version_ref
    }
}

fn failed(problems: ProblemCollector, partial: Option<Box<ResolveResult>>) -> ResolveError {
    ResolveError::Build {
        problems: problems.into_problems(),
        partial,
    }
}

fn override_model_properties(model: &mut Model, user_properties: &Properties) {
    for (key, value) in user_properties.iter() {
        if model.properties.contains_key(key) {
            model.properties.insert(key, value);
        }
    }
}

fn cycle_rendering(model_ids: &[String], closing: &Parent) -> String {
    let mut chain: Vec<&str> = model_ids.iter().map(String::as_str).collect();
    let closing_id = closing.id();
    chain.push(&closing_id);
    chain.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DESCRIPTOR_FILENAME;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn write_descriptor(dir: &Path, text: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(DESCRIPTOR_FILENAME);
        std::fs::write(&path, text).unwrap();
        path
    }

    /// An aggregate parent at the workspace root with one child that leans
    /// on inherited identity, properties and managed versions.
    fn parent_child_fixture() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        write_descriptor(
            dir.path(),
            r#"
group_id = "org.acme"
artifact_id = "parent"
version = "1.0"
packaging = "aggregate"
subprojects = ["child"]

[properties]
"lib.version" = "1.4"

[[dependency_management.dependencies]]
group_id = "org.acme"
artifact_id = "core"
version = "${lib.version}"
"#,
        );
        let child = write_descriptor(
            &dir.path().join("child"),
            r#"
artifact_id = "child"

[parent]
group_id = "org.acme"
artifact_id = "parent"
version = "1.0"

[[dependencies]]
group_id = "org.acme"
artifact_id = "core"
"#,
        );
        (dir, child)
    }

    #[test]
    fn end_to_end_inheritance_interpolation_and_management() {
        init_logging();
        let (_dir, child) = parent_child_fixture();
        let engine = Engine::new();
        let session = engine.new_session();
        let request = ResolveRequest::new(ModelSource::from_path(&child));

        let result = session.build(&request).unwrap();
        let effective = &result.effective;
        assert_eq!(effective.group_id.as_deref(), Some("org.acme"));
        assert_eq!(effective.artifact_id.as_deref(), Some("child"));
        assert_eq!(effective.version.as_deref(), Some("1.0"));

        // Managed version flows through interpolation into the declaration.
        let dep = &effective.dependencies[0];
        assert_eq!(dep.version.as_deref(), Some("1.4"));
        assert_eq!(dep.scope.as_deref(), Some(crate::constants::DEFAULT_SCOPE));

        // Baseline build layout, aligned to the child directory.
        let build = effective.build.as_ref().unwrap();
        let dir = build.directory.as_deref().unwrap();
        assert!(Path::new(dir).is_absolute());
        assert!(dir.ends_with("build"));

        // Leaf first, baseline last under the empty id.
        assert_eq!(
            result.model_ids,
            vec![
                "org.acme:child:1.0".to_string(),
                "org.acme:parent:1.0".to_string(),
                String::new()
            ]
        );
        assert!(result.raw_models.contains_key("org.acme:child:1.0"));
    }

    #[test]
    fn resolution_is_deterministic_across_sessions() {
        let (_dir, child) = parent_child_fixture();
        let engine = Engine::new();
        let request = ResolveRequest::new(ModelSource::from_path(&child));

        let first = engine.new_session().build(&request).unwrap();
        let second = engine.new_session().build(&request).unwrap();
        assert_eq!(first.effective, second.effective);
        assert_eq!(first.model_ids, second.model_ids);
    }

    #[test]
    fn effective_model_interpolation_is_idempotent() {
        let (_dir, child) = parent_child_fixture();
        let engine = Engine::new();
        let session = engine.new_session();
        let request = ResolveRequest::new(ModelSource::from_path(&child));
        let result = session.build(&request).unwrap();

        let project_dir = result.effective.project_dir().map(PathBuf::from);
        let ctx = InterpolationContext {
            project_dir: project_dir.as_deref(),
            root_dir: None,
            user_properties: &request.user_properties,
            system_properties: &request.system_properties,
            session_start: Utc::now(),
        };
        let mut problems = ProblemCollector::new();
        let again = crate::core::interpolator::interpolate_model(
            &result.effective,
            &ctx,
            &mut problems,
        );
        assert_eq!(again, result.effective);
    }

    #[test]
    fn parent_cycle_is_fatal() {
        let dir = TempDir::new().unwrap();
        write_descriptor(
            &dir.path().join("a"),
            r#"
group_id = "org.acme"
artifact_id = "a"
version = "1.0"
packaging = "aggregate"

[parent]
group_id = "org.acme"
artifact_id = "b"
version = "1.0"
relative_path = "../b"
"#,
        );
        let a = dir.path().join("a").join(DESCRIPTOR_FILENAME);
        write_descriptor(
            &dir.path().join("b"),
            r#"
group_id = "org.acme"
artifact_id = "b"
version = "1.0"
packaging = "aggregate"

[parent]
group_id = "org.acme"
artifact_id = "a"
version = "1.0"
relative_path = "../a"
"#,
        );

        let engine = Engine::new();
        let session = engine.new_session();
        let err = session
            .build(&ResolveRequest::new(ModelSource::from_path(&a)))
            .unwrap_err();
        assert!(err
            .problems()
            .iter()
            .any(|p| p.severity == Severity::Fatal && p.message.contains("cycle")));
    }

    #[test]
    fn import_cycle_reports_one_error_and_keeps_partial_management() {
        let dir = TempDir::new().unwrap();
        write_descriptor(
            &dir.path().join("bom-a"),
            r#"
group_id = "org.acme"
artifact_id = "bom-a"
version = "1.0"
packaging = "aggregate"

[[dependency_management.dependencies]]
group_id = "org.acme"
artifact_id = "core"
version = "1.0"

[[dependency_management.dependencies]]
group_id = "org.acme"
artifact_id = "bom-b"
version = "1.0"
kind = "aggregate"
scope = "import"
"#,
        );
        write_descriptor(
            &dir.path().join("bom-b"),
            r#"
group_id = "org.acme"
artifact_id = "bom-b"
version = "1.0"
packaging = "aggregate"

[[dependency_management.dependencies]]
group_id = "org.acme"
artifact_id = "io"
version = "2.0"

[[dependency_management.dependencies]]
group_id = "org.acme"
artifact_id = "bom-a"
version = "1.0"
kind = "aggregate"
scope = "import"
"#,
        );
        let app = write_descriptor(
            &dir.path().join("app"),
            r#"
group_id = "org.acme"
artifact_id = "app"
version = "1.0"

[[dependency_management.dependencies]]
group_id = "org.acme"
artifact_id = "bom-a"
version = "1.0"
kind = "aggregate"
scope = "import"
"#,
        );

        let engine = Engine::new();
        let session = engine.new_session();
        let request =
            ResolveRequest::new(ModelSource::from_path(&app)).with_workspace_root(dir.path());
        let err = session.build(&request).unwrap_err();

        let ResolveError::Build { problems, partial } = err;
        let cycle_errors: Vec<_> = problems
            .iter()
            .filter(|p| p.severity == Severity::Error && p.message.contains("Import cycle"))
            .collect();
        assert_eq!(cycle_errors.len(), 1);

        // Everything reachable before the cycle closed is still there.
        let partial = partial.unwrap();
        let managed = &partial.effective.dependency_management.as_ref().unwrap().dependencies;
        let keys: Vec<String> = managed.iter().map(|d| d.management_key()).collect();
        assert!(keys.contains(&"org.acme:core:lib".to_string()));
        assert!(keys.contains(&"org.acme:io:lib".to_string()));
    }

    #[test]
    fn two_phase_build_matches_single_phase_without_transformer() {
        let (_dir, child) = parent_child_fixture();
        let engine = Engine::new();
        let request = ResolveRequest::new(ModelSource::from_path(&child));

        let single = engine.new_session().build(&request).unwrap();

        let session = engine.new_session();
        let file_model = session.read_file_model(&request).unwrap();
        let two_phase = session.build_from_file_model(&file_model, &request).unwrap();

        assert_eq!(single.effective, two_phase.effective);
        assert_eq!(single.model_ids, two_phase.model_ids);
        assert_eq!(single.active_profiles, two_phase.active_profiles);
        assert_eq!(single.problems, two_phase.problems);
    }

    #[test]
    fn two_phase_build_keeps_early_warnings() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let path = write_descriptor(
            dir.path(),
            r#"
group_id = "org.acme"
artifact_id = "dup"
version = "1.0"

[[dependencies]]
group_id = "org.acme"
artifact_id = "core"
version = "1.0"

[[dependencies]]
group_id = "org.acme"
artifact_id = "core"
version = "1.1"
"#,
        );

        let engine = Engine::new();
        let request = ResolveRequest::new(ModelSource::from_path(&path));
        let single = engine.new_session().build(&request).unwrap();

        let session = engine.new_session();
        let file_model = session.read_file_model(&request).unwrap();
        let two_phase = session.build_from_file_model(&file_model, &request).unwrap();

        let warnings = |result: &ResolveResult| {
            result
                .problems
                .iter()
                .filter(|p| p.severity == Severity::Warning)
                .count()
        };
        assert!(warnings(&single) >= 1);
        assert_eq!(warnings(&single), warnings(&two_phase));
    }

    #[test]
    fn ranged_parent_demands_constant_child_coordinates() {
        let dir = TempDir::new().unwrap();
        let path = write_descriptor(
            dir.path(),
            r#"
group_id = "org.acme"
artifact_id = "drifter"
version = "${rev}"

[properties]
rev = "1.0"

[parent]
group_id = "org.acme"
artifact_id = "platform"
version = "[1.0,2.0)"
"#,
        );

        let engine = Engine::new();
        let session = engine.new_session();
        let err = session
            .build(&ResolveRequest::new(ModelSource::from_path(&path)))
            .unwrap_err();
        assert!(err.problems().iter().any(|p| {
            p.severity == Severity::Fatal && p.message.contains("must be a constant")
        }));
    }

    #[test]
    fn parent_is_found_through_the_workspace_index() {
        init_logging();
        let dir = TempDir::new().unwrap();
        // The parent does not sit at the default "../" hint.
        write_descriptor(
            &dir.path().join("libs").join("platform"),
            r#"
group_id = "org.acme"
artifact_id = "platform"
version = "1.0"
packaging = "aggregate"
"#,
        );
        let child = write_descriptor(
            &dir.path().join("apps").join("web"),
            r#"
artifact_id = "web"

[parent]
group_id = "org.acme"
artifact_id = "platform"
version = "1.0"
"#,
        );

        let engine = Engine::new();
        let session = engine.new_session();
        let request =
            ResolveRequest::new(ModelSource::from_path(&child)).with_workspace_root(dir.path());
        let result = session.build(&request).unwrap();
        assert_eq!(result.effective.group_id.as_deref(), Some("org.acme"));
        assert_eq!(result.effective.version.as_deref(), Some("1.0"));
        assert!(result.model_ids.contains(&"org.acme:platform:1.0".to_string()));
    }

    struct CountingReader {
        inner: TomlDescriptorReader,
        counts: Mutex<HashMap<PathBuf, usize>>,
    }

    impl DescriptorReader for CountingReader {
        fn read(&self, source: &ModelSource, strict: bool) -> Result<Model, SourceError> {
            *self
                .counts
                .lock()
                .unwrap()
                .entry(source.path().to_path_buf())
                .or_insert(0) += 1;
            self.inner.read(source, strict)
        }

        fn locate_existing_descriptor(&self, dir: &Path) -> Option<PathBuf> {
            self.inner.locate_existing_descriptor(dir)
        }
    }

    #[test]
    fn concurrent_builds_read_each_descriptor_once() {
        let (_dir, child) = parent_child_fixture();
        let reader = Arc::new(CountingReader {
            inner: TomlDescriptorReader,
            counts: Mutex::new(HashMap::new()),
        });
        let engine = Engine::new().with_reader(Arc::clone(&reader) as Arc<dyn DescriptorReader>);
        let session = engine.new_session();
        let request = ResolveRequest::new(ModelSource::from_path(&child));

        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for _ in 0..2 {
                let session = &session;
                let request = request.clone();
                handles.push(scope.spawn(move || session.build(&request).unwrap()));
            }
            let results: Vec<ResolveResult> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results[0].effective, results[1].effective);
        });

        for (path, count) in reader.counts.lock().unwrap().iter() {
            assert_eq!(*count, 1, "descriptor {} read {count} times", path.display());
        }
    }

    #[test]
    fn workspace_build_discovers_and_resolves_subprojects() {
        let dir = TempDir::new().unwrap();
        // Aggregate root without an explicit subproject list.
        let root = write_descriptor(
            dir.path(),
            r#"
group_id = "org.acme"
artifact_id = "parent"
version = "1.0"
packaging = "aggregate"
"#,
        );
        for name in ["alpha", "beta"] {
            write_descriptor(
                &dir.path().join(name),
                &format!(
                    r#"
artifact_id = "{name}"

[parent]
group_id = "org.acme"
artifact_id = "parent"
version = "1.0"
"#
                ),
            );
        }

        let engine = Engine::new();
        let session = engine.new_session();
        let request = ResolveRequest::new(ModelSource::from_path(&root));
        let results = session.build_workspace(&request);

        assert_eq!(results.len(), 3);
        let ids: Vec<String> = results
            .iter()
            .map(|(_, r)| r.as_ref().unwrap().effective.id())
            .collect();
        assert!(ids.contains(&"org.acme:parent:1.0".to_string()));
        assert!(ids.contains(&"org.acme:alpha:1.0".to_string()));
        assert!(ids.contains(&"org.acme:beta:1.0".to_string()));
    }

    #[test]
    fn profile_activation_flows_into_the_result() {
        let dir = TempDir::new().unwrap();
        let path = write_descriptor(
            dir.path(),
            r#"
group_id = "org.acme"
artifact_id = "widget"
version = "1.0"

[[profiles]]
id = "ci"

[profiles.activation.property]
name = "ci"

[profiles.properties]
mode = "strict"
"#,
        );

        let engine = Engine::new();
        let session = engine.new_session();
        let mut request = ResolveRequest::new(ModelSource::from_path(&path));
        request.user_properties.insert("ci", "true");

        let result = session.build(&request).unwrap();
        assert_eq!(result.effective.properties.get("mode"), Some("strict"));
        assert_eq!(
            result.active_profiles.get("org.acme:widget:1.0").unwrap(),
            &vec!["ci".to_string()]
        );
    }

    #[test]
    fn unresolvable_parent_without_resolver_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = write_descriptor(
            dir.path(),
            r#"
artifact_id = "orphan"

[parent]
group_id = "org.acme"
artifact_id = "nowhere"
version = "1.0"
"#,
        );

        let engine = Engine::new();
        let session = engine.new_session();
        let err = session
            .build(&ResolveRequest::new(ModelSource::from_path(&path)))
            .unwrap_err();
        assert!(err
            .problems()
            .iter()
            .any(|p| p.severity == Severity::Fatal && p.message.contains("Non-resolvable parent")));
    }
}
