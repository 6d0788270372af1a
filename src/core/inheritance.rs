// src/core/inheritance.rs

use crate::models::{
    Build, Dependency, DependencyManagement, Model, Plugin, PluginExecution, PluginManagement,
    Reporting,
};

/// Folds a parent model into a child, child side dominant. Identity fields
/// (artifact id, packaging, name) and subprojects are never inherited;
/// keyed collections take the parent's entries first so declaration order
/// stays stable down the lineage.
pub fn assemble(child: &Model, parent: &Model) -> Model {
    let mut out = child.clone();

    let inherit = |own: &Option<String>, inherited: &Option<String>| -> Option<String> {
        own.clone().or_else(|| inherited.clone())
    };
    out.schema_version = inherit(&child.schema_version, &parent.schema_version);
    out.group_id = inherit(&child.group_id, &parent.group_id);
    out.version = inherit(&child.version, &parent.version);
    out.url = child.url.clone().or_else(|| inherited_url(child, parent));

    let mut properties = parent.properties.clone();
    properties.merge_override(&child.properties);
    out.properties = properties;

    out.dependencies = merge_dependency_lists(&child.dependencies, &parent.dependencies);
    out.dependency_management = merge_dependency_management(
        child.dependency_management.as_ref(),
        parent.dependency_management.as_ref(),
    );
    out.build = merge_build(child.build.as_ref(), parent.build.as_ref());
    out.reporting = merge_reporting(child.reporting.as_ref(), parent.reporting.as_ref());
    out
}

/// A child without its own URL gets the parent's with its artifact id
/// appended, so sibling projects publish to distinct locations.
fn inherited_url(child: &Model, parent: &Model) -> Option<String> {
    let base = parent.url.as_deref()?;
    match &child.artifact_id {
        Some(artifact_id) => Some(format!(
            "{}/{artifact_id}",
            base.trim_end_matches('/')
        )),
        None => Some(base.to_string()),
    }
}

// --- SHARED MERGE PRIMITIVES ---
// Used both for lineage assembly (child dominant over parent) and profile
// injection (profile dominant over model).

/// Field-wise merge of two declarations of the same dependency.
pub(crate) fn merge_dependency(dominant: &Dependency, recessive: &Dependency) -> Dependency {
    let pick = |a: &Option<String>, b: &Option<String>| a.clone().or_else(|| b.clone());
    Dependency {
        group_id: pick(&dominant.group_id, &recessive.group_id),
        artifact_id: pick(&dominant.artifact_id, &recessive.artifact_id),
        version: pick(&dominant.version, &recessive.version),
        kind: pick(&dominant.kind, &recessive.kind),
        classifier: pick(&dominant.classifier, &recessive.classifier),
        scope: pick(&dominant.scope, &recessive.scope),
        optional: dominant.optional.or(recessive.optional),
        exclusions: if dominant.exclusions.is_empty() {
            recessive.exclusions.clone()
        } else {
            dominant.exclusions.clone()
        },
    }
}

/// Keyed union: recessive entries first (merged with any dominant match),
/// then dominant-only entries in their own order.
pub(crate) fn merge_dependency_lists(
    dominant: &[Dependency],
    recessive: &[Dependency],
) -> Vec<Dependency> {
    let mut merged: Vec<Dependency> = recessive
        .iter()
        .map(|r| {
            match dominant
                .iter()
                .find(|d| d.management_key() == r.management_key())
            {
                Some(d) => merge_dependency(d, r),
                None => r.clone(),
            }
        })
        .collect();
    for d in dominant {
        if !recessive
            .iter()
            .any(|r| r.management_key() == d.management_key())
        {
            merged.push(d.clone());
        }
    }
    merged
}

pub(crate) fn merge_dependency_management(
    dominant: Option<&DependencyManagement>,
    recessive: Option<&DependencyManagement>,
) -> Option<DependencyManagement> {
    match (dominant, recessive) {
        (None, None) => None,
        (Some(d), None) => Some(d.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(d), Some(r)) => Some(DependencyManagement {
            dependencies: merge_dependency_lists(&d.dependencies, &r.dependencies),
        }),
    }
}

pub(crate) fn merge_plugin(dominant: &Plugin, recessive: &Plugin) -> Plugin {
    let mut configuration = recessive.configuration.clone();
    configuration.merge_override(&dominant.configuration);
    Plugin {
        group_id: dominant.group_id.clone().or_else(|| recessive.group_id.clone()),
        artifact_id: dominant
            .artifact_id
            .clone()
            .or_else(|| recessive.artifact_id.clone()),
        version: dominant.version.clone().or_else(|| recessive.version.clone()),
        configuration,
        executions: merge_executions(&dominant.executions, &recessive.executions),
    }
}

fn merge_executions(
    dominant: &[PluginExecution],
    recessive: &[PluginExecution],
) -> Vec<PluginExecution> {
    let mut merged: Vec<PluginExecution> = recessive
        .iter()
        .map(|r| {
            match dominant.iter().find(|d| d.merge_key() == r.merge_key()) {
                Some(d) => {
                    let mut configuration = r.configuration.clone();
                    configuration.merge_override(&d.configuration);
                    PluginExecution {
                        id: d.id.clone().or_else(|| r.id.clone()),
                        phase: d.phase.clone().or_else(|| r.phase.clone()),
                        goals: if d.goals.is_empty() {
                            r.goals.clone()
                        } else {
                            d.goals.clone()
                        },
                        configuration,
                    }
                }
                None => r.clone(),
            }
        })
        .collect();
    for d in dominant {
        if !recessive.iter().any(|r| r.merge_key() == d.merge_key()) {
            merged.push(d.clone());
        }
    }
    merged
}

/// How two plugin lists are combined; lineage and profile injection want
/// different placements for unmatched dominant entries.
pub(crate) type PluginListMerge = fn(&[Plugin], &[Plugin]) -> Vec<Plugin>;

pub(crate) fn merge_plugin_lists(dominant: &[Plugin], recessive: &[Plugin]) -> Vec<Plugin> {
    let mut merged: Vec<Plugin> = recessive
        .iter()
        .map(|r| match dominant.iter().find(|d| d.key() == r.key()) {
            Some(d) => merge_plugin(d, r),
            None => r.clone(),
        })
        .collect();
    for d in dominant {
        if !recessive.iter().any(|r| r.key() == d.key()) {
            merged.push(d.clone());
        }
    }
    merged
}

/// Positional variant used by profile injection. A dominant plugin with a
/// matching recessive entry is merged in place; the unmatched dominant
/// plugins preceding it are inserted right before that entry, keeping
/// their own relative order. Trailing unmatched plugins go last.
pub(crate) fn merge_plugin_lists_interleaved(
    dominant: &[Plugin],
    recessive: &[Plugin],
) -> Vec<Plugin> {
    let mut master: Vec<(String, Plugin)> =
        recessive.iter().map(|p| (p.key(), p.clone())).collect();
    let mut predecessors: Vec<(String, Vec<Plugin>)> = Vec::new();
    let mut pending: Vec<Plugin> = Vec::new();

    for element in dominant {
        let key = element.key();
        if let Some((_, existing)) = master.iter_mut().find(|(k, _)| *k == key) {
            *existing = merge_plugin(element, existing);
            if !pending.is_empty() {
                match predecessors.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, bucket)) => bucket.append(&mut pending),
                    None => predecessors.push((key, std::mem::take(&mut pending))),
                }
            }
        } else {
            pending.push(element.clone());
        }
    }

    let mut merged: Vec<Plugin> = Vec::new();
    for (key, plugin) in master {
        if let Some(index) = predecessors.iter().position(|(k, _)| *k == key) {
            let (_, pre) = predecessors.remove(index);
            merged.extend(pre);
        }
        merged.push(plugin);
    }
    merged.extend(pending);
    merged
}

pub(crate) fn merge_build(dominant: Option<&Build>, recessive: Option<&Build>) -> Option<Build> {
    merge_build_with(dominant, recessive, merge_plugin_lists)
}

pub(crate) fn merge_build_with(
    dominant: Option<&Build>,
    recessive: Option<&Build>,
    plugin_merge: PluginListMerge,
) -> Option<Build> {
    match (dominant, recessive) {
        (None, None) => None,
        (Some(d), None) => Some(d.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(d), Some(r)) => {
            let pick = |a: &Option<String>, b: &Option<String>| a.clone().or_else(|| b.clone());
            Some(Build {
                directory: pick(&d.directory, &r.directory),
                source_directory: pick(&d.source_directory, &r.source_directory),
                output_directory: pick(&d.output_directory, &r.output_directory),
                final_name: pick(&d.final_name, &r.final_name),
                // Resources replace wholesale; mixing parent and child
                // resource sets produces double-copies.
                resources: if d.resources.is_empty() {
                    r.resources.clone()
                } else {
                    d.resources.clone()
                },
                plugins: plugin_merge(&d.plugins, &r.plugins),
                plugin_management: merge_plugin_management_with(
                    d.plugin_management.as_ref(),
                    r.plugin_management.as_ref(),
                    plugin_merge,
                ),
            })
        }
    }
}

fn merge_plugin_management_with(
    dominant: Option<&PluginManagement>,
    recessive: Option<&PluginManagement>,
    plugin_merge: PluginListMerge,
) -> Option<PluginManagement> {
    match (dominant, recessive) {
        (None, None) => None,
        (Some(d), None) => Some(d.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(d), Some(r)) => Some(PluginManagement {
            plugins: plugin_merge(&d.plugins, &r.plugins),
        }),
    }
}

pub(crate) fn merge_reporting(
    dominant: Option<&Reporting>,
    recessive: Option<&Reporting>,
) -> Option<Reporting> {
    merge_reporting_with(dominant, recessive, merge_plugin_lists)
}

pub(crate) fn merge_reporting_with(
    dominant: Option<&Reporting>,
    recessive: Option<&Reporting>,
    plugin_merge: PluginListMerge,
) -> Option<Reporting> {
    match (dominant, recessive) {
        (None, None) => None,
        (Some(d), None) => Some(d.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(d), Some(r)) => Some(Reporting {
            output_directory: d
                .output_directory
                .clone()
                .or_else(|| r.output_directory.clone()),
            plugins: plugin_merge(&d.plugins, &r.plugins),
        }),
    }
}
