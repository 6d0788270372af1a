// src/core/management.rs

use crate::core::inheritance;
use crate::models::{Dependency, Exclusion, Model};

/// Fills managed defaults into the model's declared dependencies. A field
/// the declaration sets explicitly is never overwritten; management only
/// supplies what is missing.
pub fn apply_dependency_management(model: &Model) -> Model {
    let Some(management) = &model.dependency_management else {
        return model.clone();
    };
    let mut out = model.clone();
    for dep in &mut out.dependencies {
        let key = dep.management_key();
        if let Some(managed) = management
            .dependencies
            .iter()
            .find(|m| m.management_key() == key)
        {
            apply_managed_dependency(dep, managed);
        }
    }
    out
}

fn apply_managed_dependency(dep: &mut Dependency, managed: &Dependency) {
    if dep.version.is_none() {
        dep.version.clone_from(&managed.version);
    }
    if dep.scope.is_none() {
        dep.scope.clone_from(&managed.scope);
    }
    if dep.optional.is_none() {
        dep.optional = managed.optional;
    }
    if dep.exclusions.is_empty() {
        dep.exclusions.clone_from(&managed.exclusions);
    }
}

/// Fills managed plugin defaults (version, configuration, executions) into
/// the build's plugin list, declared side dominant.
pub fn apply_plugin_management(model: &Model) -> Model {
    let mut out = model.clone();
    let Some(build) = &mut out.build else {
        return out;
    };
    let Some(management) = &build.plugin_management else {
        return out;
    };
    let managed_plugins = management.plugins.clone();
    for plugin in &mut build.plugins {
        if let Some(managed) = managed_plugins.iter().find(|m| m.key() == plugin.key()) {
            *plugin = inheritance::merge_plugin(plugin, managed);
        }
    }
    out
}

/// Whether an exclusion matches a coordinate. `*` matches any group or
/// artifact.
pub fn exclusion_matches(exclusion: &Exclusion, group_id: &str, artifact_id: &str) -> bool {
    let part = |pattern: &str, actual: &str| pattern == "*" || pattern == actual;
    part(&exclusion.group_id, group_id) && part(&exclusion.artifact_id, artifact_id)
}

/// Drops imported management entries matching any of the importing
/// declaration's exclusions.
pub fn filter_imported(deps: &[Dependency], exclusions: &[Exclusion]) -> Vec<Dependency> {
    deps.iter()
        .filter(|dep| {
            let group = dep.group_id.as_deref().unwrap_or("");
            let artifact = dep.artifact_id.as_deref().unwrap_or("");
            !exclusions
                .iter()
                .any(|e| exclusion_matches(e, group, artifact))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Build, DependencyManagement, Plugin, PluginManagement};

    fn managed(group: &str, artifact: &str, version: &str, scope: Option<&str>) -> Dependency {
        Dependency {
            group_id: Some(group.into()),
            artifact_id: Some(artifact.into()),
            version: Some(version.into()),
            scope: scope.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn management_fills_missing_fields_only() {
        let model = Model {
            dependencies: vec![Dependency {
                group_id: Some("org.acme".into()),
                artifact_id: Some("core".into()),
                version: Some("9.9".into()),
                ..Default::default()
            }],
            dependency_management: Some(DependencyManagement {
                dependencies: vec![managed("org.acme", "core", "1.0", Some("test"))],
            }),
            ..Default::default()
        };

        let injected = apply_dependency_management(&model);
        let dep = &injected.dependencies[0];
        // Explicit version survives; missing scope is supplied.
        assert_eq!(dep.version.as_deref(), Some("9.9"));
        assert_eq!(dep.scope.as_deref(), Some("test"));
    }

    #[test]
    fn management_supplies_version_when_declaration_omits_it() {
        let model = Model {
            dependencies: vec![Dependency {
                group_id: Some("org.acme".into()),
                artifact_id: Some("core".into()),
                ..Default::default()
            }],
            dependency_management: Some(DependencyManagement {
                dependencies: vec![managed("org.acme", "core", "1.0", None)],
            }),
            ..Default::default()
        };
        let injected = apply_dependency_management(&model);
        assert_eq!(injected.dependencies[0].version.as_deref(), Some("1.0"));
    }

    #[test]
    fn plugin_management_supplies_version_and_configuration() {
        let mut managed_plugin = Plugin {
            group_id: Some("org.acme".into()),
            artifact_id: Some("builder".into()),
            version: Some("3.0".into()),
            ..Default::default()
        };
        managed_plugin.configuration.insert("threads", "4");

        let model = Model {
            build: Some(Build {
                plugins: vec![Plugin {
                    group_id: Some("org.acme".into()),
                    artifact_id: Some("builder".into()),
                    ..Default::default()
                }],
                plugin_management: Some(PluginManagement {
                    plugins: vec![managed_plugin],
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let injected = apply_plugin_management(&model);
        let plugin = &injected.build.unwrap().plugins[0];
        assert_eq!(plugin.version.as_deref(), Some("3.0"));
        assert_eq!(plugin.configuration.get("threads"), Some("4"));
    }

    #[test]
    fn wildcard_exclusions_filter_imports() {
        let deps = vec![
            managed("org.acme", "core", "1.0", None),
            managed("org.acme", "io", "1.0", None),
            managed("com.other", "misc", "1.0", None),
        ];
        let exclusions = vec![Exclusion {
            group_id: "org.acme".into(),
            artifact_id: "*".into(),
        }];

        let kept = filter_imported(&deps, &exclusions);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].group_id.as_deref(), Some("com.other"));
    }
}
