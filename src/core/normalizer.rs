// src/core/normalizer.rs

use crate::core::inheritance;
use crate::core::problems::{Problem, ProblemCollector, Severity};
use crate::models::{Dependency, Model, Plugin};

/// Collapses duplicate declarations in a raw model. Duplicate dependencies
/// keep the position of the first occurrence with the values of the last;
/// duplicate plugins are merged field-wise, later declaration dominant.
/// Each collapse records a warning.
pub fn merge_duplicates(model: &Model, problems: &mut ProblemCollector) -> Model {
    let mut out = model.clone();
    out.dependencies = dedupe_dependencies(&model.dependencies, model, problems);
    if let Some(build) = &mut out.build {
        build.plugins = dedupe_plugins(&build.plugins, model, problems);
    }
    out
}

fn dedupe_dependencies(
    deps: &[Dependency],
    model: &Model,
    problems: &mut ProblemCollector,
) -> Vec<Dependency> {
    let mut kept: Vec<Dependency> = Vec::with_capacity(deps.len());
    for dep in deps {
        let key = dep.management_key();
        match kept.iter_mut().find(|k| k.management_key() == key) {
            Some(existing) => {
                problems.add(
                    Problem::new(
                        Severity::Warning,
                        format!("Duplicate declaration of dependency '{key}'"),
                    )
                    .with_model_id(model.id()),
                );
                *existing = dep.clone();
            }
            None => kept.push(dep.clone()),
        }
    }
    kept
}

fn dedupe_plugins(
    plugins: &[Plugin],
    model: &Model,
    problems: &mut ProblemCollector,
) -> Vec<Plugin> {
    let mut kept: Vec<Plugin> = Vec::with_capacity(plugins.len());
    for plugin in plugins {
        let key = plugin.key();
        match kept.iter_mut().find(|k| k.key() == key) {
            Some(existing) => {
                problems.add(
                    Problem::new(
                        Severity::Warning,
                        format!("Duplicate declaration of plugin '{key}'"),
                    )
                    .with_model_id(model.id()),
                );
                *existing = inheritance::merge_plugin(plugin, existing);
            }
            None => kept.push(plugin.clone()),
        }
    }
    kept
}

/// Fills in the defaults an effective model guarantees: every dependency
/// has a scope, and plugin-level configuration flows down into each
/// execution (execution-level settings dominant).
pub fn inject_default_values(model: &Model) -> Model {
    let mut out = model.clone();
    for dep in &mut out.dependencies {
        if dep.scope.is_none() {
            dep.scope = Some(dep.effective_scope().to_string());
        }
    }
    if let Some(build) = &mut out.build {
        for plugin in &mut build.plugins {
            for execution in &mut plugin.executions {
                let mut configuration = plugin.configuration.clone();
                configuration.merge_override(&execution.configuration);
                execution.configuration = configuration;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_SCOPE;
    use crate::models::Build;

    #[test]
    fn duplicate_dependency_keeps_first_position_last_values() {
        let model = Model {
            dependencies: vec![
                Dependency {
                    group_id: Some("org.acme".into()),
                    artifact_id: Some("core".into()),
                    version: Some("1.0".into()),
                    ..Default::default()
                },
                Dependency {
                    group_id: Some("org.acme".into()),
                    artifact_id: Some("extra".into()),
                    version: Some("1.0".into()),
                    ..Default::default()
                },
                Dependency {
                    group_id: Some("org.acme".into()),
                    artifact_id: Some("core".into()),
                    version: Some("2.0".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let mut problems = ProblemCollector::new();
        let normalized = merge_duplicates(&model, &mut problems);
        assert_eq!(normalized.dependencies.len(), 2);
        assert_eq!(normalized.dependencies[0].version.as_deref(), Some("2.0"));
        assert_eq!(
            normalized.dependencies[1].artifact_id.as_deref(),
            Some("extra")
        );
        assert_eq!(problems.problems().len(), 1);
        assert_eq!(problems.problems()[0].severity, Severity::Warning);
    }

    #[test]
    fn default_scope_and_execution_configuration() {
        let mut plugin = Plugin {
            group_id: Some("org.acme".into()),
            artifact_id: Some("builder".into()),
            executions: vec![crate::models::PluginExecution::default()],
            ..Default::default()
        };
        plugin.configuration.insert("threads", "4");
        plugin.executions[0].configuration.insert("verbose", "true");

        let model = Model {
            dependencies: vec![Dependency {
                group_id: Some("org.acme".into()),
                artifact_id: Some("core".into()),
                version: Some("1.0".into()),
                ..Default::default()
            }],
            build: Some(Build {
                plugins: vec![plugin],
                ..Default::default()
            }),
            ..Default::default()
        };

        let defaulted = inject_default_values(&model);
        assert_eq!(defaulted.dependencies[0].scope.as_deref(), Some(DEFAULT_SCOPE));
        let execution = &defaulted.build.unwrap().plugins[0].executions[0];
        assert_eq!(execution.configuration.get("threads"), Some("4"));
        assert_eq!(execution.configuration.get("verbose"), Some("true"));
    }
}
