// src/core/profiles.rs

use crate::core::activation::{self, ActivationContext};
use crate::core::inheritance;
use crate::core::problems::ProblemCollector;
use crate::models::{Model, Profile, ProfileSource};

/// Picks the active subset of `profiles`, preserving declaration order.
///
/// A profile is active when it is explicitly requested, or when all of its
/// declared conditions hold. Explicit deactivation always wins. Profiles
/// flagged active-by-default form a fallback bucket: project-sourced ones
/// are suppressed as soon as any other project-sourced profile activates,
/// while externally supplied ones join the result regardless.
pub fn select_active(
    profiles: &[Profile],
    ctx: &ActivationContext,
    problems: &mut ProblemCollector,
) -> Vec<Profile> {
    let mut activated: Vec<Profile> = Vec::new();
    let mut project_defaults: Vec<Profile> = Vec::new();
    let mut external_defaults: Vec<Profile> = Vec::new();
    let mut project_activation_seen = false;

    for profile in profiles {
        if ctx.inactive_ids.contains(&profile.id) {
            continue;
        }
        let explicitly_active = ctx.active_ids.contains(&profile.id);
        if explicitly_active || activation::is_condition_active(profile, ctx, problems) {
            if profile.source == ProfileSource::Project {
                project_activation_seen = true;
            }
            activated.push(profile.clone());
            continue;
        }
        if profile
            .activation
            .as_ref()
            .and_then(|a| a.active_by_default)
            .unwrap_or(false)
        {
            match profile.source {
                ProfileSource::Project => project_defaults.push(profile.clone()),
                ProfileSource::External => external_defaults.push(profile.clone()),
            }
        }
    }

    if !project_activation_seen {
        activated.extend(project_defaults);
    }
    activated.extend(external_defaults);
    activated
}

/// Merges one active profile's contents into the model. Keyed collections
/// are profile-dominant with the model's entries first, plugins are
/// interleaved positionally, and property collisions keep the value the
/// descriptor itself declared.
pub fn inject_profile(model: &Model, profile: &Profile) -> Model {
    let mut out = model.clone();
    out.properties.merge_keep_existing(&profile.properties);
    out.dependencies =
        inheritance::merge_dependency_lists(&profile.dependencies, &model.dependencies);
    out.dependency_management = inheritance::merge_dependency_management(
        profile.dependency_management.as_ref(),
        model.dependency_management.as_ref(),
    );
    out.build = inheritance::merge_build_with(
        profile.build.as_ref(),
        model.build.as_ref(),
        inheritance::merge_plugin_lists_interleaved,
    );
    out.reporting = inheritance::merge_reporting_with(
        profile.reporting.as_ref(),
        model.reporting.as_ref(),
        inheritance::merge_plugin_lists_interleaved,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Activation, Build, Dependency, Plugin, PropertyActivation};

    fn profile(id: &str, source: ProfileSource, activation: Option<Activation>) -> Profile {
        Profile {
            id: id.into(),
            source,
            activation,
            ..Default::default()
        }
    }

    fn default_active() -> Option<Activation> {
        Some(Activation {
            active_by_default: Some(true),
            ..Default::default()
        })
    }

    fn property_activated(name: &str) -> Option<Activation> {
        Some(Activation {
            property: Some(PropertyActivation {
                name: name.into(),
                value: None,
            }),
            ..Default::default()
        })
    }

    #[test]
    fn project_default_is_suppressed_by_another_project_activation() {
        let profiles = vec![
            profile("defaults", ProfileSource::Project, default_active()),
            profile("ci", ProfileSource::Project, property_activated("ci")),
        ];
        let mut ctx = ActivationContext::default();
        ctx.user_properties.insert("ci", "true");
        let mut problems = ProblemCollector::new();

        let active = select_active(&profiles, &ctx, &mut problems);
        let ids: Vec<&str> = active.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ci"]);
    }

    #[test]
    fn external_default_survives_project_activation() {
        let profiles = vec![
            profile("site-defaults", ProfileSource::External, default_active()),
            profile("ci", ProfileSource::Project, property_activated("ci")),
        ];
        let mut ctx = ActivationContext::default();
        ctx.user_properties.insert("ci", "true");
        let mut problems = ProblemCollector::new();

        let active = select_active(&profiles, &ctx, &mut problems);
        let ids: Vec<&str> = active.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ci", "site-defaults"]);
    }

    #[test]
    fn explicit_deactivation_beats_everything() {
        let profiles = vec![profile("always", ProfileSource::Project, default_active())];
        let mut ctx = ActivationContext::default();
        ctx.inactive_ids.insert("always".into());
        let mut problems = ProblemCollector::new();

        assert!(select_active(&profiles, &ctx, &mut problems).is_empty());
    }

    #[test]
    fn defaults_apply_when_nothing_else_activates() {
        let profiles = vec![
            profile("defaults", ProfileSource::Project, default_active()),
            profile("ci", ProfileSource::Project, property_activated("ci")),
        ];
        let ctx = ActivationContext::default();
        let mut problems = ProblemCollector::new();

        let active = select_active(&profiles, &ctx, &mut problems);
        let ids: Vec<&str> = active.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["defaults"]);
    }

    #[test]
    fn injection_is_keyed_dominant_and_order_stable() {
        let mut model = Model::default();
        model.dependencies.push(Dependency {
            group_id: Some("org.acme".into()),
            artifact_id: Some("core".into()),
            version: Some("1.0".into()),
            ..Default::default()
        });

        let mut injected = Profile {
            id: "ci".into(),
            ..Default::default()
        };
        injected.dependencies.push(Dependency {
            group_id: Some("org.acme".into()),
            artifact_id: Some("core".into()),
            version: Some("2.0".into()),
            ..Default::default()
        });
        injected.dependencies.push(Dependency {
            group_id: Some("org.acme".into()),
            artifact_id: Some("extra".into()),
            version: Some("1.0".into()),
            ..Default::default()
        });

        let result = inject_profile(&model, &injected);
        let ids: Vec<String> = result
            .dependencies
            .iter()
            .map(Dependency::coordinate_id)
            .collect();
        assert_eq!(ids, vec!["org.acme:core:2.0", "org.acme:extra:1.0"]);
    }

    #[test]
    fn injection_never_clobbers_declared_properties() {
        let mut model = Model::default();
        model.properties.insert("mode", "dev");

        let mut injected = Profile {
            id: "ci".into(),
            ..Default::default()
        };
        injected.properties.insert("mode", "ci");
        injected.properties.insert("report.dir", "out/reports");

        let result = inject_profile(&model, &injected);
        assert_eq!(result.properties.get("mode"), Some("dev"));
        assert_eq!(result.properties.get("report.dir"), Some("out/reports"));
    }

    #[test]
    fn injected_plugins_keep_their_relative_position() {
        let plugin = |artifact: &str, version: &str| Plugin {
            group_id: Some("org.acme".into()),
            artifact_id: Some(artifact.into()),
            version: Some(version.into()),
            ..Default::default()
        };
        let model = Model {
            build: Some(Build {
                plugins: vec![plugin("alpha", "1.0"), plugin("beta", "1.0")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let injected = Profile {
            id: "ci".into(),
            build: Some(Build {
                plugins: vec![
                    plugin("lint", "1.0"),
                    plugin("beta", "2.0"),
                    plugin("deploy", "1.0"),
                ],
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = inject_profile(&model, &injected);
        let plugins = result.build.unwrap().plugins;
        let order: Vec<(&str, &str)> = plugins
            .iter()
            .map(|p| {
                (
                    p.artifact_id.as_deref().unwrap(),
                    p.version.as_deref().unwrap(),
                )
            })
            .collect();
        // "lint" precedes "beta" in the profile, so it lands right before
        // the merged "beta"; "deploy" has no anchor and trails.
        assert_eq!(
            order,
            vec![
                ("alpha", "1.0"),
                ("lint", "1.0"),
                ("beta", "2.0"),
                ("deploy", "1.0")
            ]
        );
    }
}
