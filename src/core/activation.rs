// src/core/activation.rs

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::constants::MAX_INTERPOLATION_DEPTH;
use crate::core::problems::{Problem, ProblemCollector, Severity};
use crate::models::{
    Activation, FileActivation, OsActivation, Profile, Properties, PropertyActivation,
};

/// Everything profile activation can see: explicit id requests, the merged
/// property environment and the project directory for file probes.
#[derive(Debug, Default)]
pub struct ActivationContext {
    /// Ids explicitly requested active (e.g. from a CLI `-P foo`).
    pub active_ids: HashSet<String>,
    /// Ids explicitly disabled (e.g. `-P !foo`).
    pub inactive_ids: HashSet<String>,
    pub user_properties: Properties,
    pub system_properties: Properties,
    pub project_dir: Option<PathBuf>,
}

impl ActivationContext {
    /// Property lookup for activation conditions: user properties shadow
    /// system properties.
    fn property(&self, name: &str) -> Option<&str> {
        self.user_properties
            .get(name)
            .or_else(|| self.system_properties.get(name))
    }
}

/// Whether this profile's declared conditions hold. All configured
/// activators must agree (AND semantics). A profile with no conditions is
/// never condition-active; it only activates by explicit request or the
/// default flag.
pub fn is_condition_active(
    profile: &Profile,
    ctx: &ActivationContext,
    problems: &mut ProblemCollector,
) -> bool {
    let Some(activation) = &profile.activation else {
        return false;
    };
    if !activation.has_conditions() {
        return false;
    }
    activators(activation)
        .into_iter()
        .all(|check| check(profile, ctx, problems))
}

type Activator = Box<dyn Fn(&Profile, &ActivationContext, &mut ProblemCollector) -> bool>;

fn activators(activation: &Activation) -> Vec<Activator> {
    let mut checks: Vec<Activator> = Vec::new();
    if let Some(property) = activation.property.clone() {
        checks.push(Box::new(move |_, ctx, _| property_matches(&property, ctx)));
    }
    if let Some(os) = activation.os.clone() {
        checks.push(Box::new(move |_, _, _| os_matches(&os)));
    }
    if let Some(file) = activation.file.clone() {
        checks.push(Box::new(move |profile, ctx, problems| {
            file_matches(&file, profile, ctx, problems)
        }));
    }
    checks
}

/// Property activation. A leading `!` on the name inverts the test; a
/// missing value means "property is present (non-empty)".
fn property_matches(activation: &PropertyActivation, ctx: &ActivationContext) -> bool {
    let (name, negated) = match activation.name.strip_prefix('!') {
        Some(rest) => (rest, true),
        None => (activation.name.as_str(), false),
    };
    let current = ctx.property(name);
    let holds = match &activation.value {
        Some(expected) => match expected.strip_prefix('!') {
            Some(forbidden) => current != Some(forbidden),
            None => current == Some(expected.as_str()),
        },
        None => current.is_some_and(|v| !v.is_empty()),
    };
    holds != negated
}

/// OS activation against the build host. Each configured part may be
/// negated with a leading `!`.
fn os_matches(activation: &OsActivation) -> bool {
    let part = |declared: &Option<String>, actual: &str| -> bool {
        let Some(declared) = declared else {
            return true;
        };
        match declared.strip_prefix('!') {
            Some(negated) => !negated.eq_ignore_ascii_case(actual),
            None => declared.eq_ignore_ascii_case(actual),
        }
    };
    part(&activation.name, std::env::consts::OS)
        && part(&activation.family, std::env::consts::FAMILY)
        && part(&activation.arch, std::env::consts::ARCH)
}

/// File activation: `exists` and/or `missing` probes, anchored at the
/// project directory. `${basedir}` in the path resolves to that directory.
fn file_matches(
    activation: &FileActivation,
    profile: &Profile,
    ctx: &ActivationContext,
    problems: &mut ProblemCollector,
) -> bool {
    let Some(project_dir) = ctx.project_dir.as_deref() else {
        // Memory-only models have no directory to probe against.
        problems.add(Problem::new(
            Severity::Warning,
            format!(
                "Failed to determine file activation for profile '{}': model has no base \
                 directory",
                profile.id
            ),
        ));
        return false;
    };
    let probe = |path: &str| -> bool {
        resolve_probe_path(path, project_dir, ctx).exists()
    };
    let exists_ok = activation.exists.as_deref().is_none_or(probe);
    let missing_ok = activation.missing.as_deref().is_none_or(|p| !probe(p));
    exists_ok && missing_ok
}

fn resolve_probe_path(path: &str, project_dir: &Path, ctx: &ActivationContext) -> PathBuf {
    let mut expanded = path.replace("${basedir}", &project_dir.display().to_string());
    // Property references are allowed in probe paths; unresolved or
    // self-referential ones stay verbatim and simply fail to match. The
    // iteration cap keeps mutually recursive properties from spinning.
    for _ in 0..MAX_INTERPOLATION_DEPTH {
        let (Some(start), Some(end)) = (expanded.find("${"), expanded.find('}')) else {
            break;
        };
        if end <= start {
            break;
        }
        let key = expanded[start + 2..end].to_string();
        let Some(value) = ctx.property(&key) else {
            break;
        };
        let before = expanded.clone();
        expanded.replace_range(start..=end, value);
        if expanded == before {
            break;
        }
    }
    let candidate = Path::new(&expanded);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        project_dir.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile_with(activation: Activation) -> Profile {
        Profile {
            id: "test".into(),
            activation: Some(activation),
            ..Default::default()
        }
    }

    #[test]
    fn property_presence_and_value_checks() {
        let mut ctx = ActivationContext::default();
        ctx.user_properties.insert("env", "ci");

        let by_presence = profile_with(Activation {
            property: Some(PropertyActivation {
                name: "env".into(),
                value: None,
            }),
            ..Default::default()
        });
        let by_value = profile_with(Activation {
            property: Some(PropertyActivation {
                name: "env".into(),
                value: Some("ci".into()),
            }),
            ..Default::default()
        });
        let negated = profile_with(Activation {
            property: Some(PropertyActivation {
                name: "!env".into(),
                value: None,
            }),
            ..Default::default()
        });

        let mut problems = ProblemCollector::new();
        assert!(is_condition_active(&by_presence, &ctx, &mut problems));
        assert!(is_condition_active(&by_value, &ctx, &mut problems));
        assert!(!is_condition_active(&negated, &ctx, &mut problems));
    }

    #[test]
    fn all_configured_activators_must_agree() {
        let mut ctx = ActivationContext::default();
        ctx.user_properties.insert("env", "ci");

        let profile = profile_with(Activation {
            property: Some(PropertyActivation {
                name: "env".into(),
                value: Some("ci".into()),
            }),
            os: Some(OsActivation {
                name: Some("definitely-not-an-os".into()),
                family: None,
                arch: None,
            }),
            ..Default::default()
        });
        let mut problems = ProblemCollector::new();
        assert!(!is_condition_active(&profile, &ctx, &mut problems));
    }

    #[test]
    fn file_activation_probes_relative_to_project_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let ctx = ActivationContext {
            project_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let exists = profile_with(Activation {
            file: Some(FileActivation {
                exists: Some("marker.txt".into()),
                missing: None,
            }),
            ..Default::default()
        });
        let missing = profile_with(Activation {
            file: Some(FileActivation {
                exists: None,
                missing: Some("absent.txt".into()),
            }),
            ..Default::default()
        });

        let mut problems = ProblemCollector::new();
        assert!(is_condition_active(&exists, &ctx, &mut problems));
        assert!(is_condition_active(&missing, &ctx, &mut problems));
    }

    #[test]
    fn probe_paths_with_circular_properties_still_terminate() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ActivationContext {
            project_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        ctx.user_properties.insert("marker.dir", "${marker.dir}");
        ctx.user_properties.insert("ping", "${pong}");
        ctx.user_properties.insert("pong", "${ping}");

        let self_referential = profile_with(Activation {
            file: Some(FileActivation {
                exists: Some("${marker.dir}/marker.txt".into()),
                missing: None,
            }),
            ..Default::default()
        });
        let mutually_referential = profile_with(Activation {
            file: Some(FileActivation {
                exists: Some("${ping}/marker.txt".into()),
                missing: None,
            }),
            ..Default::default()
        });

        let mut problems = ProblemCollector::new();
        assert!(!is_condition_active(&self_referential, &ctx, &mut problems));
        assert!(!is_condition_active(&mutually_referential, &ctx, &mut problems));
    }

    #[test]
    fn default_flag_alone_is_not_a_condition() {
        let profile = profile_with(Activation {
            active_by_default: Some(true),
            ..Default::default()
        });
        let ctx = ActivationContext::default();
        let mut problems = ProblemCollector::new();
        assert!(!is_condition_active(&profile, &ctx, &mut problems));
    }
}
