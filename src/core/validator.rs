// src/core/validator.rs

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::constants::{DEFAULT_SCHEMA_VERSION, KNOWN_SCHEMA_VERSIONS};
use crate::core::problems::{Problem, ProblemCollector, Severity};
use crate::core::version;
use crate::models::{Dependency, Model};

lazy_static! {
    // Coordinate tokens: word characters plus the separators descriptors
    // commonly use. Keeps ':' out so ids stay unambiguous.
    static ref ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_\-.]+$").unwrap();
}

/// Structural checks on a raw model, before any assembly. Raw models may
/// still omit fields the parent will supply, so identity checks stay
/// tolerant of a declared parent reference.
pub fn validate_raw(model: &Model, problems: &mut ProblemCollector) {
    let id = model.id();
    let location = model.location();
    let mut report = |severity: Severity, message: String| {
        problems.add(
            Problem::new(severity, message)
                .with_model_id(id.clone())
                .with_location(&location),
        );
    };

    if let Some(schema) = &model.schema_version {
        if !KNOWN_SCHEMA_VERSIONS.contains(&schema.as_str()) {
            report(
                Severity::Error,
                format!(
                    "Unknown schema_version '{schema}'; this engine supports {}",
                    KNOWN_SCHEMA_VERSIONS.join(", ")
                ),
            );
        }
    }

    if model.artifact_id.is_none() {
        report(Severity::Error, "Missing 'artifact_id'".to_string());
    } else if let Some(artifact_id) = &model.artifact_id {
        if !ID_RE.is_match(artifact_id) {
            report(
                Severity::Error,
                format!("Invalid 'artifact_id' value '{artifact_id}'"),
            );
        }
    }
    if model.effective_group_id().is_none() {
        report(Severity::Error, "Missing 'group_id'".to_string());
    }
    if model.effective_version().is_none() {
        report(Severity::Error, "Missing 'version'".to_string());
    }

    if let Some(parent) = &model.parent {
        for (field, value) in [
            ("parent.group_id", &parent.group_id),
            ("parent.artifact_id", &parent.artifact_id),
            ("parent.version", &parent.version),
        ] {
            if value.is_none() {
                report(Severity::Error, format!("Missing '{field}'"));
            }
        }
        // Self-referential parents would never terminate.
        if parent.group_id == model.group_id
            && parent.artifact_id == model.artifact_id
            && model.artifact_id.is_some()
        {
            report(
                Severity::Fatal,
                format!("Parent reference '{}' points at the model itself", parent.id()),
            );
        }
    }

    let mut profile_ids = HashSet::new();
    for profile in &model.profiles {
        if !profile_ids.insert(profile.id.as_str()) {
            report(
                Severity::Error,
                format!("Duplicate profile id '{}'", profile.id),
            );
        }
    }

    for dep in &model.dependencies {
        validate_dependency_identity(dep, "dependencies", &mut report);
    }
    if let Some(management) = &model.dependency_management {
        for dep in &management.dependencies {
            validate_dependency_identity(dep, "dependency_management", &mut report);
        }
    }
}

fn validate_dependency_identity(
    dep: &Dependency,
    section: &str,
    report: &mut impl FnMut(Severity, String),
) {
    if dep.group_id.is_none() {
        report(
            Severity::Error,
            format!("Missing 'group_id' for {section} entry '{}'", dep.coordinate_id()),
        );
    }
    if dep.artifact_id.is_none() {
        report(
            Severity::Error,
            format!("Missing 'artifact_id' for {section} entry '{}'", dep.coordinate_id()),
        );
    }
}

/// Final checks on an effective model: by now every dependency must carry
/// a concrete version and the identity triplet must be complete.
pub fn validate_effective(model: &Model, problems: &mut ProblemCollector) {
    let id = model.id();
    let location = model.location();
    let mut report = |severity: Severity, message: String| {
        problems.add(
            Problem::new(severity, message)
                .with_model_id(id.clone())
                .with_location(&location),
        );
    };

    if model.group_id.is_none() {
        report(Severity::Error, "Missing 'group_id'".to_string());
    }
    if model.artifact_id.is_none() {
        report(Severity::Error, "Missing 'artifact_id'".to_string());
    }
    if model.version.is_none() {
        report(Severity::Error, "Missing 'version'".to_string());
    }
    if model.schema_version.is_none() {
        report(
            Severity::Warning,
            format!("No 'schema_version' declared; assuming {DEFAULT_SCHEMA_VERSION}"),
        );
    }

    let mut seen = HashSet::new();
    for dep in &model.dependencies {
        let key = dep.management_key();
        if !seen.insert(key.clone()) {
            report(
                Severity::Error,
                format!("Duplicate dependency '{key}' in effective model"),
            );
        }
        match &dep.version {
            None => report(
                Severity::Error,
                format!("Missing 'version' for dependency '{key}'"),
            ),
            Some(v) if version::is_range(v) => {
                if version::VersionRange::parse(v).is_err() {
                    report(
                        Severity::Error,
                        format!("Invalid version range '{v}' for dependency '{key}'"),
                    );
                }
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Parent, Profile};

    fn minimal() -> Model {
        Model {
            group_id: Some("org.acme".into()),
            artifact_id: Some("widget".into()),
            version: Some("1.0".into()),
            ..Default::default()
        }
    }

    #[test]
    fn complete_raw_model_passes() {
        let mut problems = ProblemCollector::new();
        validate_raw(&minimal(), &mut problems);
        assert!(!problems.has_errors());
    }

    #[test]
    fn missing_identity_is_reported() {
        let mut problems = ProblemCollector::new();
        validate_raw(&Model::default(), &mut problems);
        let messages: Vec<&str> = problems
            .problems()
            .iter()
            .map(|p| p.message.as_str())
            .collect();
        assert!(messages.contains(&"Missing 'artifact_id'"));
        assert!(messages.contains(&"Missing 'group_id'"));
        assert!(messages.contains(&"Missing 'version'"));
    }

    #[test]
    fn identity_may_come_from_parent_reference() {
        let model = Model {
            artifact_id: Some("child".into()),
            parent: Some(Parent {
                group_id: Some("org.acme".into()),
                artifact_id: Some("parent".into()),
                version: Some("1.0".into()),
                relative_path: None,
            }),
            ..Default::default()
        };
        let mut problems = ProblemCollector::new();
        validate_raw(&model, &mut problems);
        assert!(!problems.has_errors());
    }

    #[test]
    fn self_referential_parent_is_fatal() {
        let model = Model {
            group_id: Some("org.acme".into()),
            artifact_id: Some("widget".into()),
            version: Some("1.0".into()),
            parent: Some(Parent {
                group_id: Some("org.acme".into()),
                artifact_id: Some("widget".into()),
                version: Some("0.9".into()),
                relative_path: None,
            }),
            ..Default::default()
        };
        let mut problems = ProblemCollector::new();
        validate_raw(&model, &mut problems);
        assert!(problems.has_fatal());
    }

    #[test]
    fn duplicate_profile_ids_are_errors() {
        let mut model = minimal();
        model.profiles = vec![
            Profile {
                id: "ci".into(),
                ..Default::default()
            },
            Profile {
                id: "ci".into(),
                ..Default::default()
            },
        ];
        let mut problems = ProblemCollector::new();
        validate_raw(&model, &mut problems);
        assert!(problems.has_errors());
    }

    #[test]
    fn effective_model_requires_dependency_versions() {
        let mut model = minimal();
        model.dependencies.push(Dependency {
            group_id: Some("org.acme".into()),
            artifact_id: Some("core".into()),
            ..Default::default()
        });
        let mut problems = ProblemCollector::new();
        validate_effective(&model, &mut problems);
        assert!(problems.has_errors());
    }
}
