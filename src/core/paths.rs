// src/core/paths.rs

use std::path::{Component, Path, PathBuf};

use crate::models::Model;

/// Anchors a relative path at `base`. Absolute paths pass through
/// untouched apart from lexical cleanup; no filesystem access happens.
pub fn align_to_base_dir(path: &str, base: &Path) -> String {
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };
    dunce::simplified(&clean(&joined)).display().to_string()
}

/// Lexical normalization: resolves `.` and `..` components without
/// touching the filesystem, so not-yet-existing build directories work.
fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(Component::ParentDir);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

/// Collapses `/./` and `dir/../` segments in the path portion of a URL,
/// leaving the scheme and authority alone.
pub fn normalize_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, path),
        None => return url.to_string(),
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                if segments.pop().is_none() {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    format!("{scheme}://{authority}/{}", segments.join("/"))
}

/// Aligns every path-valued build/reporting field of the model to the
/// project's base directory. A model without a descriptor path (e.g. the
/// super-model) is returned unchanged.
pub fn align_model_paths(model: &Model) -> Model {
    let Some(base) = model.project_dir().map(Path::to_path_buf) else {
        return model.clone();
    };
    let mut aligned = model.clone();
    if let Some(build) = &mut aligned.build {
        for dir in [
            &mut build.directory,
            &mut build.source_directory,
            &mut build.output_directory,
        ] {
            if let Some(value) = dir {
                *value = align_to_base_dir(value, &base);
            }
        }
        for resource in &mut build.resources {
            if let Some(value) = &mut resource.directory {
                *value = align_to_base_dir(value, &base);
            }
        }
    }
    if let Some(reporting) = &mut aligned.reporting {
        if let Some(value) = &mut reporting.output_directory {
            *value = align_to_base_dir(value, &base);
        }
    }
    aligned
}

/// Normalizes the model's declared URLs.
pub fn normalize_model_urls(model: &Model) -> Model {
    let mut normalized = model.clone();
    if let Some(url) = &mut normalized.url {
        *url = normalize_url(url);
    }
    normalized
}
