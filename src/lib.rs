// src/lib.rs

pub mod constants;
pub mod core;
pub mod models;

pub use crate::core::problems::{Problem, ProblemCollector, Severity};
pub use crate::core::resolver::{
    Engine, FileModel, ResolveError, ResolveRequest, ResolveResult, Session,
};
pub use crate::core::sources::{
    CoordinateResolver, DescriptorReader, ModelSource, SuperModelProvider,
};
pub use crate::models::Model;

use anyhow::Context;
use std::path::Path;

/// One-shot convenience: resolves the effective model for a single
/// descriptor with the default collaborators and a fresh session.
pub fn resolve_effective(descriptor: &Path) -> anyhow::Result<ResolveResult> {
    let engine = Engine::new();
    let session = engine.new_session();
    let request = ResolveRequest::new(ModelSource::from_path(descriptor));
    session
        .build(&request)
        .with_context(|| format!("failed to resolve '{}'", descriptor.display()))
}
