// src/core/context.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::constants::DESCRIPTOR_FILENAME;
use crate::core::sources::{DescriptorReader, ModelData, ModelSource};

/// Cache partition tag. The same path can be cached at several pipeline
/// stages at once; the tag keeps them apart.
pub type Tag = &'static str;

pub const TAG_RAW: Tag = "raw";
pub const TAG_FILE: Tag = "file";
pub const TAG_IMPORT: Tag = "import";

#[derive(Error, Debug, Clone)]
pub enum ContextError {
    /// The first computation for this cell failed; every waiter sees the
    /// same rendering of that failure.
    #[error("{0}")]
    Failed(String),
    #[error("computation for this cache entry panicked")]
    Poisoned,
    #[error("edge {from} -> {to} would close a project cycle")]
    Cycle { from: String, to: String },
}

// --- WRITE-ONCE CELL ---

enum HolderState<T> {
    Empty,
    InProgress,
    Ready(Arc<T>),
    Failed(ContextError),
}

/// Blocking write-once cell. The first caller computes; concurrent callers
/// block until the value (or the failure) is available. At most one
/// computation ever runs per cell.
pub struct Holder<T> {
    state: Mutex<HolderState<T>>,
    ready: Condvar,
}

impl<T> Default for Holder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Holder<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HolderState::Empty),
            ready: Condvar::new(),
        }
    }

    pub fn get_or_compute<F, E>(&self, compute: F) -> Result<Arc<T>, ContextError>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        {
            let mut state = self.state.lock().map_err(|_| ContextError::Poisoned)?;
            loop {
                match &*state {
                    HolderState::Ready(value) => return Ok(Arc::clone(value)),
                    HolderState::Failed(error) => return Err(error.clone()),
                    HolderState::InProgress => {
                        state = self
                            .ready
                            .wait(state)
                            .map_err(|_| ContextError::Poisoned)?;
                    }
                    HolderState::Empty => {
                        *state = HolderState::InProgress;
                        break;
                    }
                }
            }
        }

        // Compute outside the lock so waiters can park on the condvar. A
        // panic in the closure must not leave waiters blocked forever.
        let outcome = panic::catch_unwind(AssertUnwindSafe(compute));
        let mut state = self.state.lock().map_err(|_| ContextError::Poisoned)?;
        let result = match outcome {
            Ok(Ok(value)) => {
                let value = Arc::new(value);
                *state = HolderState::Ready(Arc::clone(&value));
                Ok(value)
            }
            Ok(Err(error)) => {
                let error = ContextError::Failed(error.to_string());
                *state = HolderState::Failed(error.clone());
                Err(error)
            }
            Err(_) => {
                *state = HolderState::Failed(ContextError::Poisoned);
                Err(ContextError::Poisoned)
            }
        };
        self.ready.notify_all();
        result
    }
}

// --- CROSS-PROJECT EDGE GRAPH ---

/// Directed edges between project ids, used to reject circular parent and
/// import relationships that span descriptors.
#[derive(Debug, Default)]
struct Graph {
    edges: HashMap<String, HashSet<String>>,
}

impl Graph {
    /// Adds `from -> to`, failing if `to` can already reach `from`.
    fn add_edge(&mut self, from: &str, to: &str) -> Result<(), ContextError> {
        if from == to || self.reaches(to, from) {
            return Err(ContextError::Cycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        Ok(())
    }

    fn reaches(&self, start: &str, target: &str) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !seen.insert(node.to_string()) {
                continue;
            }
            if let Some(next) = self.edges.get(node) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }
}

// --- SESSION CONTEXT ---

fn path_key(path: &Path, tag: Tag) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.display().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(tag.as_bytes());
    *hasher.finalize().as_bytes()
}

fn coordinate_key(group_id: &str, artifact_id: &str, version: &str, tag: Tag) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in [group_id, artifact_id, version, tag] {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    *hasher.finalize().as_bytes()
}

type CellMap = Mutex<HashMap<[u8; 32], Arc<Holder<ModelData>>>>;

/// Shared state for one build session. Caches are write-once per key and
/// live only as long as the session; concurrent builds of overlapping
/// lineages read each descriptor exactly once.
pub struct SessionContext {
    pub id: Uuid,
    source_cells: CellMap,
    coordinate_cells: CellMap,
    /// `group:artifact` to every workspace source declaring it.
    ga_index: Mutex<HashMap<String, Vec<ModelSource>>>,
    scanned: AtomicBool,
    scan_lock: Mutex<()>,
    graph: Mutex<Graph>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        log::debug!("session {id} started");
        Self {
            id,
            source_cells: Mutex::new(HashMap::new()),
            coordinate_cells: Mutex::new(HashMap::new()),
            ga_index: Mutex::new(HashMap::new()),
            scanned: AtomicBool::new(false),
            scan_lock: Mutex::new(()),
            graph: Mutex::new(Graph::default()),
        }
    }

    /// The write-once cell for a source at a given pipeline stage.
    pub fn source_cell(&self, source: &ModelSource, tag: Tag) -> Arc<Holder<ModelData>> {
        let key = path_key(source.path(), tag);
        let mut cells = match self.source_cells.lock() {
            Ok(cells) => cells,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(cells.entry(key).or_default())
    }

    /// The write-once cell for a coordinate at a given pipeline stage.
    pub fn coordinate_cell(
        &self,
        group_id: &str,
        artifact_id: &str,
        version: &str,
        tag: Tag,
    ) -> Arc<Holder<ModelData>> {
        let key = coordinate_key(group_id, artifact_id, version, tag);
        let mut cells = match self.coordinate_cells.lock() {
            Ok(cells) => cells,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(cells.entry(key).or_default())
    }

    /// Registers a cross-project relationship, rejecting cycle closures.
    pub fn add_project_edge(&self, from: &str, to: &str) -> Result<(), ContextError> {
        let mut graph = match self.graph.lock() {
            Ok(graph) => graph,
            Err(poisoned) => poisoned.into_inner(),
        };
        graph.add_edge(from, to)
    }

    /// Scans the workspace below `root` for descriptors and indexes them by
    /// group:artifact. Runs at most once per session; later calls return
    /// immediately.
    pub fn index_workspace(&self, root: &Path, reader: &dyn DescriptorReader) {
        if self.scanned.load(Ordering::Acquire) {
            return;
        }
        let _guard = match self.scan_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.scanned.load(Ordering::Acquire) {
            return;
        }

        log::debug!("session {}: scanning workspace under {}", self.id, root.display());
        let mut index: HashMap<String, Vec<ModelSource>> = HashMap::new();
        for entry in WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file() && entry.file_name() == DESCRIPTOR_FILENAME {
                let source = ModelSource::from_path(entry.path());
                // Lenient read: a broken descriptor should not kill the
                // scan, only stay out of the index.
                let Ok(model) = reader.read(&source, false) else {
                    log::warn!("skipping unreadable descriptor {}", entry.path().display());
                    continue;
                };
                let (Some(group), Some(artifact)) =
                    (model.effective_group_id(), model.artifact_id.as_deref())
                else {
                    continue;
                };
                index
                    .entry(format!("{group}:{artifact}"))
                    .or_default()
                    .push(source);
            }
        }
        let count: usize = index.values().map(Vec::len).sum();
        log::debug!("session {}: indexed {count} workspace descriptors", self.id);

        let mut ga_index = match self.ga_index.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        *ga_index = index;
        self.scanned.store(true, Ordering::Release);
    }

    /// Every indexed source for a group:artifact pair, scan order.
    pub fn workspace_sources(&self, group_id: &str, artifact_id: &str) -> Vec<ModelSource> {
        let ga_index = match self.ga_index.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        ga_index
            .get(&format!("{group_id}:{artifact_id}"))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sources::TomlDescriptorReader;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn holder_computes_exactly_once_across_threads() {
        let holder: Arc<Holder<u32>> = Arc::new(Holder::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let holder = Arc::clone(&holder);
            let calls = Arc::clone(&calls);
            handles.push(thread::spawn(move || {
                holder
                    .get_or_compute(|| -> Result<u32, String> {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(10));
                        Ok(42)
                    })
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(*handle.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn holder_failure_is_shared_with_waiters() {
        let holder: Holder<u32> = Holder::new();
        let first = holder.get_or_compute(|| Err::<u32, _>("boom".to_string()));
        assert!(matches!(first, Err(ContextError::Failed(msg)) if msg == "boom"));
        // Second caller sees the recorded failure, no recomputation.
        let second = holder.get_or_compute(|| Ok::<u32, String>(1));
        assert!(second.is_err());
    }

    #[test]
    fn graph_rejects_cycle_closures() {
        let ctx = SessionContext::new();
        ctx.add_project_edge("a", "b").unwrap();
        ctx.add_project_edge("b", "c").unwrap();
        let err = ctx.add_project_edge("c", "a").unwrap_err();
        assert!(matches!(err, ContextError::Cycle { .. }));
        // Unrelated edges still work afterwards.
        ctx.add_project_edge("c", "d").unwrap();
    }

    #[test]
    fn workspace_scan_runs_once_and_indexes_by_ga() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("widget");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(
            sub.join(DESCRIPTOR_FILENAME),
            "group_id = \"org.acme\"\nartifact_id = \"widget\"\nversion = \"1.0\"\n",
        )
        .unwrap();

        let ctx = SessionContext::new();
        let reader = TomlDescriptorReader;
        ctx.index_workspace(dir.path(), &reader);
        ctx.index_workspace(dir.path(), &reader);

        let sources = ctx.workspace_sources("org.acme", "widget");
        assert_eq!(sources.len(), 1);
        assert!(ctx.workspace_sources("org.acme", "missing").is_empty());
    }
}
