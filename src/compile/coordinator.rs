//! Compilation coordinator: decides what must recompile and runs it in
//! dependency-respecting batches.
//!
//! Per-file decision: hash → cache lookup → HIT (reuse cached artifact) or
//! MISS (read, invoke the compile oracle, store, update the dependency
//! graph). Sequential mode preserves input order for small batches; parallel
//! mode advances frontier by frontier so a file is never compiled before its
//! dependencies are current.
//!
//! The cache and graph are owned by the coordinator value - constructed per
//! build session, dropped with it, no hidden process-wide state.

use parking_lot::RwLock;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cache::AstCache;
use super::graph::{DependencyGraph, GraphError};
use super::hash::hash_file;
use super::oracle::{CompileError, CompileOracle, CompiledUnit};

// =============================================================================
// Results & metrics
// =============================================================================

/// How one file fared in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Content hash matched the cache; artifact reused.
    CacheHit,
    /// Freshly compiled and stored.
    Compiled,
    /// Failed; siblings in the batch are unaffected.
    Failed,
}

/// Per-file outcome of a pass.
#[derive(Debug)]
pub struct FileResult {
    pub path: PathBuf,
    pub status: FileStatus,
    /// Present iff `status == Failed`.
    pub error: Option<CompileError>,
    /// Present on hit or fresh compile.
    pub unit: Option<Arc<CompiledUnit>>,
}

impl FileResult {
    fn hit(path: &Path, unit: Arc<CompiledUnit>) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::CacheHit,
            error: None,
            unit: Some(unit),
        }
    }

    fn compiled(path: &Path, unit: Arc<CompiledUnit>) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Compiled,
            error: None,
            unit: Some(unit),
        }
    }

    fn failed(path: &Path, error: CompileError) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Failed,
            error: Some(error),
            unit: None,
        }
    }
}

/// Pass-level metrics.
#[derive(Debug, Default, Clone)]
pub struct CompileStats {
    pub total_files: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub files_compiled: usize,
    pub files_failed: usize,
    pub parallel_batches: usize,
    /// Time spent hashing and probing the cache.
    pub hash_duration: Duration,
    /// Time spent reading sources and running the oracle.
    pub compile_duration: Duration,
    /// Wall-clock time of the whole pass.
    pub total_duration: Duration,
}

impl CompileStats {
    /// Cache hit rate in percent; 0 when nothing was requested.
    pub fn hit_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_files as f64 * 100.0
        }
    }
}

/// Everything a pass produced.
#[derive(Debug, Default)]
pub struct PassReport {
    pub results: Vec<FileResult>,
    pub stats: CompileStats,
    /// True when a program-wide (type/codegen) error aborted the pass.
    pub aborted: bool,
}

impl PassReport {
    /// True when every requested file compiled or hit the cache.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.stats.files_failed == 0
    }

    /// First failure in result order, if any.
    pub fn first_error(&self) -> Option<(&Path, &CompileError)> {
        self.results
            .iter()
            .find_map(|r| r.error.as_ref().map(|e| (r.path.as_path(), e)))
    }

    /// True when any freshly compiled unit declares a schema resource.
    pub fn schema_changed(&self) -> bool {
        self.results.iter().any(|r| {
            r.status == FileStatus::Compiled
                && r.unit.as_ref().is_some_and(|u| u.touches_schema())
        })
    }
}

/// Outcome of one `compile_one` call with phase timings.
struct Timed {
    result: FileResult,
    hash_time: Duration,
    compile_time: Duration,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Drives hasher + cache + graph to execute compilation passes.
pub struct Coordinator {
    cache: AstCache,
    graph: RwLock<DependencyGraph>,
    oracle: Arc<dyn CompileOracle>,
}

impl Coordinator {
    pub fn new(oracle: Arc<dyn CompileOracle>) -> Self {
        Self {
            cache: AstCache::new(),
            graph: RwLock::new(DependencyGraph::new()),
            oracle,
        }
    }

    /// The artifact cache (read-mostly).
    pub fn cache(&self) -> &AstCache {
        &self.cache
    }

    /// Run a closure against the dependency graph under the read lock.
    pub fn with_graph<R>(&self, f: impl FnOnce(&DependencyGraph) -> R) -> R {
        f(&self.graph.read())
    }

    /// Evict cache entries unused beyond `max_age`.
    pub fn prune_cache(&self, max_age: Duration) -> usize {
        self.cache.prune(max_age)
    }

    /// Drop all cached artifacts and dependency edges (full rebuild).
    pub fn clear(&self) {
        self.cache.clear();
        self.graph.write().clear();
    }

    /// Compute the invalidation set for a changed file and evict it.
    ///
    /// Returns `{path} ∪ transitive_dependents(path)`, sorted - the exact
    /// set a watch-mode rebuild recompiles.
    pub fn invalidate_file(&self, path: &Path) -> Vec<PathBuf> {
        let mut set = self.graph.read().transitive_dependents(path);
        set.insert(path.to_path_buf());

        let mut files: Vec<PathBuf> = set.into_iter().collect();
        files.sort();

        for file in &files {
            self.cache.invalidate(file);
        }
        files
    }

    /// Drop a deleted file from cache and graph.
    pub fn remove_file(&self, path: &Path) {
        self.cache.invalidate(path);
        self.graph.write().remove_file(path);
    }

    // -------------------------------------------------------------------------
    // Sequential mode
    // -------------------------------------------------------------------------

    /// Compile `paths` in input order. Simple and deterministic - used for
    /// small batches and as the fallback path.
    pub fn compile_sequential(&self, paths: &[PathBuf]) -> PassReport {
        let start = Instant::now();
        let paths = dedupe(paths);
        let mut report = PassReport::default();
        report.stats.total_files = paths.len();

        for path in &paths {
            let timed = self.compile_one(path);
            let fatal = is_fatal(&timed.result);
            accumulate(&mut report, timed);
            if fatal {
                report.aborted = true;
                break;
            }
        }

        report.stats.total_duration = start.elapsed();
        report
    }

    // -------------------------------------------------------------------------
    // Parallel mode
    // -------------------------------------------------------------------------

    /// Compile `paths` in dependency-respecting parallel batches.
    ///
    /// The topological order is restricted to the requested set; each
    /// frontier (not-yet-compiled files whose dependencies are all done)
    /// fans out on the rayon pool and fully joins before the next one is
    /// computed. The pool size is the concurrency cap.
    ///
    /// A cyclic graph is an explicit error - compiling out of order on a
    /// cycle is unsafe.
    pub fn compile_parallel(&self, paths: &[PathBuf]) -> Result<PassReport, GraphError> {
        let start = Instant::now();
        let paths = dedupe(paths);
        let mut report = PassReport::default();
        report.stats.total_files = paths.len();

        // Restrict the global topological order to the requested set; files
        // the graph has never seen carry no edges and join the first frontier.
        let requested: FxHashSet<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let ordered = self.graph.read().topological_order()?;
        let mut remaining: Vec<PathBuf> = ordered
            .into_iter()
            .filter(|p| requested.contains(p.as_path()))
            .collect();
        let known: FxHashSet<&Path> = remaining.iter().map(PathBuf::as_path).collect();
        let unknown: Vec<PathBuf> = paths
            .iter()
            .filter(|p| !known.contains(p.as_path()))
            .cloned()
            .collect();
        drop(known);
        remaining.extend(unknown);

        let mut done: FxHashSet<PathBuf> = FxHashSet::default();

        while !remaining.is_empty() {
            let before_failed = report.stats.files_failed;
            let (frontier, blocked) = self.split_frontier(remaining, &mut done, &mut report);

            if frontier.is_empty() && report.stats.files_failed > before_failed {
                // Only missing-dependency failures this round; their
                // dependents may be unblocked now that they count as done.
                remaining = blocked;
                continue;
            }

            if frontier.is_empty() {
                // No frontier computable: report the rest as failed rather
                // than spinning.
                for path in blocked {
                    let dependency = self.first_unmet_dependency(&path, &done);
                    let error = CompileError::MissingDependency {
                        file: path.clone(),
                        dependency,
                    };
                    report.stats.cache_misses += 1;
                    report.stats.files_failed += 1;
                    report.results.push(FileResult::failed(&path, error));
                }
                break;
            }

            report.stats.parallel_batches += 1;
            let batch: Vec<Timed> = frontier
                .par_iter()
                .map(|path| self.compile_one(path))
                .collect();
            // par_iter + collect is the join point: the whole frontier has
            // completed (success or failure) before we advance.

            let mut fatal = false;
            for timed in batch {
                done.insert(timed.result.path.clone());
                fatal |= is_fatal(&timed.result);
                accumulate(&mut report, timed);
            }
            if fatal {
                report.aborted = true;
                break;
            }

            remaining = blocked;
        }

        report.stats.total_duration = start.elapsed();
        Ok(report)
    }

    /// Partition `remaining` into (frontier, blocked), recording
    /// missing-dependency failures directly into the report.
    fn split_frontier(
        &self,
        remaining: Vec<PathBuf>,
        done: &mut FxHashSet<PathBuf>,
        report: &mut PassReport,
    ) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let remaining_set: FxHashSet<&Path> =
            remaining.iter().map(PathBuf::as_path).collect();
        let graph = self.graph.read();

        let mut frontier = Vec::new();
        let mut blocked = Vec::new();
        let mut missing: Vec<(PathBuf, PathBuf)> = Vec::new();

        for path in &remaining {
            let mut waiting = false;
            let mut unmet = None;

            if let Some(deps) = graph.dependencies(path) {
                for dep in deps {
                    if done.contains(dep) {
                        continue;
                    }
                    if remaining_set.contains(dep.as_path()) {
                        waiting = true;
                        continue;
                    }
                    // Outside the batch: satisfied only when cached. A file
                    // whose prerequisite will never become compiled gets a
                    // per-file error instead of stalling the scheduler.
                    if self.cache.get(dep).is_some() {
                        continue;
                    }
                    unmet = Some(dep.clone());
                    break;
                }
            }

            match (unmet, waiting) {
                (Some(dep), _) => missing.push((path.clone(), dep)),
                (None, true) => blocked.push(path.clone()),
                (None, false) => frontier.push(path.clone()),
            }
        }
        drop(graph);

        for (path, dependency) in missing {
            done.insert(path.clone());
            report.stats.cache_misses += 1;
            report.stats.files_failed += 1;
            report.results.push(FileResult::failed(
                &path,
                CompileError::MissingDependency {
                    file: path.clone(),
                    dependency,
                },
            ));
        }

        (frontier, blocked)
    }

    /// First dependency of `path` that is neither done nor cached.
    fn first_unmet_dependency(&self, path: &Path, done: &FxHashSet<PathBuf>) -> PathBuf {
        self.graph
            .read()
            .dependencies(path)
            .and_then(|deps| {
                deps.iter()
                    .find(|d| !done.contains(*d) && self.cache.get(d).is_none())
                    .cloned()
            })
            .unwrap_or_else(|| path.to_path_buf())
    }

    // -------------------------------------------------------------------------
    // Per-file decision
    // -------------------------------------------------------------------------

    /// Hash → cache lookup → hit, rename recovery, or compile-and-store.
    fn compile_one(&self, path: &Path) -> Timed {
        let hash_start = Instant::now();

        let hash = match hash_file(path) {
            Ok(h) => h,
            Err(e) => {
                return Timed {
                    result: FileResult::failed(path, CompileError::Io(e)),
                    hash_time: hash_start.elapsed(),
                    compile_time: Duration::ZERO,
                };
            }
        };

        // Fresh hit: hash matches the stored entry
        if let Some(entry) = self.cache.get(path)
            && entry.hash == hash
        {
            return Timed {
                result: FileResult::hit(path, entry.unit),
                hash_time: hash_start.elapsed(),
                compile_time: Duration::ZERO,
            };
        }

        // Rename/move recovery: same content cached under another path
        if let Some((old_path, entry)) = self.cache.get_by_hash(&hash)
            && old_path != path
        {
            self.cache.insert(path, Arc::clone(&entry.unit), hash);
            self.graph.write().record(path, &entry.unit.imports);
            if !old_path.exists() {
                self.cache.invalidate(&old_path);
                self.graph.write().remove_file(&old_path);
                crate::debug!("compile"; "adopted cache entry: {} -> {}",
                    old_path.display(), path.display());
            }
            return Timed {
                result: FileResult::hit(path, entry.unit),
                hash_time: hash_start.elapsed(),
                compile_time: Duration::ZERO,
            };
        }

        let hash_time = hash_start.elapsed();
        let compile_start = Instant::now();

        let source = match fs::read(path) {
            Ok(s) => s,
            Err(e) => {
                return Timed {
                    result: FileResult::failed(path, CompileError::Io(e)),
                    hash_time,
                    compile_time: compile_start.elapsed(),
                };
            }
        };

        let result = match self.oracle.compile(&source) {
            Ok(unit) => {
                let unit = Arc::new(unit);
                self.cache.insert(path, Arc::clone(&unit), hash);
                self.graph.write().record(path, &unit.imports);
                FileResult::compiled(path, unit)
            }
            Err(e) => FileResult::failed(path, e),
        };

        Timed {
            result,
            hash_time,
            compile_time: compile_start.elapsed(),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn dedupe(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = FxHashSet::default();
    paths
        .iter()
        .filter(|p| seen.insert(p.as_path()))
        .cloned()
        .collect()
}

fn is_fatal(result: &FileResult) -> bool {
    result.error.as_ref().is_some_and(CompileError::is_fatal)
}

fn accumulate(report: &mut PassReport, timed: Timed) {
    report.stats.hash_duration += timed.hash_time;
    report.stats.compile_duration += timed.compile_time;
    match timed.result.status {
        FileStatus::CacheHit => report.stats.cache_hits += 1,
        FileStatus::Compiled => {
            report.stats.cache_misses += 1;
            report.stats.files_compiled += 1;
        }
        FileStatus::Failed => {
            report.stats.cache_misses += 1;
            report.stats.files_failed += 1;
        }
    }
    report.results.push(timed.result);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::oracle::{
        CompilePhase, CompiledUnit, Diagnostic, Resource, ResourceKind, Severity,
    };
    use std::fs;
    use tempfile::TempDir;

    /// Oracle that understands a tiny line protocol:
    /// - `import <path>` declares a dependency
    /// - `schema <name>` declares a schema resource
    /// - a line `fail-parse` / `fail-type` fails the unit
    fn test_oracle(root: PathBuf) -> impl CompileOracle {
        move |source: &[u8]| -> Result<CompiledUnit, CompileError> {
            let text = String::from_utf8_lossy(source);
            let mut unit = CompiledUnit::default();

            for line in text.lines() {
                let line = line.trim();
                if let Some(target) = line.strip_prefix("import ") {
                    unit.imports.push(root.join(target));
                } else if let Some(name) = line.strip_prefix("schema ") {
                    unit.resources.push(Resource {
                        kind: ResourceKind::Schema,
                        name: name.to_string(),
                    });
                } else if line == "fail-parse" {
                    return Err(CompileError::Parse(diag(CompilePhase::Parse)));
                } else if line == "fail-type" {
                    return Err(CompileError::Type(diag(CompilePhase::Typecheck)));
                }
            }

            unit.artifact = format!("// generated from {} bytes\n", source.len());
            Ok(unit)
        }
    }

    fn diag(phase: CompilePhase) -> Diagnostic {
        Diagnostic {
            message: "injected failure".into(),
            file: None,
            line: Some(1),
            column: Some(1),
            code: None,
            phase,
            severity: Severity::Error,
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        coordinator: Coordinator,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let coordinator = Coordinator::new(Arc::new(test_oracle(root.clone())));
        Fixture {
            _dir: dir,
            root,
            coordinator,
        }
    }

    impl Fixture {
        fn write(&self, name: &str, content: &str) -> PathBuf {
            let path = self.root.join(name);
            fs::write(&path, content).unwrap();
            path
        }
    }

    #[test]
    fn second_pass_is_all_hits() {
        let fx = fixture();
        let files: Vec<PathBuf> = (0..5)
            .map(|i| fx.write(&format!("f{i}.sm"), &format!("page P{i} {{}}")))
            .collect();

        let first = fx.coordinator.compile_sequential(&files);
        assert_eq!(first.stats.cache_misses, 5);
        assert_eq!(first.stats.files_compiled, 5);
        assert_eq!(first.stats.cache_hits, 0);

        let second = fx.coordinator.compile_sequential(&files);
        assert_eq!(second.stats.cache_hits, 5);
        assert_eq!(second.stats.cache_misses, 0);
        assert!((second.stats.hit_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hit_rate_is_zero_for_empty_pass() {
        let fx = fixture();
        let report = fx.coordinator.compile_sequential(&[]);
        assert_eq!(report.stats.hit_rate(), 0.0);
    }

    #[test]
    fn independent_files_compile_in_one_batch() {
        let fx = fixture();
        let files: Vec<PathBuf> = (0..50)
            .map(|i| fx.write(&format!("p{i}.sm"), &format!("page P{i} {{}}")))
            .collect();

        let report = fx.coordinator.compile_parallel(&files).unwrap();
        assert_eq!(report.stats.parallel_batches, 1);
        assert_eq!(report.stats.files_compiled, 50);
        assert!(report.is_success());
    }

    #[test]
    fn watch_recompile_touches_only_the_changed_file() {
        let fx = fixture();
        let files: Vec<PathBuf> = (0..50)
            .map(|i| fx.write(&format!("p{i}.sm"), &format!("page P{i} {{}}")))
            .collect();
        fx.coordinator.compile_parallel(&files).unwrap();

        // Modify exactly one file, then run the watch-mode recompile
        fx.write("p7.sm", "page P7 { changed }");
        let dirty = fx.coordinator.invalidate_file(&files[7]);
        assert_eq!(dirty, vec![files[7].clone()]);

        let report = fx.coordinator.compile_parallel(&dirty).unwrap();
        assert_eq!(report.stats.files_compiled, 1);

        // The other 49 still come straight from cache
        let full = fx.coordinator.compile_parallel(&files).unwrap();
        assert_eq!(full.stats.cache_hits, 50);
        assert_eq!(full.stats.files_compiled, 0);
    }

    #[test]
    fn invalidation_set_is_exactly_transitive_dependents() {
        let fx = fixture();
        // c imports b, b imports a; lone stands apart
        let a = fx.write("a.sm", "page A {}");
        let b = fx.write("b.sm", "import a.sm");
        let c = fx.write("c.sm", "import b.sm");
        let lone = fx.write("lone.sm", "page Lone {}");

        let all = vec![a.clone(), b.clone(), c.clone(), lone.clone()];
        fx.coordinator.compile_parallel(&all).unwrap();

        let mut expected = vec![a.clone(), b.clone(), c.clone()];
        expected.sort();
        assert_eq!(fx.coordinator.invalidate_file(&a), expected);

        // The unrelated file is untouched and still hits
        let report = fx.coordinator.compile_sequential(&[lone]);
        assert_eq!(report.stats.cache_hits, 1);
    }

    #[test]
    fn chain_compiles_in_dependency_order_batches() {
        let fx = fixture();
        let a = fx.write("a.sm", "page A {}");
        let b = fx.write("b.sm", "import a.sm");
        let c = fx.write("c.sm", "import b.sm");
        let all = vec![c.clone(), b.clone(), a.clone()];

        // First pass records the edges
        fx.coordinator.compile_parallel(&all).unwrap();

        // Invalidate the chain root and recompile: three one-file batches,
        // strictly dependency-ordered
        let dirty = fx.coordinator.invalidate_file(&a);
        let report = fx.coordinator.compile_parallel(&dirty).unwrap();
        assert_eq!(report.stats.parallel_batches, 3);
        assert_eq!(report.stats.files_compiled, 3);

        let order: Vec<_> = report.results.iter().map(|r| r.path.clone()).collect();
        let idx = |p: &PathBuf| order.iter().position(|o| o == p).unwrap();
        assert!(idx(&a) < idx(&b));
        assert!(idx(&b) < idx(&c));
    }

    #[test]
    fn parse_error_does_not_abort_siblings() {
        let fx = fixture();
        let good = fx.write("good.sm", "page Good {}");
        let bad = fx.write("bad.sm", "fail-parse");
        let also = fx.write("also.sm", "page Also {}");

        let report = fx
            .coordinator
            .compile_parallel(&[good, bad.clone(), also])
            .unwrap();

        assert!(!report.aborted);
        assert_eq!(report.stats.files_compiled, 2);
        assert_eq!(report.stats.files_failed, 1);
        let (failed_path, error) = report.first_error().unwrap();
        assert_eq!(failed_path, bad.as_path());
        assert!(matches!(error, CompileError::Parse(_)));
    }

    #[test]
    fn type_error_aborts_the_pass() {
        let fx = fixture();
        let files = vec![
            fx.write("a.sm", "fail-type"),
            fx.write("b.sm", "page B {}"),
        ];

        let report = fx.coordinator.compile_sequential(&files);
        assert!(report.aborted);
        // b was never attempted
        assert_eq!(report.results.len(), 1);
    }

    #[test]
    fn missing_out_of_batch_dependency_fails_that_file_only() {
        let fx = fixture();
        let a = fx.write("a.sm", "page A {}");
        let b = fx.write("b.sm", "import a.sm");
        fx.coordinator.compile_parallel(&[a.clone(), b.clone()]).unwrap();

        // Evict the whole chain, then request only the dependent: its
        // prerequisite is neither cached nor in the batch.
        fx.coordinator.invalidate_file(&a);
        let report = fx.coordinator.compile_parallel(&[b.clone()]).unwrap();

        assert_eq!(report.stats.files_failed, 1);
        let (path, error) = report.first_error().unwrap();
        assert_eq!(path, b.as_path());
        assert!(matches!(error, CompileError::MissingDependency { .. }));
    }

    #[test]
    fn schema_change_is_detected() {
        let fx = fixture();
        let file = fx.write("users.sm", "schema users");
        let report = fx.coordinator.compile_sequential(&[file.clone()]);
        assert!(report.schema_changed());

        // A cache hit is not a schema *change*
        let again = fx.coordinator.compile_sequential(&[file]);
        assert!(!again.schema_changed());
    }

    #[test]
    fn rename_recovers_cached_entry() {
        let fx = fixture();
        let old = fx.write("old.sm", "page Same {}");
        fx.coordinator.compile_sequential(&[old.clone()]);

        let new = fx.root.join("new.sm");
        fs::rename(&old, &new).unwrap();

        let report = fx.coordinator.compile_sequential(&[new]);
        assert_eq!(report.stats.cache_hits, 1);
        assert_eq!(report.stats.files_compiled, 0);
    }

    #[test]
    fn unreadable_file_is_io_failure() {
        let fx = fixture();
        let ghost = fx.root.join("ghost.sm");
        let report = fx.coordinator.compile_sequential(&[ghost]);
        assert_eq!(report.stats.files_failed, 1);
        assert!(matches!(
            report.first_error().unwrap().1,
            CompileError::Io(_)
        ));
    }
}
