//! File dependency graph for incremental builds.
//!
//! Maintains both forward (file → dependencies) and reverse (file →
//! dependents) adjacency sets, answering the two questions a correct
//! incremental compiler must ask:
//! - "what must be invalidated when this file changes" (reverse edges)
//! - "in what order is it safe to compile" (topological order)
//!
//! # Invariants
//! - Forward and reverse mappings are always consistent (adding A→B updates
//!   both adjacency sets)
//! - Edges are de-duplicated; self-references are excluded
//! - A cyclic graph yields an explicit error, never a partial order

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

type PathSet = FxHashSet<PathBuf>;

/// Graph failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Compiling out of order on a cyclic dependency is unsafe, so a cycle
    /// refuses to produce any order at all.
    #[error("dependency cycle among {} file(s): {}", .stuck.len(), format_paths(.stuck))]
    Cycle { stuck: Vec<PathBuf> },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-file adjacency.
#[derive(Debug, Default, Clone)]
struct Node {
    /// Files this file depends on (outgoing edges).
    depends_on: PathSet,
    /// Files depending on this file (incoming edges).
    dependents: PathSet,
}

/// Bidirectional dependency graph keyed by path.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: FxHashMap<PathBuf, Node>,
}

impl DependencyGraph {
    /// Create an empty dependency graph.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a node exists for `path` (idempotent upsert).
    pub fn add_file(&mut self, path: &Path) {
        self.nodes.entry(path.to_path_buf()).or_default();
    }

    /// Record that `file` depends on `dependency`.
    ///
    /// Both nodes are upserted and both adjacency sets updated; duplicate
    /// edges and self-references are no-ops.
    pub fn add_dependency(&mut self, file: &Path, dependency: &Path) {
        if file == dependency {
            return;
        }
        self.nodes
            .entry(file.to_path_buf())
            .or_default()
            .depends_on
            .insert(dependency.to_path_buf());
        self.nodes
            .entry(dependency.to_path_buf())
            .or_default()
            .dependents
            .insert(file.to_path_buf());
    }

    /// Replace the full dependency set of `file`.
    ///
    /// Stale edges from a previous compile are removed first so the graph
    /// tracks what the file imports now, not what it ever imported.
    pub fn record(&mut self, file: &Path, dependencies: &[PathBuf]) {
        self.clear_outgoing(file);
        self.add_file(file);
        for dep in dependencies {
            self.add_dependency(file, dep);
        }
    }

    /// Direct dependencies of `file` (O(1) lookup).
    #[inline]
    pub fn dependencies(&self, file: &Path) -> Option<&PathSet> {
        self.nodes.get(file).map(|n| &n.depends_on)
    }

    /// Direct dependents of `file` (O(1) lookup).
    #[inline]
    pub fn dependents(&self, file: &Path) -> Option<&PathSet> {
        self.nodes.get(file).map(|n| &n.dependents)
    }

    /// All files transitively depending on `file`: the invalidation set for
    /// a change to it (exclusive of `file` itself).
    ///
    /// Cycle-safe DFS over reverse edges.
    pub fn transitive_dependents(&self, file: &Path) -> PathSet {
        let mut seen = PathSet::default();
        let mut stack: Vec<&Path> = Vec::new();

        if let Some(node) = self.nodes.get(file) {
            stack.extend(node.dependents.iter().map(PathBuf::as_path));
        }

        while let Some(current) = stack.pop() {
            if !seen.insert(current.to_path_buf()) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                for dependent in &node.dependents {
                    if !seen.contains(dependent) {
                        stack.push(dependent);
                    }
                }
            }
        }

        seen
    }

    /// Files with no outgoing edges: the initial parallel frontier.
    pub fn independent_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.depends_on.is_empty())
            .map(|(path, _)| path.clone())
            .collect();
        files.sort();
        files
    }

    /// Topological order via Kahn's algorithm: every dependency strictly
    /// before its dependents.
    ///
    /// Returns `GraphError::Cycle` when the processed count falls short of
    /// the node count, listing the stuck files.
    pub fn topological_order(&self) -> Result<Vec<PathBuf>, GraphError> {
        let mut in_degree: FxHashMap<&Path, usize> = self
            .nodes
            .iter()
            .map(|(path, node)| (path.as_path(), node.depends_on.len()))
            .collect();

        // Deterministic start: zero-degree nodes in path order
        let mut ready: Vec<&Path> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(path, _)| *path)
            .collect();
        ready.sort_unstable();
        let mut queue: VecDeque<&Path> = ready.into();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(path) = queue.pop_front() {
            order.push(path.to_path_buf());

            let Some(node) = self.nodes.get(path) else {
                continue;
            };
            for dependent in &node.dependents {
                let Some(degree) = in_degree.get_mut(dependent.as_path()) else {
                    continue;
                };
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent.as_path());
                }
            }
        }

        if order.len() < self.nodes.len() {
            let mut stuck: Vec<PathBuf> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(path, _)| path.to_path_buf())
                .collect();
            stuck.sort();
            return Err(GraphError::Cycle { stuck });
        }

        Ok(order)
    }

    /// Remove a file and prune dangling references in O(degree).
    pub fn remove_file(&mut self, path: &Path) {
        let Some(node) = self.nodes.remove(path) else {
            return;
        };
        for dep in &node.depends_on {
            if let Some(n) = self.nodes.get_mut(dep) {
                n.dependents.remove(path);
            }
        }
        for dependent in &node.dependents {
            if let Some(n) = self.nodes.get_mut(dependent) {
                n.depends_on.remove(path);
            }
        }
    }

    /// Number of tracked files.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop all nodes and edges.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Remove all outgoing edges of `file`, cleaning up reverse references.
    fn clear_outgoing(&mut self, file: &Path) {
        let Some(node) = self.nodes.get_mut(file) else {
            return;
        };
        let old_deps = std::mem::take(&mut node.depends_on);
        for dep in old_deps {
            if let Some(n) = self.nodes.get_mut(&dep) {
                n.dependents.remove(file);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
