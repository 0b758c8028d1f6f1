//! Incremental compilation engine.
//!
//! Leaf to root:
//! - `hash` - content digests for change detection
//! - `cache` - compiled artifacts keyed by path and content hash
//! - `graph` - file dependency graph (invalidation + safe compile order)
//! - `oracle` - the front-end compiler seam
//! - `coordinator` - drives all of the above in dependency-respecting batches

pub mod cache;
pub mod coordinator;
pub mod graph;
pub mod hash;
pub mod oracle;

pub use cache::{AstCache, CacheEntry};
pub use coordinator::{CompileStats, Coordinator, FileResult, FileStatus, PassReport};
pub use graph::{DependencyGraph, GraphError};
pub use hash::{ContentHash, hash_bytes, hash_file};
pub use oracle::{
    CompileError, CompileOracle, CompilePhase, CompiledUnit, Diagnostic, ProcessOracle, Resource,
    ResourceKind, Severity,
};
