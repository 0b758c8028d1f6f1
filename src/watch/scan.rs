//! Initial source scan for the first full build.

use jwalk::WalkDir;
use std::path::PathBuf;

use crate::config::DevConfig;
use crate::util::path::extension_lower;

/// Collect every Smelt source under the source directory, sorted for a
/// deterministic first pass.
pub fn scan_sources(config: &DevConfig) -> Vec<PathBuf> {
    let source_dir = config.source_dir();
    if !source_dir.is_dir() {
        return Vec::new();
    }

    let mut sources: Vec<PathBuf> = WalkDir::new(&source_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|p| extension_lower(p) == "sm")
        .collect();
    sources.sort();
    sources
}
