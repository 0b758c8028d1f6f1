//! Raw event filtering: decide which filesystem paths are worth debouncing.
//!
//! Runs before the debouncer, so editor noise never resets the quiet window.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::config::DevConfig;
use crate::util::path::extension_lower;

/// Static path filter built once from config.
pub struct EventFilter {
    /// The build output directory (never watched for rebuilds).
    output_dir: PathBuf,
    /// The config file is always interesting, whatever its extension.
    config_path: PathBuf,
    /// Configured ignore globs.
    ignore: Vec<glob::Pattern>,
    /// Extension allow-list (lowercase, no dot).
    extensions: FxHashSet<String>,
}

impl EventFilter {
    pub fn new(config: &DevConfig) -> Self {
        let ignore = config
            .watch
            .ignore
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    crate::log!("watch"; "invalid ignore glob `{}`: {}", pattern, e);
                    None
                }
            })
            .collect();

        Self {
            output_dir: config.output_dir(),
            config_path: config.config_path.clone(),
            ignore,
            extensions: config
                .watch
                .extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    /// True when the path should reach the debouncer.
    pub fn accepts(&self, path: &Path) -> bool {
        if path == self.config_path {
            return true;
        }
        if path.starts_with(&self.output_dir) {
            return false;
        }
        if is_hidden(path) || is_temp_file(path) {
            return false;
        }
        if self.ignore.iter().any(|p| p.matches_path(path)) {
            return false;
        }
        self.extensions.contains(&extension_lower(path))
    }
}

/// Any hidden component (dot-prefixed) hides the whole path.
fn is_hidden(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| s.starts_with('.') && s != "." && s != "..")
    })
}

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevConfig;

    fn filter() -> (EventFilter, PathBuf) {
        let mut config = DevConfig::default();
        config.root = PathBuf::from("/proj");
        config.config_path = PathBuf::from("/proj/smelt.toml");
        config.watch.ignore = vec!["**/vendor/**".into()];
        let root = config.root.clone();
        (EventFilter::new(&config), root)
    }

    #[test]
    fn accepts_watched_extensions() {
        let (f, root) = filter();
        assert!(f.accepts(&root.join("app/users.sm")));
        assert!(f.accepts(&root.join("pages/index.html")));
        assert!(f.accepts(&root.join("assets/site.css")));
    }

    #[test]
    fn rejects_unknown_extensions() {
        let (f, root) = filter();
        assert!(!f.accepts(&root.join("app/users.rs")));
        assert!(!f.accepts(&root.join("README.md")));
    }

    #[test]
    fn rejects_output_dir() {
        let (f, root) = filter();
        assert!(!f.accepts(&root.join("gen/users.sm")));
    }

    #[test]
    fn rejects_hidden_and_temp_files() {
        let (f, root) = filter();
        assert!(!f.accepts(&root.join(".git/config.toml")));
        assert!(!f.accepts(&root.join("app/.users.sm.swp")));
        assert!(!f.accepts(&root.join("app/users.sm~")));
        assert!(!f.accepts(&root.join("app/users.sm.bak")));
    }

    #[test]
    fn rejects_ignore_globs() {
        let (f, root) = filter();
        assert!(!f.accepts(&root.join("app/vendor/lib.sm")));
    }

    #[test]
    fn config_file_always_accepted() {
        let (f, _) = filter();
        assert!(f.accepts(Path::new("/proj/smelt.toml")));
    }
}
