//! `[watch]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [watch]
//! paths = ["app", "pages", "assets", "config"]
//! ignore = ["**/node_modules/**", "**/*.log"]
//! extensions = ["sm", "html", "css", "js", "toml", "env", "sql"]
//! debounce_ms = 300
//! ```

use serde::{Deserialize, Serialize};

/// File watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Candidate directories to watch, relative to the project root.
    /// Missing directories are skipped at attach time.
    pub paths: Vec<String>,

    /// Glob patterns for paths to ignore.
    pub ignore: Vec<String>,

    /// Extension allow-list for watched files (lowercase, no dot).
    pub extensions: Vec<String>,

    /// Quiet window after the last file event before a rebuild triggers.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: ["app", "pages", "assets", "config"]
                .map(String::from)
                .to_vec(),
            ignore: vec!["**/node_modules/**".into(), "**/.git/**".into()],
            extensions: ["sm", "html", "css", "js", "toml", "env", "sql"]
                .map(String::from)
                .to_vec(),
            debounce_ms: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_watch_defaults() {
        let config = test_parse_config("");
        assert!(config.watch.paths.contains(&"app".to_string()));
        assert!(config.watch.extensions.contains(&"sm".to_string()));
        assert_eq!(config.watch.debounce_ms, 300);
    }

    #[test]
    fn test_watch_override() {
        let config = test_parse_config(
            "[watch]\npaths = [\"src\"]\nignore = [\"**/*.tmp\"]\ndebounce_ms = 50",
        );
        assert_eq!(config.watch.paths, vec!["src"]);
        assert_eq!(config.watch.ignore, vec!["**/*.tmp"]);
        assert_eq!(config.watch.debounce_ms, 50);
    }
}
