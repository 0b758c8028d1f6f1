//! `[build]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [build]
//! source_dir = "app"                      # Smelt sources (.sm)
//! output_dir = "gen"                      # Generated backend code
//! compiler = ["smeltc"]                   # Front-end compiler
//! command = ["smeltc", "build"]           # Binary build step
//! run = ["./bin/app"]                     # Application start command
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Toolchain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory containing `.sm` sources, relative to the project root.
    pub source_dir: PathBuf,

    /// Directory receiving generated backend artifacts.
    pub output_dir: PathBuf,

    /// Front-end compiler invocation (the compile oracle).
    pub compiler: Vec<String>,

    /// Binary build command, run after a successful compile pass.
    pub command: Vec<String>,

    /// Application start command.
    pub run: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("app"),
            output_dir: PathBuf::from("gen"),
            compiler: vec!["smeltc".into()],
            command: vec!["smeltc".into(), "build".into()],
            run: vec!["./bin/app".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;
    use std::path::PathBuf;

    #[test]
    fn test_build_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.build.source_dir, PathBuf::from("app"));
        assert_eq!(config.build.output_dir, PathBuf::from("gen"));
        assert_eq!(config.build.compiler, vec!["smeltc"]);
    }

    #[test]
    fn test_build_override() {
        let config = test_parse_config(
            "[build]\nsource_dir = \"src\"\ncommand = [\"make\", \"app\"]",
        );
        assert_eq!(config.build.source_dir, PathBuf::from("src"));
        assert_eq!(config.build.command, vec!["make", "app"]);
        // untouched fields keep defaults
        assert_eq!(config.build.run, vec!["./bin/app"]);
    }
}
