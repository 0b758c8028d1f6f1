//! Change impact analysis.
//!
//! Pure functions mapping a debounced batch of changed files to a severity
//! scope and rebuild/restart requirements. No actor machinery, no side
//! effects.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::DevConfig;
use crate::util::path::extension_lower;

/// Severity tier of a change. Ordering is significant:
/// a config change invalidates assumptions baked into both the compiled
/// backend and the running process, so `Config > Backend > Ui`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeScope {
    Ui,
    Backend,
    Config,
}

impl std::fmt::Display for ChangeScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ui => write!(f, "ui"),
            Self::Backend => write!(f, "backend"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// What a changed-file batch requires of the dev loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeImpact {
    /// Maximum severity over all files in the batch.
    pub scope: ChangeScope,
    /// Backend sources must recompile.
    pub requires_rebuild: bool,
    /// The application process must restart.
    pub requires_restart: bool,
    /// Backend files affected, relative to the project root.
    pub resources: Vec<String>,
}

/// Classify a single file.
pub fn classify_file(path: &Path, config: &DevConfig) -> ChangeScope {
    if path == config.config_path
        || path.starts_with(config.config_dir())
        || matches!(extension_lower(path).as_str(), "toml" | "env")
    {
        return ChangeScope::Config;
    }

    // Smelt sources and generated backend artifacts both mean backend work
    if extension_lower(path) == "sm" || path.starts_with(config.output_dir()) {
        return ChangeScope::Backend;
    }

    // Assets and UI templates (html/css/js/images)
    ChangeScope::Ui
}

/// Classify a changed-file batch.
///
/// Batch scope is the maximum severity across all files; rebuild/restart
/// flags follow the scope.
pub fn analyze(paths: &[PathBuf], config: &DevConfig) -> ChangeImpact {
    let mut scope = ChangeScope::Ui;
    let mut resources = Vec::new();

    for path in paths {
        let file_scope = classify_file(path, config);
        if file_scope == ChangeScope::Backend {
            let relative = path
                .strip_prefix(&config.root)
                .unwrap_or(path)
                .display()
                .to_string();
            resources.push(relative);
        }
        scope = scope.max(file_scope);
    }
    resources.sort();

    ChangeImpact {
        scope,
        requires_rebuild: scope >= ChangeScope::Backend,
        requires_restart: scope >= ChangeScope::Backend,
        resources,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DevConfig {
        let mut config = DevConfig::default();
        config.root = PathBuf::from("/proj");
        config.config_path = PathBuf::from("/proj/smelt.toml");
        config
    }

    #[test]
    fn scope_ordering_is_severity() {
        assert!(ChangeScope::Ui < ChangeScope::Backend);
        assert!(ChangeScope::Backend < ChangeScope::Config);
    }

    #[test]
    fn classifies_each_category() {
        let cfg = config();
        assert_eq!(
            classify_file(Path::new("/proj/assets/site.css"), &cfg),
            ChangeScope::Ui
        );
        assert_eq!(
            classify_file(Path::new("/proj/pages/index.html"), &cfg),
            ChangeScope::Ui
        );
        assert_eq!(
            classify_file(Path::new("/proj/app/users.sm"), &cfg),
            ChangeScope::Backend
        );
        assert_eq!(
            classify_file(Path::new("/proj/gen/users.go.html"), &cfg),
            ChangeScope::Backend
        );
        assert_eq!(
            classify_file(Path::new("/proj/smelt.toml"), &cfg),
            ChangeScope::Config
        );
        assert_eq!(
            classify_file(Path::new("/proj/config/database.env"), &cfg),
            ChangeScope::Config
        );
    }

    #[test]
    fn batch_scope_is_max_severity() {
        let cfg = config();
        let ui = PathBuf::from("/proj/assets/site.css");
        let backend = PathBuf::from("/proj/app/users.sm");
        let config_file = PathBuf::from("/proj/smelt.toml");

        let impact = analyze(&[ui.clone()], &cfg);
        assert_eq!(impact.scope, ChangeScope::Ui);
        assert!(!impact.requires_rebuild);
        assert!(!impact.requires_restart);

        let impact = analyze(&[ui.clone(), backend.clone()], &cfg);
        assert_eq!(impact.scope, ChangeScope::Backend);
        assert!(impact.requires_rebuild);
        assert!(impact.requires_restart);

        let impact = analyze(&[ui, backend, config_file], &cfg);
        assert_eq!(impact.scope, ChangeScope::Config);
        assert!(impact.requires_restart);
    }

    #[test]
    fn backend_files_are_recorded_as_resources() {
        let cfg = config();
        let impact = analyze(
            &[
                PathBuf::from("/proj/app/users.sm"),
                PathBuf::from("/proj/assets/site.css"),
                PathBuf::from("/proj/app/orders.sm"),
            ],
            &cfg,
        );
        assert_eq!(impact.resources, vec!["app/orders.sm", "app/users.sm"]);
    }

    #[test]
    fn scope_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChangeScope::Backend).unwrap(),
            "\"backend\""
        );
    }
}
