//! `[migrate]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [migrate]
//! command = ["smeltc", "migrate"]
//! auto_apply = true       # apply non-breaking migrations without prompting
//! ```

use serde::{Deserialize, Serialize};

/// Migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Migration tool invocation. `status --json` and `apply` subcommands
    /// are appended by the dev server.
    pub command: Vec<String>,

    /// Apply non-breaking pending migrations without prompting.
    /// Breaking migrations always require explicit confirmation.
    pub auto_apply: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            command: vec!["smeltc".into(), "migrate".into()],
            auto_apply: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_migrate_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.migrate.command, vec!["smeltc", "migrate"]);
        assert!(!config.migrate.auto_apply);
    }

    #[test]
    fn test_migrate_auto_apply() {
        let config = test_parse_config("[migrate]\nauto_apply = true");
        assert!(config.migrate.auto_apply);
    }
}
