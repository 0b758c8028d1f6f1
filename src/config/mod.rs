//! Project configuration management for `smelt.toml`.
//!
//! # Sections
//!
//! | Section     | Purpose                                          |
//! |-------------|--------------------------------------------------|
//! | `[build]`   | Toolchain commands, source/output directories    |
//! | `[serve]`   | Development server ports and interface           |
//! | `[watch]`   | Watched directories, ignore globs, extensions    |
//! | `[migrate]` | Migration tool command and auto-apply policy     |

mod handle;
pub mod section;

pub use handle::{cfg, init_config, reload_config};
pub use section::{BuildConfig, MigrateConfig, ServeConfig, WatchConfig};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Config file name searched upward from the working directory.
pub const CONFIG_FILE: &str = "smelt.toml";

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing smelt.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Toolchain settings
    pub build: BuildConfig,

    /// Development server settings
    pub serve: ServeConfig,

    /// File watcher settings
    pub watch: WatchConfig,

    /// Migration settings
    pub migrate: MigrateConfig,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            root: PathBuf::new(),
            build: BuildConfig::default(),
            serve: ServeConfig::default(),
            watch: WatchConfig::default(),
            migrate: MigrateConfig::default(),
        }
    }
}

impl DevConfig {
    /// Load configuration from `smelt.toml`, searching upward from `start`.
    ///
    /// A missing file yields the default configuration rooted at `start`
    /// so `smelt dev` works in a freshly scaffolded project.
    pub fn load(start: &Path) -> Result<Self> {
        let Some(config_path) = find_config_file(start, CONFIG_FILE) else {
            let mut config = Self::default();
            config.root = crate::util::path::normalize_path(start);
            config.config_path = config.root.join(CONFIG_FILE);
            return Ok(config);
        };

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit config file path.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_path = crate::util::path::normalize_path(config_path);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let Some(root) = config_path.parent() else {
            bail!("config file has no parent directory");
        };
        config.root = root.to_path_buf();
        config.config_path = config_path;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check values that would silently break the dev loop.
    fn validate(&self) -> Result<()> {
        if self.build.compiler.is_empty() {
            bail!("[build] compiler command must not be empty");
        }
        if self.serve.port == self.serve.app_port {
            bail!(
                "[serve] port and app_port must differ (both are {})",
                self.serve.port
            );
        }
        Ok(())
    }

    /// Absolute path of the source directory.
    pub fn source_dir(&self) -> PathBuf {
        self.root.join(&self.build.source_dir)
    }

    /// Absolute path of the generated-output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.build.output_dir)
    }

    /// Absolute path of the config directory (`config/` under the root).
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// Absolute watch roots derived from `[watch] paths`.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.watch
            .paths
            .iter()
            .map(|p| {
                let expanded = shellexpand::tilde(p);
                let path = Path::new(expanded.as_ref());
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.root.join(path)
                }
            })
            .collect()
    }
}

/// Find config file by searching upward from `start`.
///
/// Walks up parent directories until finding `name`, returning its
/// absolute path.
fn find_config_file(start: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = crate::util::path::normalize_path(start);
    loop {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) fn test_parse_config(content: &str) -> DevConfig {
    toml::from_str(content).expect("test config should parse")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_config_file() {
        let dir = TempDir::new().unwrap();
        let config = DevConfig::load(dir.path()).unwrap();
        assert_eq!(config.build.source_dir, PathBuf::from("app"));
        assert!(config.config_path.ends_with(CONFIG_FILE));
    }

    #[test]
    fn upward_search_finds_config() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("smelt.toml"), "[serve]\nport = 9000").unwrap();
        let nested = dir.path().join("app/pages");
        fs::create_dir_all(&nested).unwrap();

        let config = DevConfig::load(&nested).unwrap();
        assert_eq!(config.serve.port, 9000);
        assert_eq!(
            config.root,
            crate::util::path::normalize_path(dir.path())
        );
    }

    #[test]
    fn port_collision_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("smelt.toml"),
            "[serve]\nport = 8080\napp_port = 8080",
        )
        .unwrap();
        assert!(DevConfig::load(dir.path()).is_err());
    }

    #[test]
    fn watch_roots_are_rooted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("smelt.toml"), "").unwrap();
        let config = DevConfig::load(dir.path()).unwrap();

        for root in config.watch_roots() {
            assert!(root.is_absolute());
            assert!(root.starts_with(&config.root));
        }
    }
}
