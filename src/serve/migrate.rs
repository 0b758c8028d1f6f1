//! Migration gate for schema-affecting rebuilds.
//!
//! Diff and SQL generation belong to the external migration tool; this
//! module only asks it for a plan and decides whether the app may restart.
//! Non-breaking migrations auto-apply (when configured); breaking or
//! data-loss migrations require explicit confirmation - safety over speed.

use serde::Deserialize;
use thiserror::Error;

use crate::config::DevConfig;
use crate::util::exec::Cmd;

/// One pending migration from the tool's plan.
#[derive(Debug, Clone, Deserialize)]
pub struct Migration {
    pub name: String,
    /// Changes existing columns/tables in an incompatible way.
    #[serde(default)]
    pub breaking: bool,
    /// Drops data.
    #[serde(default)]
    pub destructive: bool,
}

impl Migration {
    /// Anything that can lose data or break the running schema.
    pub fn needs_confirmation(&self) -> bool {
        self.breaking || self.destructive
    }
}

/// The tool's `status --json` reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationPlan {
    #[serde(default)]
    pub pending: Vec<Migration>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn has_breaking(&self) -> bool {
        self.pending.iter().any(Migration::needs_confirmation)
    }
}

/// How the migration gate resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Nothing pending; restart may proceed.
    UpToDate,
    /// Applied this many migrations; restart may proceed.
    Applied(usize),
    /// Restart is blocked until the user resolves migrations.
    Blocked(String),
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("migration tool failed: {0}")]
    Tool(String),
    #[error("malformed migration plan: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Ask the tool for its pending-migration plan.
pub fn check_plan(config: &DevConfig) -> Result<MigrationPlan, MigrateError> {
    let output = Cmd::from_slice(&config.migrate.command)
        .args(["status", "--json"])
        .cwd(&config.root)
        .filter(&crate::util::exec::SILENT_FILTER)
        .run()
        .map_err(|e| MigrateError::Tool(format!("{e:#}")))?;

    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Apply all pending migrations.
fn apply(config: &DevConfig) -> Result<(), MigrateError> {
    Cmd::from_slice(&config.migrate.command)
        .arg("apply")
        .cwd(&config.root)
        .run()
        .map(|_| ())
        .map_err(|e| MigrateError::Tool(format!("{e:#}")))
}

/// Run the full gate: plan → confirm if needed → apply.
pub fn resolve(config: &DevConfig) -> Result<MigrationOutcome, MigrateError> {
    let plan = check_plan(config)?;
    if plan.is_empty() {
        return Ok(MigrationOutcome::UpToDate);
    }

    let count = plan.pending.len();
    if plan.has_breaking() {
        let names: Vec<&str> = plan
            .pending
            .iter()
            .filter(|m| m.needs_confirmation())
            .map(|m| m.name.as_str())
            .collect();

        if !confirm_breaking(&names) {
            return Ok(MigrationOutcome::Blocked(format!(
                "breaking migration(s) not confirmed: {}",
                names.join(", ")
            )));
        }
    } else if !config.migrate.auto_apply && !confirm_pending(count) {
        return Ok(MigrationOutcome::Blocked(format!(
            "{count} pending migration(s) not applied"
        )));
    }

    crate::log!("migrate"; "applying {} migration(s)", count);
    apply(config)?;
    Ok(MigrationOutcome::Applied(count))
}

/// Prompt for breaking migrations; defaults to *no*, and a non-interactive
/// terminal always blocks.
fn confirm_breaking(names: &[&str]) -> bool {
    dialoguer::Confirm::new()
        .with_prompt(format!(
            "Apply breaking migration(s) {}? This may lose data",
            names.join(", ")
        ))
        .default(false)
        .interact()
        .unwrap_or(false)
}

/// Prompt for plain pending migrations; defaults to *yes*.
fn confirm_pending(count: usize) -> bool {
    dialoguer::Confirm::new()
        .with_prompt(format!("Apply {count} pending migration(s)?"))
        .default(true)
        .interact()
        .unwrap_or(false)
}

// =============================================================================
// Tests
// =============================================================================
