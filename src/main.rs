//! Smelt - incremental build engine and live-reload dev server for the
//! Smelt toolchain.

#![allow(dead_code)]

mod compile;
mod config;
mod core;
mod embed;
mod impact;
mod logger;
mod reload;
mod serve;
mod util;
mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{ColorChoice, Parser, Subcommand};

use compile::{Coordinator, ProcessOracle};
use config::DevConfig;

#[derive(Parser)]
#[command(name = "smelt", version, about = "Smelt development tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show debug output
    #[arg(long, global = true)]
    verbose: bool,

    /// Color output
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Path to smelt.toml (defaults to searching upward from the cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dev server: watch, rebuild, live-reload
    Dev,
    /// Compile all sources and build the binary once
    Build,
}

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();
    logger::set_verbose(cli.verbose);

    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    let config = match &cli.config {
        Some(path) => DevConfig::load_from(path)?,
        None => DevConfig::load(&std::env::current_dir()?)?,
    };
    let config = config::init_config(config);

    match cli.command {
        Commands::Dev => serve::serve(config),
        Commands::Build => build_once(&config),
    }
}

// =============================================================================
// Build Command
// =============================================================================

/// One-shot compile of every source plus the binary build step.
fn build_once(config: &DevConfig) -> Result<()> {
    let oracle = ProcessOracle::new(&config.build.compiler, &config.root)?;
    let coordinator = Coordinator::new(Arc::new(oracle));

    let sources = watch::scan_sources(config);
    log!("build"; "compiling {} source file(s)", sources.len());

    let report = coordinator.compile_parallel(&sources)?;
    for result in &report.results {
        if let Some(error) = &result.error {
            log!("error"; "{}: {}", result.path.display(), error);
        }
    }
    if !report.is_success() {
        anyhow::bail!("{} file(s) failed to compile", report.stats.files_failed);
    }

    log!("build"; "{} compiled, {} cached ({:.0}% hit rate) in {}ms across {} batch(es)",
        report.stats.files_compiled,
        report.stats.cache_hits,
        report.stats.hit_rate(),
        report.stats.total_duration.as_millis(),
        report.stats.parallel_batches);

    util::exec::Cmd::from_slice(&config.build.command)
        .cwd(&config.root)
        .run()?;
    log!("build"; "done");
    Ok(())
}
