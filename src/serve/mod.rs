//! Development server orchestration.
//!
//! Drives the full cycle: watch → compile → build binary → check migrations
//! → restart app → notify browsers.
//!
//! ```text
//! Idle → Building → (BinaryBuild → MigrationCheck → {Restarting
//!       | BlockedOnMigration}) → Idle
//!    or → Failed → Idle          (no restart, errors surfaced)
//! ```
//!
//! Overlapping cycles are *prevented*, not cancelled: a mutex-guarded
//! building flag drops triggers that arrive mid-build, because the in-flight
//! build already captured the latest debounced set.

pub mod migrate;
pub mod process;
pub mod proxy;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::compile::{CompileOracle, Coordinator, GraphError, PassReport, ProcessOracle};
use crate::config::{DevConfig, cfg};
use crate::impact::{self, ChangeScope};
use crate::logger;
use crate::reload::{HubHandle, RELOAD_ENDPOINT, ReloadHub, ReloadMessage, start_reload_server};
use crate::watch::{ChangeKind, WatchActor, WatchBatch, scan_sources};
use crate::{debug, log};

use migrate::MigrationOutcome;
use process::AppProcess;

/// Batches at or below this size take the sequential fallback path.
const SEQUENTIAL_THRESHOLD: usize = 2;

/// Cache entries idle longer than this are pruned after a cycle.
const CACHE_MAX_AGE: Duration = Duration::from_secs(30 * 60);

// =============================================================================
// State machine
// =============================================================================

/// Where the rebuild cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Building,
    BinaryBuild,
    MigrationCheck,
    Restarting,
    BlockedOnMigration,
    Failed,
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::BinaryBuild => "binary-build",
            Self::MigrationCheck => "migration-check",
            Self::Restarting => "restarting",
            Self::BlockedOnMigration => "blocked-on-migration",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// DevServer
// =============================================================================

/// Owns the build session: coordinator (cache + graph), reload hub handle,
/// and the application process.
pub struct DevServer {
    coordinator: Coordinator,
    hub: HubHandle,
    /// The watcher path, the restart path and the exit monitor all touch
    /// the process handle concurrently.
    app: Mutex<AppProcess>,
    /// Overlapping-rebuild guard.
    building: Mutex<bool>,
    state: Mutex<BuildState>,
    /// False until a full pass has succeeded; a failed initial build makes
    /// the next change retry everything instead of just the dirty set.
    healthy: AtomicBool,
}

impl DevServer {
    pub fn new(config: Arc<DevConfig>, oracle: Arc<dyn CompileOracle>, hub: HubHandle) -> Self {
        let app = AppProcess::new(&config.build.run, &config.root);
        Self {
            coordinator: Coordinator::new(oracle),
            hub,
            app: Mutex::new(app),
            building: Mutex::new(false),
            state: Mutex::new(BuildState::Idle),
            healthy: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> BuildState {
        *self.state.lock()
    }

    fn set_state(&self, next: BuildState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("serve"; "state: {} -> {}", state, next);
            *state = next;
        }
    }

    // -------------------------------------------------------------------------
    // Initial build
    // -------------------------------------------------------------------------

    /// Full first pass: compile everything, build the binary, resolve
    /// migrations, start the app. Marks the proxy serving either way - on
    /// failure the browser shows the error overlay and the next file change
    /// retries.
    pub fn initial_build(&self) {
        let config = cfg();
        let start = Instant::now();

        *self.building.lock() = true;
        let sources = scan_sources(&config);
        log!("build"; "compiling {} source file(s)", sources.len());

        self.set_state(BuildState::Building);
        let ok = match self.compile(&sources) {
            Ok(report) if report.is_success() => self.finish_backend(&config),
            Ok(report) => {
                self.report_compile_failure(&report);
                false
            }
            Err(cycle) => {
                self.fail(cycle.to_string());
                false
            }
        };

        if ok {
            self.healthy.store(true, Ordering::SeqCst);
            log!("serve"; "ready in {}ms", start.elapsed().as_millis());
        }

        *self.building.lock() = false;
        crate::core::set_serving();
    }

    // -------------------------------------------------------------------------
    // Watch-mode cycle
    // -------------------------------------------------------------------------

    /// Entry point for each debounced batch.
    pub fn handle_batch(&self, batch: WatchBatch) {
        {
            let mut building = self.building.lock();
            if *building {
                debug!("serve"; "rebuild in progress, trigger dropped");
                return;
            }
            *building = true;
        }

        self.run_cycle(&batch);
        *self.building.lock() = false;
    }

    fn run_cycle(&self, batch: &WatchBatch) {
        let start = Instant::now();
        let config = cfg();
        let paths = batch.paths();
        let impact = impact::analyze(&paths, &config);

        self.set_state(BuildState::Building);
        logger::status_progress(&format!(
            "{} file(s) changed ({})",
            paths.len(),
            impact.scope
        ));
        let files = paths.iter().map(|p| rel(p, &config.root)).collect();
        self.hub.broadcast(ReloadMessage::building(files));

        // What must recompile
        let dirty = match self.dirty_set(batch, &impact, &config) {
            Ok(dirty) => dirty,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        let mut schema_changed = false;
        if !dirty.is_empty() {
            let report = match self.compile(&dirty) {
                Ok(r) => r,
                Err(cycle) => {
                    self.fail(cycle.to_string());
                    return;
                }
            };
            if !report.is_success() {
                self.report_compile_failure(&report);
                return;
            }
            debug!("build"; "{} compiled, {} cached, hit rate {:.0}% in {} batch(es)",
                report.stats.files_compiled, report.stats.cache_hits,
                report.stats.hit_rate(), report.stats.parallel_batches);
            schema_changed = report.schema_changed();
        }

        // UI-only changes skip the binary and the restart entirely
        if impact.requires_rebuild {
            self.set_state(BuildState::BinaryBuild);
            if let Err(e) = self.build_binary(&config) {
                self.fail(format!("build failed: {e:#}"));
                return;
            }

            self.set_state(BuildState::MigrationCheck);
            if schema_changed || impact.scope == ChangeScope::Config {
                match migrate::resolve(&config) {
                    Ok(MigrationOutcome::UpToDate) => {}
                    Ok(MigrationOutcome::Applied(n)) => {
                        log!("migrate"; "applied {} migration(s)", n);
                    }
                    Ok(MigrationOutcome::Blocked(reason)) => {
                        // No restart: the running process keeps its old,
                        // consistent schema
                        self.set_state(BuildState::BlockedOnMigration);
                        logger::status_warning(&format!("restart blocked: {reason}"));
                        self.hub
                            .broadcast(ReloadMessage::error_text(format!(
                                "restart blocked: {reason}"
                            )));
                        self.set_state(BuildState::Idle);
                        return;
                    }
                    Err(e) => {
                        self.fail(e.to_string());
                        return;
                    }
                }
            }

            if impact.requires_restart {
                self.set_state(BuildState::Restarting);
                if let Err(e) = self.app.lock().restart() {
                    self.fail(format!("restart failed: {e:#}"));
                    return;
                }
            }
        }

        let elapsed = start.elapsed();
        self.hub.broadcast(ReloadMessage::success(elapsed));
        self.hub.broadcast(ReloadMessage::reload(impact.scope));
        logger::status_success(&format!("rebuilt in {}ms", elapsed.as_millis()));
        self.healthy.store(true, Ordering::SeqCst);
        self.set_state(BuildState::Idle);

        // Bound memory across long watch sessions
        let pruned = self.coordinator.prune_cache(CACHE_MAX_AGE);
        if pruned > 0 {
            debug!("build"; "pruned {} stale cache entries", pruned);
        }
    }

    /// Resolve the set of files this batch forces through the compiler.
    fn dirty_set(
        &self,
        batch: &WatchBatch,
        impact: &impact::ChangeImpact,
        config: &DevConfig,
    ) -> Result<Vec<PathBuf>, String> {
        // A failed build leaves unknown holes: retry everything
        if !self.healthy.load(Ordering::SeqCst) {
            debug!("build"; "previous build unhealthy, full retry");
            return Ok(scan_sources(config));
        }

        if impact.scope == ChangeScope::Config {
            // Config invalidates assumptions baked into every compiled
            // artifact: reload it and start the session over
            match crate::config::reload_config() {
                Ok(true) => log!("serve"; "configuration reloaded"),
                Ok(false) => {}
                Err(e) => return Err(format!("config reload failed: {e:#}")),
            }
            self.coordinator.clear();
            return Ok(scan_sources(&cfg()));
        }

        let mut set = FxHashSet::default();
        for (path, kind) in &batch.changes {
            if crate::util::path::extension_lower(path) != "sm" {
                continue;
            }
            match kind {
                ChangeKind::Removed => {
                    // Dependents must recompile; the file itself is gone
                    for file in self.coordinator.invalidate_file(path) {
                        if &file != path {
                            set.insert(file);
                        }
                    }
                    self.coordinator.remove_file(path);
                }
                _ => set.extend(self.coordinator.invalidate_file(path)),
            }
        }

        let mut dirty: Vec<PathBuf> = set.into_iter().collect();
        dirty.sort();
        Ok(dirty)
    }

    // -------------------------------------------------------------------------
    // Cycle pieces
    // -------------------------------------------------------------------------

    fn compile(&self, paths: &[PathBuf]) -> Result<PassReport, GraphError> {
        if paths.len() <= SEQUENTIAL_THRESHOLD {
            Ok(self.coordinator.compile_sequential(paths))
        } else {
            self.coordinator.compile_parallel(paths)
        }
    }

    fn build_binary(&self, config: &DevConfig) -> Result<()> {
        crate::util::exec::Cmd::from_slice(&config.build.command)
            .cwd(&config.root)
            .run()
            .map(|_| ())
    }

    /// Run the binary build, migration gate and app start after a clean
    /// initial compile.
    fn finish_backend(&self, config: &DevConfig) -> bool {
        self.set_state(BuildState::BinaryBuild);
        if let Err(e) = self.build_binary(config) {
            self.fail(format!("build failed: {e:#}"));
            return false;
        }

        // Always gate the first start on migrations; the project may have
        // pending ones from before this session
        self.set_state(BuildState::MigrationCheck);
        match migrate::resolve(config) {
            Ok(MigrationOutcome::UpToDate) => {}
            Ok(MigrationOutcome::Applied(n)) => log!("migrate"; "applied {} migration(s)", n),
            Ok(MigrationOutcome::Blocked(reason)) => {
                self.set_state(BuildState::BlockedOnMigration);
                logger::status_warning(&format!("start blocked: {reason}"));
                self.hub
                    .broadcast(ReloadMessage::error_text(format!("start blocked: {reason}")));
                self.set_state(BuildState::Idle);
                return false;
            }
            Err(e) => {
                self.fail(e.to_string());
                return false;
            }
        }

        self.set_state(BuildState::Restarting);
        if let Err(e) = self.app.lock().start() {
            self.fail(format!("app start failed: {e:#}"));
            return false;
        }
        self.set_state(BuildState::Idle);
        true
    }

    /// Surface per-file compile failures: log, status line, browser overlay.
    /// The previously working process keeps running.
    fn report_compile_failure(&self, report: &PassReport) {
        if let Some((path, error)) = report.first_error() {
            let summary = format!("compile failed: {}", path.display());
            log!("error"; "{}: {}", path.display(), error);
            logger::status_error(&summary, &error.to_string());
            self.hub.broadcast(ReloadMessage::compile_error(path, error));
        }
        self.set_state(BuildState::Failed);
        self.set_state(BuildState::Idle);
    }

    /// Surface a cycle-level failure (build tool, migration tool, cycle in
    /// the graph). No restart happens.
    fn fail(&self, summary: String) {
        log!("error"; "{}", summary);
        logger::status_error(&summary, "");
        self.hub.broadcast(ReloadMessage::error_text(summary));
        self.set_state(BuildState::Failed);
        self.set_state(BuildState::Idle);
    }

    /// Stop the application process (shutdown path).
    pub fn stop_app(&self) {
        let _ = self.app.lock().stop();
    }
}

fn rel(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

// =============================================================================
// Wiring
// =============================================================================

/// Run `smelt dev`: watch, rebuild, live-reload, proxy. Blocks until Ctrl+C.
pub fn serve(config: Arc<DevConfig>) -> Result<()> {
    let oracle = ProcessOracle::new(&config.build.compiler, &config.root)?;
    serve_with_oracle(config, Arc::new(oracle))
}

/// Same as [`serve`] with an explicit oracle (tests, embedding).
pub fn serve_with_oracle(
    config: Arc<DevConfig>,
    oracle: Arc<dyn CompileOracle>,
) -> Result<()> {
    // Reload transport first so its port lands in the injected client
    let (hub, hub_handle) = ReloadHub::new();
    let ws_port = start_reload_server(config.serve.reload_port, hub_handle.clone())?;
    debug!("reload"; "ws://localhost:{}{}", ws_port, RELOAD_ENDPOINT);

    let bound = proxy::bind_server(&config)?;
    let (shutdown_tx, shutdown_rx) = crossbeam::channel::unbounded::<()>();
    crate::core::register_server(Arc::clone(&bound.server), shutdown_tx);
    log!("serve"; "http://{}", bound.addr);

    let dev = Arc::new(DevServer::new(
        Arc::clone(&config),
        oracle,
        hub_handle.clone(),
    ));

    // Watcher-first: attach before the initial build so events raised while
    // it runs are buffered, not lost
    let (batch_tx, mut batch_rx) = tokio::sync::mpsc::channel::<WatchBatch>(32);
    let (watch_actor, watch_handle) = WatchActor::new(&config, batch_tx)
        .map_err(|e| anyhow::anyhow!("watcher failed: {}", e))?;

    // Actor runtime on its own thread: hub + watcher + batch dispatch
    let actor_thread = {
        let dev = Arc::clone(&dev);
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("failed to create tokio runtime");

            rt.block_on(async move {
                tokio::spawn(hub.run());
                tokio::spawn(watch_actor.run());

                while let Some(batch) = batch_rx.recv().await {
                    if crate::core::is_shutdown() {
                        break;
                    }
                    // Not awaited: an overlapping batch must reach the
                    // building guard (and be dropped there), not queue up
                    let dev = Arc::clone(&dev);
                    tokio::task::spawn_blocking(move || dev.handle_batch(batch));
                }
            });
        })
    };

    // Ctrl+C → stop watcher and hub, which winds the runtime down
    {
        let watch_handle = watch_handle.clone();
        let hub_handle = hub_handle.clone();
        std::thread::spawn(move || {
            let _ = shutdown_rx.recv();
            watch_handle.stop();
            hub_handle.shutdown();
        });
    }

    spawn_exit_monitor(Arc::clone(&dev));

    // Initial build in the background; the proxy serves a waiting page
    // until it finishes
    {
        let dev = Arc::clone(&dev);
        std::thread::spawn(move || dev.initial_build());
    }

    // Request loop (blocking until ctrl+c unblocks the server)
    proxy::run_request_loop(&bound.server, Arc::clone(&config), ws_port);

    log!("serve"; "stopping app...");
    dev.stop_app();

    // Give the actor runtime a moment to drain, then leave
    for _ in 0..40 {
        if actor_thread.is_finished() {
            let _ = actor_thread.join();
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

/// Watch the app process for unexpected exits between rebuilds.
fn spawn_exit_monitor(dev: Arc<DevServer>) {
    std::thread::spawn(move || {
        let mut was_running = false;
        loop {
            std::thread::sleep(Duration::from_secs(2));
            if crate::core::is_shutdown() {
                break;
            }
            if *dev.building.lock() {
                continue;
            }
            let running = dev.app.lock().is_running();
            if was_running && !running {
                log!("serve"; "app process exited unexpectedly");
                dev.hub.broadcast(ReloadMessage::error_text(
                    "application process exited unexpectedly",
                ));
            }
            was_running = running;
        }
    });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompileError, CompilePhase, CompiledUnit, Diagnostic, Severity};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Serializes tests that install a global config via `init_config`.
    static CONFIG_LOCK: Mutex<()> = Mutex::new(());

    fn project(run: &[&str]) -> (TempDir, Arc<DevConfig>) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/users.sm"), "page Users {}").unwrap();

        let mut config = DevConfig::default();
        config.root = dir.path().to_path_buf();
        config.config_path = dir.path().join("smelt.toml");
        config.build.command = vec!["true".into()];
        config.build.run = run.iter().map(|s| s.to_string()).collect();
        config.migrate.command = vec![
            "sh".into(),
            "-c".into(),
            r#"echo '{"pending":[]}'"#.into(),
        ];
        (dir, crate::config::init_config(config))
    }

    fn batch(path: PathBuf) -> WatchBatch {
        WatchBatch {
            changes: vec![(path, ChangeKind::Modified)],
        }
    }

    #[cfg(unix)]
    #[test]
    fn overlapping_trigger_is_dropped() {
        let _guard = CONFIG_LOCK.lock();
        let (_dir, config) = project(&["sleep", "30"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);

        // Slow, failing oracle: the cycle ends at the compile stage, and
        // the first batch holds the guard long enough for the second
        let oracle = move |_: &[u8]| -> Result<CompiledUnit, CompileError> {
            counted.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Err(CompileError::Parse(Diagnostic {
                message: "nope".into(),
                file: None,
                line: None,
                column: None,
                code: None,
                phase: CompilePhase::Parse,
                severity: Severity::Error,
            }))
        };

        let (_hub, handle) = ReloadHub::new();
        let dev = Arc::new(DevServer::new(
            Arc::clone(&config),
            Arc::new(oracle),
            handle,
        ));

        let source = config.root.join("app/users.sm");
        let first = {
            let dev = Arc::clone(&dev);
            let source = source.clone();
            std::thread::spawn(move || dev.handle_batch(batch(source)))
        };
        std::thread::sleep(Duration::from_millis(100));
        dev.handle_batch(batch(source)); // dropped by the guard
        first.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dev.state(), BuildState::Idle);
    }

    #[cfg(unix)]
    #[test]
    fn backend_cycle_builds_and_restarts() {
        let _guard = CONFIG_LOCK.lock();
        let (_dir, config) = project(&["sleep", "30"]);
        let oracle = |_: &[u8]| -> Result<CompiledUnit, CompileError> {
            Ok(CompiledUnit::default())
        };

        let (_hub, handle) = ReloadHub::new();
        let dev = DevServer::new(Arc::clone(&config), Arc::new(oracle), handle);

        let source = config.root.join("app/users.sm");
        dev.handle_batch(batch(source));

        assert_eq!(dev.state(), BuildState::Idle);
        assert!(dev.healthy.load(Ordering::SeqCst));
        assert!(dev.app.lock().is_running());
        dev.stop_app();
    }

    #[cfg(unix)]
    #[test]
    fn failed_compile_keeps_old_process_running() {
        let _guard = CONFIG_LOCK.lock();
        let (_dir, config) = project(&["sleep", "30"]);

        // First pass compiles, second pass fails
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let oracle = move |_: &[u8]| -> Result<CompiledUnit, CompileError> {
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(CompiledUnit::default())
            } else {
                Err(CompileError::Parse(Diagnostic {
                    message: "broken".into(),
                    file: None,
                    line: Some(2),
                    column: None,
                    code: None,
                    phase: CompilePhase::Parse,
                    severity: Severity::Error,
                }))
            }
        };

        let (_hub, handle) = ReloadHub::new();
        let dev = DevServer::new(Arc::clone(&config), Arc::new(oracle), handle);
        let source = config.root.join("app/users.sm");

        dev.handle_batch(batch(source.clone()));
        let pid = dev.app.lock().pid().unwrap();

        // Break the file; the cycle fails and must not touch the process
        fs::write(&source, "page Users { broken").unwrap();
        dev.handle_batch(batch(source));

        assert_eq!(dev.app.lock().pid(), Some(pid));
        dev.stop_app();
    }

    #[cfg(unix)]
    #[test]
    fn ui_only_change_skips_restart() {
        let _guard = CONFIG_LOCK.lock();
        let (_dir, config) = project(&["sleep", "30"]);
        let oracle = |_: &[u8]| -> Result<CompiledUnit, CompileError> {
            Ok(CompiledUnit::default())
        };
        let (_hub, handle) = ReloadHub::new();
        let dev = DevServer::new(Arc::clone(&config), Arc::new(oracle), handle);

        // Bring the app up with a backend cycle first
        dev.handle_batch(batch(config.root.join("app/users.sm")));
        let pid = dev.app.lock().pid().unwrap();

        // A stylesheet change must not restart the process
        let css = config.root.join("assets/site.css");
        fs::create_dir_all(css.parent().unwrap()).unwrap();
        fs::write(&css, "body{}").unwrap();
        dev.handle_batch(batch(css));

        assert_eq!(dev.app.lock().pid(), Some(pid));
        dev.stop_app();
    }
}
