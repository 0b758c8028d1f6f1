//! FileSystem watching.
//!
//! Watches the configured project directories and sends debounced,
//! deduplicated change batches to the dev server. Implements the
//! "watcher-first" pattern: the OS watcher starts buffering before the
//! initial build runs, so nothing saved during that build is lost.
//!
//! ```text
//! notify → bridge thread → Debouncer (pure timing) → EventFilter → batch
//! ```

pub mod debounce;
pub mod filter;
pub mod scan;

pub use debounce::{ChangeKind, Debouncer};
pub use filter::EventFilter;
pub use scan::scan_sources;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::DevConfig;

/// Upper bound on the idle sleep, so `stop()` is observed promptly even
/// with no file events arriving.
const STOP_POLL: Duration = Duration::from_millis(250);

/// One debounced batch of file changes.
#[derive(Debug)]
pub struct WatchBatch {
    pub changes: Vec<(PathBuf, ChangeKind)>,
}

impl WatchBatch {
    /// Paths only, for impact analysis.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.changes.iter().map(|(p, _)| p.clone()).collect()
    }
}

/// Handle for stopping a running watch actor.
///
/// `stop()` is idempotent: racing it against an in-flight debounce timer or
/// calling it twice is harmless.
#[derive(Clone)]
pub struct WatchHandle {
    stopped: Arc<AtomicBool>,
}

impl WatchHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// FileSystem actor - watches for file changes.
pub struct WatchActor {
    /// Channel to receive notify events (sync → async bridge)
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    watcher: RecommendedWatcher,
    /// Channel delivering debounced batches to the dev server
    batch_tx: mpsc::Sender<WatchBatch>,
    /// Debouncer state
    debouncer: Debouncer,
    /// Path filter
    filter: EventFilter,
    /// Stop flag shared with [`WatchHandle`]
    stopped: Arc<AtomicBool>,
}

impl WatchActor {
    /// Create a new WatchActor with the watcher-first pattern.
    ///
    /// The watcher starts immediately, buffering events while the caller
    /// performs the initial build.
    pub fn new(
        config: &DevConfig,
        batch_tx: mpsc::Sender<WatchBatch>,
    ) -> notify::Result<(Self, WatchHandle)> {
        // Create sync channel for notify (it doesn't support async)
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        // Attach all existing candidate roots; missing ones are skipped
        let mut attached = 0usize;
        for root in config.watch_roots() {
            if root.is_dir() {
                watcher.watch(&root, RecursiveMode::Recursive)?;
                attached += 1;
            } else {
                crate::debug!("watch"; "skipping missing root: {}", root.display());
            }
        }
        // The config file lives at the project root, outside the roots above
        if config.config_path.is_file() {
            watcher.watch(&config.config_path, RecursiveMode::NonRecursive)?;
        }
        crate::debug!("watch"; "watching {} root(s)", attached);

        let stopped = Arc::new(AtomicBool::new(false));
        let handle = WatchHandle {
            stopped: Arc::clone(&stopped),
        };

        Ok((
            Self {
                notify_rx,
                watcher,
                batch_tx,
                debouncer: Debouncer::new(Duration::from_millis(config.watch.debounce_ms)),
                filter: EventFilter::new(config),
                stopped,
            },
            handle,
        ))
    }

    /// Run the actor event loop until stopped or the receiver goes away.
    pub async fn run(self) {
        let Self {
            notify_rx,
            watcher,
            batch_tx,
            mut debouncer,
            filter,
            stopped,
        } = self;
        // Dropping the watcher would detach every root
        let _watcher = watcher;

        let (async_tx, mut async_rx) = mpsc::channel::<notify::Event>(64);

        // Bridge thread: poll notify events into the async channel
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break; // Receiver dropped
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            if stopped.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                biased;
                event = async_rx.recv() => {
                    match event {
                        Some(event) => add_event(&mut debouncer, &filter, &event),
                        None => break,
                    }
                }
                _ = tokio::time::sleep(debouncer.sleep_duration().min(STOP_POLL)) => {
                    // Re-check under a race with stop(): a flush that lost
                    // the race is simply dropped.
                    if stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Some(changes) = debouncer.take_if_ready() {
                        let batch = WatchBatch {
                            changes: changes.into_iter().collect(),
                        };
                        if batch_tx.send(batch).await.is_err() {
                            break; // Dev server shut down
                        }
                    }
                }
            }
        }

        crate::debug!("watch"; "stopped");
    }
}

/// Feed one raw notify event through the filter into the debouncer.
fn add_event(debouncer: &mut Debouncer, filter: &EventFilter, event: &notify::Event) {
    use notify::EventKind;

    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(modify) => {
            // Ignore metadata-only changes (mtime/atime/chmod noise)
            // may trigger endless rebuild loops
            if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                return;
            }
            ChangeKind::Modified
        }
        _ => return,
    };

    for path in &event.paths {
        let path = crate::util::path::normalize_path(path);
        if filter.accepts(&path) {
            debouncer.add(path, kind);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DevConfig;
    use std::fs;
    use tempfile::TempDir;

    fn make_event(paths: Vec<PathBuf>, kind: notify::EventKind) -> notify::Event {
        notify::Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    fn modify_kind() -> notify::EventKind {
        notify::EventKind::Modify(notify::event::ModifyKind::Data(
            notify::event::DataChange::Any,
        ))
    }

    #[test]
    fn filtered_events_do_not_reach_the_debouncer() {
        // Use a non-dotted prefix: the default `.tmpXXXX` tempdir name has a
        // dot-prefixed component, which the filter treats as hidden.
        let dir = tempfile::Builder::new().prefix("smelt").tempdir().unwrap();
        let mut config = DevConfig::default();
        config.root = dir.path().to_path_buf();
        config.config_path = dir.path().join("smelt.toml");

        let source = dir.path().join("app/users.sm");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, "page Users {}").unwrap();

        let filter = EventFilter::new(&config);
        let mut debouncer = Debouncer::new(Duration::from_millis(5));

        add_event(
            &mut debouncer,
            &filter,
            &make_event(
                vec![source, dir.path().join("gen/out.sm")],
                modify_kind(),
            ),
        );

        std::thread::sleep(Duration::from_millis(15));
        let batch = debouncer.take_if_ready().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn metadata_only_events_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut config = DevConfig::default();
        config.root = dir.path().to_path_buf();

        let filter = EventFilter::new(&config);
        let mut debouncer = Debouncer::new(Duration::from_millis(5));

        add_event(
            &mut debouncer,
            &filter,
            &make_event(
                vec![dir.path().join("app/users.sm")],
                notify::EventKind::Modify(notify::event::ModifyKind::Metadata(
                    notify::event::MetadataKind::Any,
                )),
            ),
        );

        std::thread::sleep(Duration::from_millis(15));
        assert!(debouncer.take_if_ready().is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut config = DevConfig::default();
        config.root = dir.path().to_path_buf();
        config.config_path = dir.path().join("smelt.toml");
        config.watch.paths = vec![".".into()];

        let (tx, _rx) = mpsc::channel(4);
        let (actor, handle) = WatchActor::new(&config, tx).unwrap();

        let task = tokio::spawn(actor.run());
        handle.stop();
        handle.stop(); // second stop is a no-op

        // The loop notices the flag on its next tick
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(handle.is_stopped());
    }
}
