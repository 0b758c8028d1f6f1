//! Pure debouncing: timing and event deduplication only.
//!
//! One shared timer for the whole batch, not one per file: every addition
//! resets the deadline to a fixed quiet window, and when the window elapses
//! the accumulated set flushes atomically. This coalesces save storms
//! (format-on-save touching several files) into a single rebuild.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

/// What happened to a file within the debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// Debounced file-change accumulator.
pub struct Debouncer {
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    changes: FxHashMap<PathBuf, ChangeKind>,
    /// Deadline of the shared timer; `None` while idle.
    deadline: Option<Instant>,
    /// Quiet window after the last event.
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            changes: FxHashMap::default(),
            deadline: None,
            window,
        }
    }

    /// Record a change, applying dedup rules:
    /// - Removed + Created/Modified → the restore event wins
    /// - Modified + Removed → upgrade to Removed
    /// - Created + Removed → appeared then vanished, discard
    /// - same kind: first event wins
    ///
    /// Every addition resets the shared timer.
    pub fn add(&mut self, path: PathBuf, kind: ChangeKind) {
        self.deadline = Some(Instant::now() + self.window);

        let Some(&existing) = self.changes.get(&path) else {
            crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
            self.changes.insert(path, kind);
            return;
        };

        match (existing, kind) {
            (ChangeKind::Removed, ChangeKind::Created | ChangeKind::Modified) => {
                self.changes.insert(path, kind);
            }
            (ChangeKind::Modified, ChangeKind::Removed) => {
                self.changes.insert(path, ChangeKind::Removed);
            }
            (ChangeKind::Created, ChangeKind::Removed) => {
                self.changes.remove(&path);
            }
            _ => {}
        }
    }

    /// Flush the accumulated set if the quiet window has elapsed.
    ///
    /// The set and timer reset atomically, so events arriving after the
    /// flush start a fresh batch.
    pub fn take_if_ready(&mut self) -> Option<FxHashMap<PathBuf, ChangeKind>> {
        if !self.is_ready() {
            return None;
        }

        self.deadline = None;
        let changes = std::mem::take(&mut self.changes);
        (!changes.is_empty()).then_some(changes)
    }

    /// True once the quiet window after the last event has elapsed.
    pub fn is_ready(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline && !self.changes.is_empty(),
            None => false,
        }
    }

    /// Precise sleep duration until the next possible ready time.
    pub fn sleep_duration(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(1)),
            // Idle: park until an event arrives
            None => Duration::from_secs(86400),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
