//! In-memory store of compiled artifacts, keyed by path and content hash.
//!
//! The cache never serves a stale hit: an entry's hash always reflects the
//! last successfully compiled content, and freshness is established by the
//! caller comparing hashes. All mutation is whole-entry replacement, so
//! readers never observe a partially updated entry.

use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::hash::ContentHash;
use super::oracle::CompiledUnit;

/// One cached compile result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The compiled artifact (shared, the cache keeps no exclusive copy).
    pub unit: Arc<CompiledUnit>,
    /// Hash of the source content this unit was compiled from.
    pub hash: ContentHash,
    /// When this artifact version was stored.
    pub cached_at: Instant,
    /// When the entry was last confirmed by a successful compile; prune
    /// ages against this.
    pub refreshed_at: Instant,
}

/// Path- and hash-addressed artifact cache.
///
/// Reads take the shared lock and never mutate bookkeeping; the hash index
/// is a sidecar map kept in step inside every write section, making
/// `get_by_hash` O(1) instead of a full scan.
pub struct AstCache {
    entries: RwLock<FxHashMap<PathBuf, CacheEntry>>,
    by_hash: DashMap<ContentHash, PathBuf>,
}

impl AstCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            by_hash: DashMap::new(),
        }
    }

    /// Look up an entry by path. Read-only: no timestamps are touched.
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.entries.read().get(path).cloned()
    }

    /// Look up an entry by content hash.
    ///
    /// Recovers a cached artifact after a file rename/move: same content,
    /// different path.
    pub fn get_by_hash(&self, hash: &ContentHash) -> Option<(PathBuf, CacheEntry)> {
        let path = self.by_hash.get(hash).map(|r| r.clone())?;
        let entry = self.entries.read().get(&path).cloned()?;
        Some((path, entry))
    }

    /// Insert or replace the entry for `path`. Atomic full replace: both
    /// timestamps are stamped and the hash index is updated in the same
    /// write section.
    pub fn insert(&self, path: &Path, unit: Arc<CompiledUnit>, hash: ContentHash) {
        let now = Instant::now();
        let mut entries = self.entries.write();

        if let Some(old) = entries.get(path)
            && old.hash != hash
        {
            self.unindex(&old.hash, path);
        }

        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                unit,
                hash,
                cached_at: now,
                refreshed_at: now,
            },
        );
        self.by_hash.insert(hash, path.to_path_buf());
    }

    /// Remove the entry for `path`. Returns true if something was evicted.
    pub fn invalidate(&self, path: &Path) -> bool {
        let mut entries = self.entries.write();
        match entries.remove(path) {
            Some(old) => {
                self.unindex(&old.hash, path);
                true
            }
            None => false,
        }
    }

    /// Evict entries not refreshed within `max_age`. Returns the eviction
    /// count. Bounds memory in long watch sessions.
    pub fn prune(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();

        entries.retain(|path, entry| {
            let keep = entry.refreshed_at.elapsed() <= max_age;
            if !keep {
                self.unindex(&entry.hash, path);
            }
            keep
        });

        before - entries.len()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop everything (full rebuild).
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.by_hash.clear();
    }

    /// Remove a hash-index mapping, but only if it still points at `path`.
    /// Two paths with identical content share one index slot.
    fn unindex(&self, hash: &ContentHash, path: &Path) {
        self.by_hash.remove_if(hash, |_, indexed| indexed == path);
    }
}

impl Default for AstCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::hash::hash_bytes;

    fn unit() -> Arc<CompiledUnit> {
        Arc::new(CompiledUnit::default())
    }

    fn path(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn get_miss_on_empty() {
        let cache = AstCache::new();
        assert!(cache.get(&path("/app/users.sm")).is_none());
    }

    #[test]
    fn insert_then_get() {
        let cache = AstCache::new();
        let h = hash_bytes(b"model User {}");

        cache.insert(&path("/app/users.sm"), unit(), h);

        let entry = cache.get(&path("/app/users.sm")).unwrap();
        assert_eq!(entry.hash, h);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_by_hash_recovers_renamed_file() {
        let cache = AstCache::new();
        let h = hash_bytes(b"model User {}");
        cache.insert(&path("/app/users.sm"), unit(), h);

        // Same content under a new name: hash lookup still hits
        let (found_path, entry) = cache.get_by_hash(&h).unwrap();
        assert_eq!(found_path, path("/app/users.sm"));
        assert_eq!(entry.hash, h);
    }

    #[test]
    fn replace_updates_hash_index() {
        let cache = AstCache::new();
        let old_hash = hash_bytes(b"v1");
        let new_hash = hash_bytes(b"v2");

        cache.insert(&path("/app/a.sm"), unit(), old_hash);
        cache.insert(&path("/app/a.sm"), unit(), new_hash);

        assert!(cache.get_by_hash(&old_hash).is_none());
        assert!(cache.get_by_hash(&new_hash).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn replace_stamps_both_timestamps() {
        let cache = AstCache::new();
        cache.insert(&path("/app/a.sm"), unit(), hash_bytes(b"v1"));
        let first = cache.get(&path("/app/a.sm")).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        cache.insert(&path("/app/a.sm"), unit(), hash_bytes(b"v2"));
        let second = cache.get(&path("/app/a.sm")).unwrap();

        assert!(second.cached_at > first.cached_at);
        assert!(second.refreshed_at > first.refreshed_at);
        assert_eq!(second.cached_at, second.refreshed_at);
    }

    #[test]
    fn invalidate_removes_both_indexes() {
        let cache = AstCache::new();
        let h = hash_bytes(b"model User {}");
        cache.insert(&path("/app/users.sm"), unit(), h);

        assert!(cache.invalidate(&path("/app/users.sm")));
        assert!(cache.get(&path("/app/users.sm")).is_none());
        assert!(cache.get_by_hash(&h).is_none());
        assert!(!cache.invalidate(&path("/app/users.sm")));
    }

    #[test]
    fn prune_evicts_old_entries() {
        let cache = AstCache::new();
        cache.insert(&path("/app/a.sm"), unit(), hash_bytes(b"a"));
        cache.insert(&path("/app/b.sm"), unit(), hash_bytes(b"b"));

        // Nothing is older than an hour
        assert_eq!(cache.prune(Duration::from_secs(3600)), 0);
        assert_eq!(cache.len(), 2);

        std::thread::sleep(Duration::from_millis(20));
        let evicted = cache.prune(Duration::from_millis(1));
        assert_eq!(evicted, 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn identical_content_under_two_paths() {
        let cache = AstCache::new();
        let h = hash_bytes(b"shared");
        cache.insert(&path("/app/a.sm"), unit(), h);
        cache.insert(&path("/app/b.sm"), unit(), h);

        // The index points at the latest writer; evicting the other path
        // must not clobber its slot
        cache.invalidate(&path("/app/a.sm"));
        let (found, _) = cache.get_by_hash(&h).unwrap();
        assert_eq!(found, path("/app/b.sm"));
    }
}
