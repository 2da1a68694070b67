//! Content-addressed transform cache.
//!
//! Entries are keyed by `(path, content hash, framework, target)`. A changed
//! file produces a new key, so stale entries are never returned; they linger
//! only until the path is invalidated or the cache is cleared.

use super::transform::{Framework, TransformResult, TransformTarget};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use vela_util::hash::content_hash16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    /// First 16 hex characters of the source's BLAKE3 hash.
    pub hash: String,
    pub framework: Framework,
    pub target: TransformTarget,
}

impl CacheKey {
    #[must_use]
    pub fn new(path: &Path, source: &[u8], framework: Framework, target: TransformTarget) -> Self {
        Self {
            path: path.to_path_buf(),
            hash: content_hash16(source),
            framework,
            target,
        }
    }
}

/// Concurrent map of transform results.
///
/// Concurrent misses for the same key may both compute and insert; the
/// results are equivalent, so the last write wins.
#[derive(Debug, Default)]
pub struct TransformCache {
    entries: DashMap<CacheKey, TransformResult>,
}

impl TransformCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the cached result.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<TransformResult> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: CacheKey, result: &TransformResult) {
        self.entries.insert(key, result.clone());
    }

    /// Remove every entry for `path`, whatever its hash. Returns the number removed.
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.path != path);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
