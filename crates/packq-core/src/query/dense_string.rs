//! Dense string match index.
//!
//! A dense table stores every string once, zero-terminated, in a single
//! region, and rows refer to strings by start offset. A string predicate can
//! therefore be answered for all rows at once: scan the region for the
//! needle, walk back from each hit to the start of its string, and keep the
//! set of start offsets. A row then matches when its offset is in the set.
//!
//! Offset sets are cached per table in an LRU keyed by needle and match
//! kind.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::DEFAULT_STRING_CACHE_CAPACITY;
use crate::storage::TableId;

/// String match operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

/// Immutable set of string start offsets.
pub type OffsetSet = Arc<HashSet<usize>>;

/// Find the start offsets of every string in `bytes` that matches.
///
/// Strings are delimited by zero bytes; the end of the buffer also ends a
/// string. Every occurrence of the needle is considered, including
/// overlapping ones. An empty needle matches nothing here; callers must
/// not route empty or zero-containing needles through the index.
pub fn find_start_offsets(bytes: &[u8], needle: &[u8], kind: MatchKind) -> HashSet<usize> {
    let mut offsets = HashSet::new();
    if needle.is_empty() || needle.len() > bytes.len() {
        return offsets;
    }

    let mut string_start = 0;
    let mut scanned = 0;
    let mut from = 0;

    while let Some(found) = find(&bytes[from..], needle) {
        let at = from + found;
        if let Some(zero) = bytes[scanned..at].iter().rposition(|&b| b == 0) {
            string_start = scanned + zero + 1;
        }
        scanned = at;

        let end = at + needle.len();
        let accepted = match kind {
            MatchKind::Contains => true,
            MatchKind::StartsWith => string_start == at,
            MatchKind::EndsWith => end == bytes.len() || bytes[end] == 0,
        };
        if accepted {
            offsets.insert(string_start);
        }

        from = match kind {
            // Later hits in the same string cannot add a new start offset.
            MatchKind::Contains | MatchKind::StartsWith => match next_zero(bytes, at) {
                Some(zero) => zero + 1,
                None => break,
            },
            MatchKind::EndsWith => at + 1,
        };
        if from >= bytes.len() {
            break;
        }
    }

    offsets
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn next_zero(bytes: &[u8], from: usize) -> Option<usize> {
    bytes[from..].iter().position(|&b| b == 0).map(|i| from + i)
}

/// Check whether a needle can be answered by the index.
pub fn is_indexable(needle: &[u8]) -> bool {
    !needle.is_empty() && !needle.contains(&0)
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    needle: Box<[u8]>,
    kind: MatchKind,
}

/// Offset sets of one table, bounded by an LRU.
pub struct DenseStringCache {
    entries: Mutex<LruCache<CacheKey, OffsetSet>>,
    stats: CacheStats,
}

impl DenseStringCache {
    /// Create a cache holding at most `capacity` offset sets.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    /// Get the offsets for a needle, computing them on a miss.
    ///
    /// The scan runs outside the lock. When two callers race on the same
    /// key the first insert wins and both get that set.
    pub fn get_or_compute(&self, bytes: &[u8], needle: &[u8], kind: MatchKind) -> OffsetSet {
        let key = CacheKey {
            needle: needle.into(),
            kind,
        };

        if let Some(hit) = self.entries.lock().get(&key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(hit);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let computed = Arc::new(find_start_offsets(bytes, needle, kind));
        trace!(?kind, needle_len = needle.len(), offsets = computed.len(), "offset set computed");

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            return Arc::clone(existing);
        }
        if let Some((evicted, _)) = entries.push(key, Arc::clone(&computed)) {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(kind = ?evicted.kind, needle_len = evicted.needle.len(), "offset set evicted");
        }
        computed
    }

    /// Check for a cached entry without touching recency.
    pub fn contains(&self, needle: &[u8], kind: MatchKind) -> bool {
        let key = CacheKey {
            needle: needle.into(),
            kind,
        };
        self.entries.lock().contains(&key)
    }

    /// Number of cached offset sets.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

/// Per-table caches keyed by table instance.
pub struct DenseStringCacheRegistry {
    tables: DashMap<TableId, Arc<DenseStringCache>>,
    capacity: usize,
}

impl DenseStringCacheRegistry {
    /// Create a registry whose caches hold `capacity` entries each.
    pub fn new(capacity: usize) -> Self {
        Self {
            tables: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<DenseStringCacheRegistry> {
        static GLOBAL: OnceLock<Arc<DenseStringCacheRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            Arc::new(DenseStringCacheRegistry::new(DEFAULT_STRING_CACHE_CAPACITY))
        }))
    }

    /// Cache of one table, created on first use.
    pub fn cache_for(&self, table: TableId) -> Arc<DenseStringCache> {
        Arc::clone(
            self.tables
                .entry(table)
                .or_insert_with(|| Arc::new(DenseStringCache::new(self.capacity)))
                .value(),
        )
    }

    /// Drop the cache of a table.
    pub fn invalidate(&self, table: TableId) {
        if self.tables.remove(&table).is_some() {
            debug!(%table, "dense string cache invalidated");
        }
    }

    /// Check whether a table has a cache.
    pub fn contains(&self, table: TableId) -> bool {
        self.tables.contains_key(&table)
    }

    /// Per-table capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
