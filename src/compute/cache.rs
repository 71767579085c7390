//! Memory-budgeted score cache shared by deme workers.
//!
//! Keys are canonical trees. The cache is split into independently locked
//! shards. Each shard is an `lru::LruCache` trimmed from its cold end until
//! it fits its share of the byte budget.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::schema::{CacheConfig, CandidateTree, Score};

/// Fixed per-entry bookkeeping charge on top of key and value sizes.
const ENTRY_OVERHEAD: usize = 64;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    /// Approximate bytes held by all shards.
    pub bytes: usize,
}

/// One LRU shard: an unbounded `LruCache` trimmed by bytes, not entries.
struct Shard {
    entries: LruCache<CandidateTree, (Score, usize)>,
    bytes: usize,
    budget: usize,
}

impl Shard {
    fn new(budget: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            budget,
        }
    }

    fn get(&mut self, key: &CandidateTree) -> Option<Score> {
        self.entries.get(key).map(|(score, _)| score.clone())
    }

    /// Insert and evict; returns the number of entries evicted.
    fn put(&mut self, key: CandidateTree, score: Score) -> u64 {
        let size = key.memory_footprint() + score.memory_footprint() + ENTRY_OVERHEAD;
        if size > self.budget {
            return 0;
        }
        if let Some((_, old)) = self.entries.put(key, (score, size)) {
            self.bytes = self.bytes.saturating_sub(old);
        }
        self.bytes += size;

        let mut evicted = 0;
        while self.bytes > self.budget {
            let Some((_, (_, size))) = self.entries.pop_lru() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(size);
            evicted += 1;
        }
        evicted
    }
}

/// Concurrent, sharded, memory-budgeted LRU cache from canonical tree to
/// score. Safe to share by reference across rayon workers.
pub struct ScoreCache {
    shards: Vec<Mutex<Shard>>,
    budget: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ScoreCache {
    /// Cache with `budget` bytes split evenly over `shards` shards.
    pub fn new(budget: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = budget / shards;
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::new(per_shard))).collect(),
            budget: per_shard * shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.memory_budget_bytes, config.shards)
    }

    /// Effective byte budget (a multiple of the shard count).
    pub fn budget(&self) -> usize {
        self.budget
    }

    fn shard(&self, key: &CandidateTree) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CandidateTree) -> Option<Score> {
        let found = self.shard(key).get(key);
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a score. Entries larger than a shard's budget are not kept.
    pub fn put(&self, key: CandidateTree, score: Score) {
        let evicted = self.shard(&key).put(key, score);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.lock_all().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes currently held.
    pub fn memory_usage(&self) -> usize {
        self.lock_all().map(|s| s.bytes).sum()
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = self
            .lock_all()
            .fold((0, 0), |(n, b), s| (n + s.entries.len(), b + s.bytes));
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            bytes,
        }
    }

    fn lock_all(&self) -> impl Iterator<Item = MutexGuard<'_, Shard>> {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
