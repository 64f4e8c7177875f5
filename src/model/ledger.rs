//! Eviction ledger: the recency-ordered set of resident chunk indices.
//!
//! The ledger only tracks membership and order. Clearing chunk data and
//! moving the viewable window is the store's job, so the two eviction
//! policies live in [`crate::model::store`].

use lru::LruCache;

/// Residency limit for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLimit {
    Bounded(usize),
    Unbounded,
}

impl ChunkLimit {
    /// Non-seekable limits treat zero and negative values as unbounded.
    pub fn from_signed(limit: i64) -> Self {
        match usize::try_from(limit) {
            Ok(n) if n > 0 => ChunkLimit::Bounded(n),
            _ => ChunkLimit::Unbounded,
        }
    }

    pub fn get(self) -> Option<usize> {
        match self {
            ChunkLimit::Bounded(n) => Some(n),
            ChunkLimit::Unbounded => None,
        }
    }
}

#[derive(Debug)]
pub struct ChunkLedger {
    cache: LruCache<usize, ()>,
    limit: ChunkLimit,
}

impl ChunkLedger {
    pub fn new(limit: ChunkLimit) -> Self {
        Self {
            cache: LruCache::unbounded(),
            limit,
        }
    }

    pub fn limit(&self) -> ChunkLimit {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn contains(&self, chunk: usize) -> bool {
        self.cache.contains(&chunk)
    }

    /// Whether the ledger holds at least `limit` entries.
    pub fn is_full(&self) -> bool {
        self.limit.get().is_some_and(|limit| self.cache.len() >= limit)
    }

    /// Whether the ledger holds more than `limit` entries.
    pub fn is_over(&self) -> bool {
        self.limit.get().is_some_and(|limit| self.cache.len() > limit)
    }

    /// Marks `chunk` most recently used, inserting it if absent.
    pub fn touch(&mut self, chunk: usize) {
        self.cache.put(chunk, ());
    }

    pub fn remove(&mut self, chunk: usize) -> bool {
        self.cache.pop(&chunk).is_some()
    }

    pub fn oldest(&self) -> Option<usize> {
        self.cache.peek_lru().map(|(k, _)| *k)
    }

    /// Resident chunk indices from most to least recently used.
    pub fn keys(&self) -> Vec<usize> {
        self.cache.iter().map(|(k, _)| *k).collect()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
