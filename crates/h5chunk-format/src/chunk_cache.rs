//! Decoded chunk cache with LRU eviction under a slot and a byte budget.
//!
//! Entries are keyed by scaled chunk coordinate. Every access bumps a
//! monotonic tick; eviction removes the entry with the oldest tick until the
//! new entry fits both limits. A decoded chunk larger than the whole byte
//! budget is handed back without being retained.

use std::borrow::Cow;
use std::collections::HashMap;

use log::{debug, trace};

/// HDF5's default number of chunk slots (`rdcc_nslots`).
pub const DEFAULT_CACHE_SLOTS: usize = 521;
/// HDF5's default chunk cache size in bytes (`rdcc_nbytes`).
pub const DEFAULT_CACHE_BYTES: usize = 1024 * 1024;

/// Chunk cache limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCacheConfig {
    /// Maximum number of cached chunks; 0 disables caching.
    pub max_slots: usize,
    /// Maximum total bytes of cached chunks; 0 disables caching.
    pub max_bytes: usize,
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_CACHE_SLOTS,
            max_bytes: DEFAULT_CACHE_BYTES,
        }
    }
}

impl ChunkCacheConfig {
    /// A configuration that never retains anything.
    pub fn disabled() -> Self {
        Self {
            max_slots: 0,
            max_bytes: 0,
        }
    }

    /// Whether entries can be retained at all.
    pub fn is_enabled(&self) -> bool {
        self.max_slots > 0 && self.max_bytes > 0
    }
}

/// Counters describing cache behaviour since creation or the last [`ChunkCache::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that called the miss function.
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
    /// Decoded chunks returned without being retained.
    pub bypassed: u64,
}

#[derive(Debug)]
struct CacheEntry {
    coordinate: Vec<u64>,
    buffer: Vec<u8>,
    last_access: u64,
}

/// LRU cache of decoded chunks for one dataset handle.
#[derive(Debug)]
pub struct ChunkCache {
    config: ChunkCacheConfig,
    entries: Vec<CacheEntry>,
    slots: HashMap<Vec<u64>, usize>,
    bytes: usize,
    tick: u64,
    stats: CacheStats,
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(ChunkCacheConfig::default())
    }
}

impl ChunkCache {
    /// Create an empty cache with the given limits.
    pub fn new(config: ChunkCacheConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            slots: HashMap::new(),
            bytes: 0,
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    /// The limits this cache enforces.
    pub fn config(&self) -> ChunkCacheConfig {
        self.config
    }

    /// Number of cached chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes of cached chunks.
    pub fn bytes_used(&self) -> usize {
        self.bytes
    }

    /// Whether `coordinate` is cached, without touching its recency.
    pub fn contains(&self, coordinate: &[u64]) -> bool {
        self.slots.contains_key(coordinate)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
        self.bytes = 0;
        self.tick = 0;
        self.stats = CacheStats::default();
    }

    /// Return the decoded chunk at `coordinate`, producing it with `miss` when
    /// it is not cached.
    ///
    /// `miss` is never called on a hit. An error from `miss` is returned and
    /// nothing is cached.
    pub fn get<E>(
        &mut self,
        coordinate: &[u64],
        miss: impl FnOnce() -> Result<Vec<u8>, E>,
    ) -> Result<Cow<'_, [u8]>, E> {
        self.tick += 1;
        if let Some(&slot) = self.slots.get(coordinate) {
            self.stats.hits += 1;
            trace!("chunk cache hit {coordinate:?}");
            let entry = &mut self.entries[slot];
            entry.last_access = self.tick;
            return Ok(Cow::Borrowed(&entry.buffer));
        }

        self.stats.misses += 1;
        trace!("chunk cache miss {coordinate:?}");
        let buffer = miss()?;
        if !self.config.is_enabled() || buffer.len() > self.config.max_bytes {
            self.stats.bypassed += 1;
            return Ok(Cow::Owned(buffer));
        }

        while !self.entries.is_empty()
            && (self.entries.len() >= self.config.max_slots
                || self.bytes + buffer.len() > self.config.max_bytes)
        {
            self.evict_lru();
        }

        self.bytes += buffer.len();
        self.slots.insert(coordinate.to_vec(), self.entries.len());
        self.entries.push(CacheEntry {
            coordinate: coordinate.to_vec(),
            buffer,
            last_access: self.tick,
        });
        let entry = &self.entries[self.entries.len() - 1];
        Ok(Cow::Borrowed(&entry.buffer))
    }

    fn evict_lru(&mut self) {
        let Some(victim) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(i, _)| i)
        else {
            return;
        };
        let removed = self.entries.swap_remove(victim);
        self.slots.remove(&removed.coordinate);
        if let Some(moved) = self.entries.get(victim) {
            self.slots.insert(moved.coordinate.clone(), victim);
        }
        self.bytes -= removed.buffer.len();
        self.stats.evictions += 1;
        debug!(
            "chunk cache evicted {:?} ({} bytes, {} cached)",
            removed.coordinate,
            removed.buffer.len(),
            self.bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn fill(cache: &mut ChunkCache, coord: &[u64], len: usize) -> Vec<u8> {
        cache
            .get::<Infallible>(coord, || Ok(vec![coord[0] as u8; len]))
            .unwrap()
            .into_owned()
    }

    fn hit(cache: &mut ChunkCache, coord: &[u64]) -> bool {
        let before = cache.stats().hits;
        cache
            .get::<Infallible>(coord, || Ok(vec![0xEE]))
            .unwrap();
        cache.stats().hits > before
    }

    #[test]
    fn defaults_match_hdf5() {
        let c = ChunkCacheConfig::default();
        assert_eq!(c.max_slots, 521);
        assert_eq!(c.max_bytes, 1 << 20);
        assert!(c.is_enabled());
        assert!(!ChunkCacheConfig::disabled().is_enabled());
    }

    #[test]
    fn hit_does_not_call_miss() {
        let mut cache = ChunkCache::default();
        assert_eq!(fill(&mut cache, &[1, 2], 4), vec![1; 4]);
        let v = cache
            .get::<Infallible>(&[1, 2], || panic!("miss called on a hit"))
            .unwrap();
        assert_eq!(&*v, &[1, 1, 1, 1]);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, evictions: 0, bypassed: 0 });
    }

    #[test]
    fn evicts_least_recently_used_by_slots() {
        let mut cache = ChunkCache::new(ChunkCacheConfig { max_slots: 3, max_bytes: 1000 });
        for c in 0..3u64 {
            fill(&mut cache, &[c], 10);
        }
        // Touch 0 so 1 becomes the oldest.
        assert!(hit(&mut cache, &[0]));
        fill(&mut cache, &[3], 10);
        assert!(!cache.contains(&[1]));
        assert!(cache.contains(&[0]) && cache.contains(&[2]) && cache.contains(&[3]));
        fill(&mut cache, &[4], 10);
        assert!(!cache.contains(&[2]));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn evicts_until_bytes_fit() {
        let mut cache = ChunkCache::new(ChunkCacheConfig { max_slots: 100, max_bytes: 100 });
        fill(&mut cache, &[0], 40);
        fill(&mut cache, &[1], 40);
        fill(&mut cache, &[2], 20);
        assert_eq!(cache.bytes_used(), 100);
        fill(&mut cache, &[3], 70);
        // Evicting 0 and 1 frees enough room.
        assert!(!cache.contains(&[0]));
        assert!(!cache.contains(&[1]));
        assert!(cache.contains(&[2]));
        assert_eq!(cache.bytes_used(), 90);
    }

    #[test]
    fn oversize_is_returned_but_not_retained() {
        let mut cache = ChunkCache::new(ChunkCacheConfig { max_slots: 10, max_bytes: 16 });
        fill(&mut cache, &[0], 8);
        assert_eq!(fill(&mut cache, &[1], 17).len(), 17);
        assert!(!cache.contains(&[1]));
        assert!(cache.contains(&[0]));
        assert_eq!(cache.stats().bypassed, 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn disabled_cache_always_misses() {
        let mut cache = ChunkCache::new(ChunkCacheConfig { max_slots: 0, max_bytes: 1 << 20 });
        fill(&mut cache, &[0], 8);
        fill(&mut cache, &[0], 8);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn miss_error_caches_nothing() {
        let mut cache = ChunkCache::default();
        let r = cache.get(&[5], || Err("boom"));
        assert_eq!(r.unwrap_err(), "boom");
        assert!(cache.is_empty());
    }

    #[test]
    fn index_stays_consistent_after_swap_remove() {
        let mut cache = ChunkCache::new(ChunkCacheConfig { max_slots: 4, max_bytes: 1000 });
        for c in 0..4u64 {
            fill(&mut cache, &[c], 1);
        }
        // Evict 0; the last entry moves into its slot.
        fill(&mut cache, &[9], 1);
        for c in [1u64, 2, 3, 9] {
            assert_eq!(fill(&mut cache, &[c], 1), vec![c as u8], "chunk {c}");
        }
        assert_eq!(cache.stats().hits, 4);
    }

    #[test]
    fn clear_resets_everything() {
        let mut cache = ChunkCache::default();
        fill(&mut cache, &[0, 0], 64);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.bytes_used(), 0);
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
