//! The tile cache (spec §4.7): a fixed-capacity pool of tile buffers kept in
//! LRU order, indexed by an open hash table keyed on tile index.
//!
//! Grounded on the teacher's `block::reader`/`block::writer` buffering
//! style (pre-sized reusable buffers, no per-tile heap churn) and on the
//! redesign note in spec.md §9: a doubly-linked LRU list (expressed here as
//! `Vec`-indexed slots rather than raw pointers) plus an external
//! open-addressed hash map, confined to one owner so there is no need for
//! interior mutability or locking.

use smallvec::SmallVec;

const HASH_BIN_COUNT: usize = 256;
const KNUTH_MULTIPLIER: u32 = 2_654_435_761;

#[inline]
fn hash_bin(tile_index: u64) -> usize {
    let folded = tile_index as u32 ^ (tile_index >> 32) as u32;
    (folded.wrapping_mul(KNUTH_MULTIPLIER) >> 24) as usize
}

/// One resident tile: its identity, dirty flag, on-disk record offset (0 if
/// never written) and the raw element byte buffer (spec §3 "Tile").
#[derive(Debug, Clone)]
pub struct Tile {
    pub tile_index: u64,
    pub write_pending: bool,
    pub record_offset: u64,
    pub data: Vec<u8>,
}

impl Tile {
    pub fn new(tile_index: u64, data: Vec<u8>) -> Self {
        Tile { tile_index, write_pending: false, record_offset: 0, data }
    }
}

struct Slot {
    tile: Option<Tile>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bucket capacity statistics surfaced through [`TileCache::stats`], the
/// data the out-of-scope summary/report printer consumes (spec §7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Cache sizing presets (spec §4.7 "Cache resize").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl CacheSize {
    pub fn slot_count(self, n_rows_of_tiles: usize, n_cols_of_tiles: usize) -> usize {
        let large = n_rows_of_tiles.max(n_cols_of_tiles);
        let raw = match self {
            CacheSize::Small => 4,
            CacheSize::Medium => 9,
            CacheSize::Large => large,
            CacheSize::ExtraLarge => 2 * large,
        };
        raw.max(4)
    }
}

/// An LRU pool of tile buffers indexed by tile index. `fetch`/`insert`
/// never touch disk; the container engine drives persistence using the
/// evicted tiles this cache hands back.
pub struct TileCache {
    slots: Vec<Slot>,
    free_slots: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    hash: Vec<SmallVec<[(u64, usize); 1]>>,
    hot_tile_index: Option<u64>,
    hot_slot: Option<usize>,
    stats: CacheStats,
}

impl TileCache {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        TileCache {
            slots: (0..capacity).map(|_| Slot { tile: None, prev: None, next: None }).collect(),
            free_slots: (0..capacity).rev().collect(),
            head: None,
            tail: None,
            hash: (0..HASH_BIN_COUNT).map(|_| SmallVec::new()).collect(),
            hot_tile_index: None,
            hot_slot: None,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn resident_count(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    fn hash_lookup(&self, tile_index: u64) -> Option<usize> {
        self.hash[hash_bin(tile_index)].iter().find(|&&(key, _)| key == tile_index).map(|&(_, slot)| slot)
    }

    fn hash_insert(&mut self, tile_index: u64, slot: usize) {
        self.hash[hash_bin(tile_index)].push((tile_index, slot));
    }

    fn hash_remove(&mut self, tile_index: u64) {
        let bin = &mut self.hash[hash_bin(tile_index)];
        if let Some(pos) = bin.iter().position(|&(key, _)| key == tile_index) {
            bin.swap_remove(pos);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.head;
        if let Some(old_head) = self.head {
            self.slots[old_head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn promote(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    /// Looks a tile up without evicting anything; promotes it to
    /// most-recently-used on hit. The hot-pointer fast path (spec §4.7)
    /// short-circuits the hash lookup for repeated access to one tile.
    pub fn get(&mut self, tile_index: u64) -> Option<&Tile> {
        if self.hot_tile_index == Some(tile_index) {
            if let Some(slot) = self.hot_slot {
                self.stats.hits += 1;
                return self.slots[slot].tile.as_ref();
            }
        }

        match self.hash_lookup(tile_index) {
            Some(slot) => {
                self.promote(slot);
                self.hot_tile_index = Some(tile_index);
                self.hot_slot = Some(slot);
                self.stats.hits += 1;
                self.slots[slot].tile.as_ref()
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn get_mut(&mut self, tile_index: u64) -> Option<&mut Tile> {
        let slot = self.hash_lookup(tile_index)?;
        self.promote(slot);
        self.hot_tile_index = Some(tile_index);
        self.hot_slot = Some(slot);
        self.slots[slot].tile.as_mut()
    }

    /// Inserts a tile that was not previously resident, taking a free slot
    /// or evicting the LRU tail. Returns the evicted tile, if any, for the
    /// caller to flush when it was write-pending (spec §4.7).
    pub fn insert(&mut self, tile: Tile) -> Option<Tile> {
        let tile_index = tile.tile_index;

        let (slot, evicted) = if let Some(slot) = self.free_slots.pop() {
            (slot, None)
        } else {
            let victim = self.tail.expect("capacity >= 1 guarantees a tail once full");
            self.unlink(victim);
            let evicted = self.slots[victim].tile.take();
            if let Some(t) = &evicted {
                self.hash_remove(t.tile_index);
                self.stats.evictions += 1;
                if self.hot_tile_index == Some(t.tile_index) {
                    self.hot_tile_index = None;
                    self.hot_slot = None;
                }
            }
            (victim, evicted)
        };

        self.slots[slot].tile = Some(tile);
        self.push_front(slot);
        self.hash_insert(tile_index, slot);
        self.hot_tile_index = Some(tile_index);
        self.hot_slot = Some(slot);

        evicted
    }

    /// Removes every resident tile (e.g. before a capacity change),
    /// returning them in LRU-to-MRU order so the caller can flush pending
    /// ones before rebuilding the cache (spec §4.7 "Cache resize").
    pub fn drain_all(&mut self) -> Vec<Tile> {
        let mut tiles = Vec::with_capacity(self.resident_count());
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            cursor = self.slots[slot].prev;
            if let Some(tile) = self.slots[slot].tile.take() {
                tiles.push(tile);
            }
        }

        for bin in &mut self.hash {
            bin.clear();
        }
        self.free_slots = (0..self.slots.len()).collect();
        self.head = None;
        self.tail = None;
        self.hot_tile_index = None;
        self.hot_slot = None;
        tiles
    }

    /// All currently write-pending tiles, for the flush-before-close and
    /// flush-before-resize paths (spec §4.7, §4.8).
    pub fn pending_tile_indices(&self) -> Vec<u64> {
        self.slots.iter().filter_map(|s| s.tile.as_ref()).filter(|t| t.write_pending).map(|t| t.tile_index).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let mut cache = TileCache::with_capacity(4);
        cache.insert(Tile::new(7, vec![1, 2, 3]));
        assert_eq!(cache.get(7).unwrap().data, vec![1, 2, 3]);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_on_absent_tile_is_recorded() {
        let mut cache = TileCache::with_capacity(4);
        assert!(cache.get(99).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn eviction_happens_in_lru_order() {
        let mut cache = TileCache::with_capacity(2);
        assert!(cache.insert(Tile::new(1, vec![])).is_none());
        assert!(cache.insert(Tile::new(2, vec![])).is_none());

        // touch 1 so 2 becomes the least-recently-used tile
        cache.get(1);

        let evicted = cache.insert(Tile::new(3, vec![])).unwrap();
        assert_eq!(evicted.tile_index, 2);
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn hash_table_reflects_live_puts_and_removes() {
        let mut cache = TileCache::with_capacity(8);
        for i in 0..8 {
            cache.insert(Tile::new(i, vec![i as u8]));
        }
        for i in 0..8 {
            assert_eq!(cache.get(i).unwrap().tile_index, i);
        }

        // evict all 8 by inserting 8 more distinct indices
        for i in 100..108 {
            cache.insert(Tile::new(i, vec![]));
        }
        for i in 0..8 {
            assert!(cache.get(i).is_none());
        }
        for i in 100..108 {
            assert!(cache.get(i).is_some());
        }
    }

    #[test]
    fn no_bin_holds_two_entries_for_the_same_tile_index() {
        let mut cache = TileCache::with_capacity(4);
        cache.insert(Tile::new(42, vec![1]));
        cache.insert(Tile::new(42 + 256, vec![2])); // likely hashes to same bin
        for bin in &cache.hash {
            let mut seen = std::collections::HashSet::new();
            for &(key, _) in bin.iter() {
                assert!(seen.insert(key), "duplicate tile index {key} in one bin");
            }
        }
    }

    #[test]
    fn drain_all_empties_the_cache() {
        let mut cache = TileCache::with_capacity(4);
        cache.insert(Tile::new(1, vec![]));
        cache.insert(Tile::new(2, vec![]));
        let drained = cache.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(cache.resident_count(), 0);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn cache_size_presets_resolve_and_clamp() {
        assert_eq!(CacheSize::Small.slot_count(100, 100), 4);
        assert_eq!(CacheSize::Medium.slot_count(100, 100), 9);
        assert_eq!(CacheSize::Large.slot_count(3, 20), 20);
        assert_eq!(CacheSize::ExtraLarge.slot_count(3, 20), 40);
        assert_eq!(CacheSize::Large.slot_count(1, 1), 4); // clamped to >= 4
    }
}
