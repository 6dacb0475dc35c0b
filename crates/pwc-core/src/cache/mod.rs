pub mod level;
pub mod trie;

use std::collections::VecDeque;

use crate::entry::{PageTableEntry, TranslationCacheEntry};
use level::{LegacyMode, Level};
use trie::PrefixTrie;

/// Contract violations. Misses and full caches are not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("{level} cache cannot be used in legacy mode {mode}")]
    IllegalMode { level: Level, mode: LegacyMode },
    #[error(
        "{level} cache key {key:#x} already holds {cached:#x}, refusing to cache {incoming:#x}"
    )]
    ConflictingEntry {
        level: Level,
        key: u64,
        cached: PageTableEntry,
        incoming: PageTableEntry,
    },
    #[error("{level} cache needs at least one entry")]
    ZeroCapacity { level: Level },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TranslationCacheStats {
    pub flush: u64,
    pub insert: u64,
    pub evict: u64,
    pub hit: u64,
    pub miss: u64,
}

impl TranslationCacheStats {
    pub fn lookups(&self) -> u64 {
        self.hit + self.miss
    }

    /// Hit rate in [0, 1]; 0 before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hit as f64 / n as f64,
        }
    }
}

/// Fixed-capacity, fully associative cache of one page-table level.
///
/// Slots are allocated once. A prefix trie maps masked keys to slots and a
/// free list tracks unoccupied slots; when it runs dry the least recently
/// used slot is evicted. Entries are write-through copies of page-table
/// memory and are never modified in place.
#[derive(Debug)]
pub struct TranslationCache {
    name: String,
    level: Level,
    lru_seq: u64,
    slots: Vec<TranslationCacheEntry>,
    free_list: VecDeque<usize>,
    index: PrefixTrie<usize>,
    stats: TranslationCacheStats,
}

impl TranslationCache {
    pub fn new(
        name: impl Into<String>,
        level: Level,
        capacity: usize,
    ) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity { level });
        }
        let name = name.into();
        log::debug!(
            "{}: {} entries, key mask {:#018x}",
            name,
            capacity,
            level.addr_mask()
        );
        Ok(Self {
            name,
            level,
            lru_seq: 0,
            slots: vec![TranslationCacheEntry::vacant(); capacity],
            free_list: (0..capacity).collect(),
            index: PrefixTrie::new(),
            stats: TranslationCacheStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free_list.len() == self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free_list.len()
    }

    pub fn stats(&self) -> TranslationCacheStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = TranslationCacheStats::default();
    }

    /// Key `vaddr` is filed under when walked in `mode`.
    pub fn key_for(&self, vaddr: u64, mode: LegacyMode) -> Result<u64, CacheError> {
        self.level.key(vaddr, mode)
    }

    fn next_seq(&mut self) -> u64 {
        self.lru_seq += 1;
        self.lru_seq
    }

    /// Cache the walk step for `vaddr`.
    ///
    /// If the key is already cached (the walker raced with itself) the
    /// existing entry is returned, provided it holds the same PTE.
    pub fn try_insert(
        &mut self,
        vaddr: u64,
        pte: PageTableEntry,
        mode: LegacyMode,
    ) -> Result<&TranslationCacheEntry, CacheError> {
        let slot = self.insert_slot(vaddr, pte, mode)?;
        Ok(&self.slots[slot])
    }

    /// Like [`try_insert`](Self::try_insert), but a contract violation is
    /// fatal.
    pub fn insert(
        &mut self,
        vaddr: u64,
        pte: PageTableEntry,
        mode: LegacyMode,
    ) -> &TranslationCacheEntry {
        match self.insert_slot(vaddr, pte, mode) {
            Ok(slot) => &self.slots[slot],
            Err(err) => panic!("{}: {err}", self.name),
        }
    }

    /// Find the cached walk step for `vaddr`. A hit refreshes the entry's
    /// recency unless `update_lru` is false.
    pub fn try_lookup(
        &mut self,
        vaddr: u64,
        mode: LegacyMode,
        update_lru: bool,
    ) -> Result<Option<&TranslationCacheEntry>, CacheError> {
        let slot = self.lookup_slot(vaddr, mode, update_lru)?;
        Ok(slot.map(|slot| &self.slots[slot]))
    }

    /// Like [`try_lookup`](Self::try_lookup), but a contract violation is
    /// fatal.
    pub fn lookup(
        &mut self,
        vaddr: u64,
        mode: LegacyMode,
        update_lru: bool,
    ) -> Option<&TranslationCacheEntry> {
        match self.lookup_slot(vaddr, mode, update_lru) {
            Ok(slot) => slot.map(|slot| &self.slots[slot]),
            Err(err) => panic!("{}: {err}", self.name),
        }
    }

    fn insert_slot(
        &mut self,
        vaddr: u64,
        pte: PageTableEntry,
        mode: LegacyMode,
    ) -> Result<usize, CacheError> {
        let key = self.level.key(vaddr, mode)?;

        if let Some(slot) = self.index.lookup(key).copied() {
            let existing = &self.slots[slot];
            debug_assert_eq!(existing.key, key);
            if existing.next_step != pte {
                return Err(CacheError::ConflictingEntry {
                    level: self.level,
                    key,
                    cached: existing.next_step,
                    incoming: pte,
                });
            }
            return Ok(slot);
        }

        if self.free_list.is_empty() {
            self.evict_lru();
        }
        let Some(slot) = self.free_list.pop_front() else {
            unreachable!("{}: eviction left no free slot", self.name);
        };

        let seq = self.next_seq();
        let handle = self.index.insert(key, self.level.prefix_width(), slot);
        let entry = &mut self.slots[slot];
        entry.key = key;
        entry.next_step = pte;
        entry.lru_seq = seq;
        entry.index_handle = Some(handle);
        self.stats.insert += 1;
        log::trace!("{}: insert key {:#x} -> slot {}", self.name, key, slot);
        Ok(slot)
    }

    fn lookup_slot(
        &mut self,
        vaddr: u64,
        mode: LegacyMode,
        update_lru: bool,
    ) -> Result<Option<usize>, CacheError> {
        let key = self.level.key(vaddr, mode)?;
        let Some(slot) = self.index.lookup(key).copied() else {
            self.stats.miss += 1;
            return Ok(None);
        };

        self.stats.hit += 1;
        if update_lru {
            let seq = self.next_seq();
            self.slots[slot].lru_seq = seq;
        }
        Ok(Some(slot))
    }

    /// Drop every entry. CR3 and CR4 writes always invalidate the whole
    /// paging-structure cache, so there is no selective variant.
    pub fn flush(&mut self) {
        let mut dropped = 0usize;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if let Some(handle) = entry.index_handle.take() {
                self.index.remove(handle);
                self.free_list.push_back(slot);
                dropped += 1;
            }
        }
        debug_assert!(self.index.is_empty());
        self.stats.flush += 1;
        log::debug!("{}: flushed {} entries", self.name, dropped);
    }

    /// Free the occupied slot with the oldest stamp. Ties go to the lowest
    /// slot index.
    fn evict_lru(&mut self) {
        let mut lru = 0;
        for (slot, entry) in self.slots.iter().enumerate().skip(1) {
            if entry.lru_seq < self.slots[lru].lru_seq {
                lru = slot;
            }
        }

        let entry = &mut self.slots[lru];
        let Some(handle) = entry.index_handle.take() else {
            unreachable!("{}: evicting unoccupied slot {}", self.name, lru);
        };
        self.index.remove(handle);
        self.free_list.push_back(lru);
        self.stats.evict += 1;
        log::trace!("{}: evict key {:#x} from slot {}", self.name, entry.key, lru);
    }

    /// Occupancy and counters, e.g. for end-of-run reports.
    pub fn stats_line(&self) -> String {
        let s = self.stats;
        format!(
            "{}/{} used, hit={} miss={} insert={} evict={} flush={} ({:.1}% hits)",
            self.len(),
            self.capacity(),
            s.hit,
            s.miss,
            s.insert,
            s.evict,
            s.flush,
            s.hit_rate() * 100.0
        )
    }

    /// Occupied entries, in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &TranslationCacheEntry> {
        self.slots.iter().filter(|entry| entry.is_occupied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pde_cache(capacity: usize) -> TranslationCache {
        TranslationCache::new("test.pdeCache", Level::Pde, capacity).expect("cache")
    }

    fn pte(raw: u64) -> PageTableEntry {
        PageTableEntry(raw)
    }

    /// Base of the n-th 2 MB region; distinct PDE keys.
    fn region(n: u64) -> u64 {
        n << 21
    }

    #[test]
    fn insert_then_lookup_returns_inserted_entry() {
        let mut tc = pde_cache(4);
        let inserted = tc.insert(0x7FFF_1234_5678, pte(0x1000_0003), LegacyMode::Off);
        assert_eq!(inserted.next_step, pte(0x1000_0003));
        assert_eq!(inserted.key, 0x7FFF_1220_0000);

        let hit = tc.lookup(0x7FFF_1234_5678, LegacyMode::Off, true).expect("hit");
        assert_eq!(hit.next_step, pte(0x1000_0003));
        assert_eq!(tc.stats().hit, 1);
        assert_eq!(tc.stats().insert, 1);
    }

    #[test]
    fn lookup_covers_whole_region() {
        let mut tc = pde_cache(4);
        tc.insert(0x4000_0000, pte(0xABC_0001), LegacyMode::Off);
        assert!(tc.lookup(0x401F_FFFF, LegacyMode::Off, true).is_some());
        assert!(tc.lookup(0x4020_0000, LegacyMode::Off, true).is_none());
        assert_eq!(tc.stats().miss, 1);
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut tc = pde_cache(4);
        let first = tc.insert(region(3), pte(0x5003), LegacyMode::Off).clone();
        let second = tc.insert(region(3) + 0x1000, pte(0x5003), LegacyMode::Off).clone();

        assert_eq!(tc.len(), 1);
        assert_eq!(first.key, second.key);
        assert_eq!(first.next_step, second.next_step);
        assert_eq!(first.lru_seq, second.lru_seq);
        assert_eq!(tc.stats().insert, 1);
    }

    #[test]
    fn conflicting_insert_is_rejected() {
        let mut tc = pde_cache(4);
        tc.insert(region(1), pte(0x1003), LegacyMode::Off);
        let err = tc.try_insert(region(1), pte(0x2003), LegacyMode::Off).unwrap_err();
        assert_eq!(
            err,
            CacheError::ConflictingEntry {
                level: Level::Pde,
                key: region(1),
                cached: pte(0x1003),
                incoming: pte(0x2003),
            }
        );
        assert_eq!(tc.lookup(region(1), LegacyMode::Off, false).unwrap().next_step, pte(0x1003));
    }

    #[test]
    #[should_panic(expected = "test.pdeCache: pde cache key")]
    fn conflicting_insert_is_fatal() {
        let mut tc = pde_cache(2);
        tc.insert(region(1), pte(0x1003), LegacyMode::Off);
        tc.insert(region(1), pte(0x2003), LegacyMode::Off);
    }

    #[test]
    fn pae_pde_keys_share_bits_31_21() {
        let mut tc = pde_cache(4);
        tc.insert(0x8060_0000, pte(0x77_0001), LegacyMode::Pae32);

        for vaddr in [0x8060_0000u64, 0x8060_0FFF, 0x807F_FFFF, 0xFFFF_FFFF_807F_F000] {
            let hit = tc.lookup(vaddr, LegacyMode::Pae32, true);
            assert_eq!(hit.map(|e| e.next_step), Some(pte(0x77_0001)), "{vaddr:#x}");
        }
        assert!(tc.lookup(0x8080_0000, LegacyMode::Pae32, true).is_none());
        assert!(tc.lookup(0x8040_0000, LegacyMode::Pae32, true).is_none());
    }

    #[test]
    fn non_pae_pde_keys_share_bits_31_22() {
        let mut tc = pde_cache(4);
        tc.insert(0x8040_0000, pte(0x88_0001), LegacyMode::NoPae32);

        for vaddr in [0x8040_0000u64, 0x8060_0000, 0x807F_FFFF] {
            assert!(tc.lookup(vaddr, LegacyMode::NoPae32, true).is_some(), "{vaddr:#x}");
        }
        assert!(tc.lookup(0x8080_0000, LegacyMode::NoPae32, true).is_none());
        assert!(tc.lookup(0x803F_FFFF, LegacyMode::NoPae32, true).is_none());
    }

    #[test]
    #[should_panic(expected = "pml4 cache cannot be used in legacy mode pae")]
    fn pml4_rejects_legacy_mode() {
        let mut tc = TranslationCache::new("test.pml4Cache", Level::Pml4, 2).expect("cache");
        tc.lookup(0x1000, LegacyMode::Pae32, true);
    }

    #[test]
    fn illegal_mode_leaves_cache_untouched() {
        let mut tc = TranslationCache::new("test.pdpCache", Level::Pdp, 2).expect("cache");
        let err = tc.try_insert(0x1000, pte(1), LegacyMode::NoPae32).unwrap_err();
        assert!(matches!(err, CacheError::IllegalMode { level: Level::Pdp, mode: LegacyMode::NoPae32 }));
        assert!(tc.is_empty());
        assert_eq!(tc.stats(), TranslationCacheStats::default());
    }

    #[test]
    fn full_cache_evicts_least_recently_used() {
        let mut tc = pde_cache(3);
        for n in 0..3 {
            tc.insert(region(n), pte(0x1000 * (n + 1) | 1), LegacyMode::Off);
        }
        // Touch region 0 so region 1 becomes the oldest.
        assert!(tc.lookup(region(0), LegacyMode::Off, true).is_some());

        tc.insert(region(3), pte(0x4001), LegacyMode::Off);
        assert_eq!(tc.stats().evict, 1);
        assert_eq!(tc.len(), 3);

        assert!(tc.lookup(region(1), LegacyMode::Off, false).is_none());
        for n in [0, 2, 3] {
            assert!(tc.lookup(region(n), LegacyMode::Off, false).is_some(), "region {n}");
        }
    }

    #[test]
    fn lookup_without_lru_update_keeps_eviction_order() {
        let mut tc = pde_cache(2);
        tc.insert(region(0), pte(0x1001), LegacyMode::Off);
        tc.insert(region(1), pte(0x2001), LegacyMode::Off);

        let before = tc.lookup(region(0), LegacyMode::Off, false).unwrap().lru_seq;
        assert_eq!(tc.lookup(region(0), LegacyMode::Off, false).unwrap().lru_seq, before);

        tc.insert(region(2), pte(0x3001), LegacyMode::Off);
        assert!(tc.lookup(region(0), LegacyMode::Off, false).is_none());
        assert!(tc.lookup(region(1), LegacyMode::Off, false).is_some());
    }

    #[test]
    fn lookup_with_lru_update_protects_entry() {
        let mut tc = pde_cache(2);
        tc.insert(region(0), pte(0x1001), LegacyMode::Off);
        tc.insert(region(1), pte(0x2001), LegacyMode::Off);

        tc.lookup(region(0), LegacyMode::Off, true);
        tc.insert(region(2), pte(0x3001), LegacyMode::Off);
        assert!(tc.lookup(region(0), LegacyMode::Off, false).is_some());
        assert!(tc.lookup(region(1), LegacyMode::Off, false).is_none());
    }

    #[test]
    fn flush_clears_everything_and_restores_free_list() {
        let mut tc = pde_cache(4);
        for n in 0..6 {
            tc.insert(region(n), pte(n << 12 | 1), LegacyMode::Off);
        }
        assert_eq!(tc.free_slots(), 0);

        tc.flush();
        assert!(tc.is_empty());
        assert_eq!(tc.free_slots(), 4);
        for n in 0..6 {
            assert!(tc.lookup(region(n), LegacyMode::Off, true).is_none());
        }

        let evictions = tc.stats().evict;
        for n in 0..4 {
            tc.insert(region(n + 10), pte(1), LegacyMode::Off);
        }
        assert_eq!(tc.stats().evict, evictions);
        assert_eq!(tc.stats().flush, 1);
        assert_eq!(tc.entries().count(), 4);
    }

    #[test]
    fn occupied_and_free_slots_partition_the_pool() {
        let mut tc = pde_cache(3);
        let check = |tc: &TranslationCache| {
            let occupied = tc.slots.iter().filter(|e| e.index_handle.is_some()).count();
            assert_eq!(occupied + tc.free_list.len(), tc.capacity());
            assert_eq!(occupied, tc.index.len());
            for &slot in &tc.free_list {
                assert!(tc.slots[slot].index_handle.is_none());
            }
        };

        check(&tc);
        for n in 0..5 {
            tc.insert(region(n), pte(1), LegacyMode::Off);
            check(&tc);
        }
        tc.lookup(region(3), LegacyMode::Off, true);
        tc.insert(region(9), pte(1), LegacyMode::Off);
        check(&tc);
        tc.flush();
        check(&tc);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            TranslationCache::new("x", Level::Pdp, 0).unwrap_err(),
            CacheError::ZeroCapacity { level: Level::Pdp }
        );
    }

    #[test]
    fn hit_rate_counts_hits_over_lookups() {
        let mut tc = pde_cache(1);
        assert_eq!(tc.stats().hit_rate(), 0.0);
        tc.insert(0, pte(1), LegacyMode::Off);
        tc.lookup(0, LegacyMode::Off, true);
        tc.lookup(region(1), LegacyMode::Off, true);
        assert_eq!(tc.stats().lookups(), 2);
        assert!((tc.stats().hit_rate() - 0.5).abs() < f64::EPSILON);

        tc.reset_stats();
        assert_eq!(tc.stats(), TranslationCacheStats::default());
    }
}
