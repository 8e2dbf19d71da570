//! Generic set-associative cache (spec §4.1).
//!
//! Grounded on `Cache_cpp<T>` in `original_source/src/libs/cache_lib/cache.h`
//! for the operation set (`access`/`probe`/`insert`/`invalidate`/next-repl
//! lookup) and on the teacher's `cache::data::Data<MC, CC>` for the Rust
//! shape: a generic payload type, a `Builder`, and `log::trace!`/`debug!` at
//! the same granularity the teacher logs tag-array hits and fills.

use crate::address::AddressMap;
use crate::block::{CacheAddress, Line};
use crate::replacement::ReplacementEngine;
use log::trace;

/// Outcome of a tag-store probe (spec §4.1 `probe`/`access`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit(CacheAddress),
    Miss,
}

/// A single cache instance: one `AddressMap`, a dense `sets * assoc` grid of
/// [`Line<T>`], and a [`ReplacementEngine`]. Shadow caches (spec §4.6's
/// per-core miss-curve tracking) reuse this same type with `T = ()`.
#[derive(Debug)]
pub struct Cache<T> {
    name: String,
    map: AddressMap,
    assoc: usize,
    lines: Vec<Vec<Line<T>>>,
    engine: ReplacementEngine,
}

pub struct Builder {
    pub name: String,
    pub line_size: u32,
    pub num_sets: usize,
    pub assoc: usize,
    pub engine: ReplacementEngine,
}

impl Builder {
    #[must_use]
    pub fn build<T>(self) -> Cache<T> {
        let map = AddressMap::new(self.line_size, self.num_sets);
        let lines = (0..self.num_sets)
            .map(|_| (0..self.assoc).map(|_| Line::default()).collect())
            .collect();
        Cache {
            name: self.name,
            map,
            assoc: self.assoc,
            lines,
            engine: self.engine,
        }
    }
}

impl<T> Cache<T> {
    #[must_use]
    pub fn address_map(&self) -> &AddressMap {
        &self.map
    }

    #[must_use]
    pub fn assoc(&self) -> usize {
        self.assoc
    }

    /// Read-only tag-store probe: does `addr` hit, without updating
    /// replacement state. Ported from `Cache_cpp::probe`.
    #[must_use]
    pub fn probe(&self, addr: crate::address::Address) -> Lookup {
        let d = self.map.decompose(addr);
        let set = &self.lines[d.set];
        for (way, line) in set.iter().enumerate() {
            if line.valid && line.tag == d.tag {
                return Lookup::Hit(CacheAddress::at(d.set, way));
            }
        }
        Lookup::Miss
    }

    /// Tag-store probe that also updates replacement state on a hit, ported
    /// from `Cache_cpp::access`.
    pub fn access(&mut self, addr: crate::address::Address, now: u64) -> Lookup {
        let d = self.map.decompose(addr);
        let set_idx = d.set;
        let hit_way = self.lines[set_idx]
            .iter()
            .enumerate()
            .find(|(_, line)| line.valid && line.tag == d.tag)
            .map(|(way, _)| way);

        match hit_way {
            Some(way) => {
                let line = &mut self.lines[set_idx][way];
                self.engine.on_access(&mut line.meta, now);
                trace!(
                    "cache[{}]: hit set={set_idx} way={way} addr={addr:#x}",
                    self.name
                );
                Lookup::Hit(CacheAddress::at(set_idx, way))
            }
            None => Lookup::Miss,
        }
    }

    /// Finds the way that would be evicted if `addr` were inserted right now,
    /// without mutating any state (spec §4.1 `get_next_repl_line`, used by
    /// the partitioner's shadow-cache miss-curve probe (spec §4.6) and by
    /// `lifecycle.rs` to predict whether a fill would evict a pending line).
    #[must_use]
    pub fn next_victim(&self, addr: crate::address::Address) -> CacheAddress {
        self.next_victim_within(addr, &self.all_ways(self.map.set_index(addr)))
    }

    /// As [`Self::next_victim`], but restricted to the way subset `ways`
    /// (spec §4.6: the partitioner hands the replacement engine only the
    /// ways allotted to the requesting core).
    #[must_use]
    pub fn next_victim_within(
        &self,
        addr: crate::address::Address,
        ways: &[usize],
    ) -> CacheAddress {
        let set_idx = self.map.set_index(addr);
        let candidates: Vec<CacheAddress> = ways
            .iter()
            .map(|&w| CacheAddress::at(set_idx, w))
            .collect();
        let mut metas: Vec<_> = ways.iter().map(|&w| self.lines[set_idx][w].meta).collect();
        let idx = self.engine.select_victim(&candidates, &mut metas);
        candidates[idx]
    }

    fn all_ways(&self, set: usize) -> Vec<usize> {
        let _ = set;
        (0..self.assoc).collect()
    }

    /// Installs a new line at the way chosen by [`Self::next_victim_within`],
    /// evicting whatever was there. Returns the line that was evicted (if
    /// valid and dirty, the caller must schedule a writeback -- spec §4.7).
    pub fn insert(
        &mut self,
        addr: crate::address::Address,
        proc_id: usize,
        is_prefetch: bool,
        data: T,
        now: u64,
        ways: &[usize],
    ) -> (CacheAddress, Option<Line<T>>) {
        let d = self.map.decompose(addr);
        let victim = self.next_victim_within(addr, ways);
        let evicted = if self.lines[victim.set][victim.way].valid {
            Some(std::mem::replace(
                &mut self.lines[victim.set][victim.way],
                Line::default(),
            ))
        } else {
            None
        };

        let line = &mut self.lines[victim.set][victim.way];
        line.valid = true;
        line.dirty = false;
        line.tag = d.tag;
        line.proc_id = proc_id;
        line.data = Some(data);
        self.engine
            .on_insert(&mut line.meta, now, proc_id, is_prefetch);

        trace!(
            "cache[{}]: insert set={} way={} addr={addr:#x} evicted={}",
            self.name,
            victim.set,
            victim.way,
            evicted.is_some()
        );
        (victim, evicted)
    }

    #[must_use]
    pub fn line(&self, at: CacheAddress) -> &Line<T> {
        &self.lines[at.set][at.way]
    }

    /// All ways of one set, for callers that need to rank lines by recency
    /// themselves (the partitioner's shadow-cache LRU-stack-position
    /// histogram, spec §4.6 step 2).
    #[must_use]
    pub fn set_lines(&self, set: usize) -> &[Line<T>] {
        &self.lines[set]
    }

    #[must_use]
    pub fn line_mut(&mut self, at: CacheAddress) -> &mut Line<T> {
        &mut self.lines[at.set][at.way]
    }

    pub fn invalidate(&mut self, at: CacheAddress) {
        let line = &mut self.lines[at.set][at.way];
        self.engine.on_invalidate(&mut line.meta);
        line.invalidate();
    }

    /// Marks the line at `at` dirty, e.g. on a write hit (spec §4.1 edge
    /// case: "a write hit marks the line dirty without touching tag/way").
    pub fn mark_dirty(&mut self, at: CacheAddress) {
        self.lines[at.set][at.way].dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replacement::ReplacementPolicy;

    fn small_cache() -> Cache<u8> {
        Builder {
            name: "test".into(),
            line_size: 64,
            num_sets: 4,
            assoc: 2,
            engine: ReplacementEngine::new(ReplacementPolicy::TrueLru),
        }
        .build()
    }

    #[test]
    fn miss_then_hit_after_insert() {
        let mut c = small_cache();
        let addr = 0x1000;
        assert_eq!(c.probe(addr), Lookup::Miss);
        let ways: Vec<usize> = (0..c.assoc()).collect();
        let (at, evicted) = c.insert(addr, 0, false, 7, 10, &ways);
        assert!(evicted.is_none());
        assert_eq!(c.access(addr, 11), Lookup::Hit(at));
        assert_eq!(c.line(at).data, Some(7));
    }

    #[test]
    fn fills_all_ways_before_evicting() {
        let mut c = small_cache();
        let ways: Vec<usize> = (0..c.assoc()).collect();
        let (a1, e1) = c.insert(0x0000, 0, false, 1, 1, &ways);
        let (a2, e2) = c.insert(0x4000, 0, false, 2, 2, &ways);
        assert!(e1.is_none() && e2.is_none());
        assert_ne!(a1.way, a2.way);
    }

    #[test]
    fn lru_evicts_oldest_access() {
        let mut c = small_cache();
        let ways: Vec<usize> = (0..c.assoc()).collect();
        let (a1, _) = c.insert(0x0000, 0, false, 1, 1, &ways);
        let (_a2, _) = c.insert(0x4000, 0, false, 2, 2, &ways);
        c.access(0x4000, 5); // touch way 2 so way 1 becomes the LRU victim
        let (a3, evicted) = c.insert(0x8000, 0, false, 3, 6, &ways);
        assert_eq!(a3.way, a1.way);
        assert_eq!(evicted.unwrap().data, Some(1));
    }

    #[test]
    fn invalidate_clears_tag_store_and_meta() {
        let mut c = small_cache();
        let ways: Vec<usize> = (0..c.assoc()).collect();
        let (at, _) = c.insert(0x1000, 0, false, 9, 1, &ways);
        c.invalidate(at);
        assert!(!c.line(at).valid);
        assert_eq!(c.probe(0x1000), Lookup::Miss);
    }
}
