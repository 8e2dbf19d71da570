//! Per-(set, way) storage: tag-store entry and replacement metadata fused
//! into one struct.
//!
//! Spec §9 flags the original's split between `Cache_entry` (tag store) and
//! a parallel `repl_data` grid as a duplicated-`valid`-bit hazard
//! (`original_source/src/libs/cache_lib/cache.h` + `repl.h`/`repl.cc` keep two
//! `valid` bits that must stay in lock-step). The reimplementation is
//! "encouraged to hold replacement metadata and tag store in a single
//! per-way struct to make this impossible by construction" -- this module is
//! that struct.

use crate::address::Address;

/// Replacement metadata for one way, grounded on `Repl_Data` in
/// `original_source/src/libs/cache_lib/repl.h`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplMeta {
    pub prefetch: bool,
    pub insert_cycle: u64,
    pub access_cycle: u64,
    /// 2-bit SRRIP re-reference prediction value, 0..=3.
    pub rrpv: u8,
    pub owner: usize,
}

/// One cache line: tag-store fields plus the replacement metadata that used
/// to live in a parallel grid. `valid` is the single source of truth for
/// both purposes.
#[derive(Debug, Clone)]
pub struct Line<T> {
    pub valid: bool,
    pub dirty: bool,
    pub tag: Address,
    pub proc_id: usize,
    pub data: Option<T>,
    pub meta: ReplMeta,
}

impl<T> Default for Line<T> {
    fn default() -> Self {
        Self {
            valid: false,
            dirty: false,
            tag: 0,
            proc_id: 0,
            data: None,
            meta: ReplMeta {
                access_cycle: u64::MAX,
                insert_cycle: u64::MAX,
                ..ReplMeta::default()
            },
        }
    }
}

impl<T> Line<T> {
    #[must_use]
    pub fn is_valid_prefetch_untouched(&self) -> bool {
        self.valid && self.meta.prefetch
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
        self.dirty = false;
        self.tag = 0;
        self.data = None;
        self.meta.access_cycle = u64::MAX;
        self.meta.insert_cycle = u64::MAX;
        self.meta.prefetch = false;
    }
}

/// Per-line fill metadata (spec §4.7 step 2): the bits a fill carries along
/// beside the tag-store/replacement state in [`Line`], grounded on the
/// `Mem_Req_Info`-derived fields `l1_fill_line` stamps onto a freshly
/// installed `Cache_entry` in `original_source/src/memory/memory.c`.
///
/// `was_prefetch` is distinct from [`ReplMeta::prefetch`]: the latter is
/// cleared by the first access after fill (it drives eviction-time LRU/MRU
/// tie-breaks) while `was_prefetch` and `first_use_cycle` persist for the
/// lifetime of the line so an eviction can still tell the prefetcher whether
/// the line it's dropping was ever a demand-touched prefetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePayload {
    pub prefetcher_id: Option<u8>,
    pub pref_load_pc: Address,
    pub global_hist: u32,
    pub fetched_by_offpath: bool,
    pub fill_cycle: u64,
    pub was_prefetch: bool,
    pub first_use_cycle: Option<u64>,
}

/// Returned by search/insert/invalidate so callers can re-access a specific
/// line without retagging (spec §3 `CacheAddress`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAddress {
    pub valid: bool,
    pub set: usize,
    pub way: usize,
}

impl CacheAddress {
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            valid: false,
            set: 0,
            way: 0,
        }
    }

    #[must_use]
    pub fn at(set: usize, way: usize) -> Self {
        Self {
            valid: true,
            set,
            way,
        }
    }
}
