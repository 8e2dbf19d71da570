//! Fill and write-back logic (spec §4.7): installing a line once a miss
//! comes back, and the writeback request that follows when the evicted line
//! was dirty.
//!
//! Grounded on `l1_fill_line`/`mlc_fill_line` in
//! `original_source/src/memory/memory.c`: look up the replacement victim
//! *without* installing yet, and if it's dirty, try to allocate a writeback
//! request first -- a writeback that can't be allocated (buffer pool full)
//! means the whole fill must be retried next cycle rather than silently
//! losing the dirty data, so `fill_line` reports that as a capacity failure
//! (`FillOutcome::Retry`), never a panic or a dropped write.

use crate::address::Address;
use crate::block::{CacheAddress, Line};
use crate::buffer_pool::RequestBufferPool;
use crate::cache::Cache;
use crate::request::{Builder, RequestType};

#[derive(Debug)]
pub enum FillOutcome<T> {
    /// Line installed; no writeback was needed. `evicted` is the line that
    /// occupied `at` before (spec §4.7 step 2: the caller needs this to tell
    /// the prefetcher the line is gone, not just that a slot was reused).
    Installed {
        at: CacheAddress,
        evicted: Option<Line<T>>,
    },
    /// Line installed; a writeback request for `addr` was enqueued into the
    /// buffer pool under id `wb_id` and still needs to reach a bus/mem queue.
    InstalledWithWriteback {
        wb_id: usize,
        addr: Address,
        at: CacheAddress,
        evicted: Option<Line<T>>,
    },
    /// The evicted line was dirty but no writeback request could be
    /// allocated (buffer pool full) -- spec §7 capacity failure, caller
    /// should retry next cycle without having mutated the cache.
    Retry,
}

/// Installs `addr` into `cache`, restricted to `ways` (the partitioner's
/// allotted way subset, or all ways when partitioning is off -- spec §4.6
/// step 4). Writes back the victim first if it was dirty.
#[allow(clippy::too_many_arguments)]
pub fn fill_line<T>(
    cache: &mut Cache<T>,
    pool: &mut RequestBufferPool,
    ways: &[usize],
    addr: Address,
    proc_id: usize,
    is_prefetch: bool,
    data: T,
    now: u64,
    ignore_writeback: bool,
    write_through: bool,
) -> FillOutcome<T> {
    let victim = cache.next_victim_within(addr, ways);
    let victim_line = cache.line(victim);
    let needs_writeback =
        victim_line.valid && victim_line.dirty && !write_through && !ignore_writeback;

    if needs_writeback {
        let evicted_tag = victim_line.tag;
        let evicted_proc = victim_line.proc_id;
        let evicted_addr = cache.address_map().reassemble(evicted_tag, victim.set);

        let wb = Builder {
            id: 0,
            proc_id: evicted_proc,
            unique_num: 0,
            ty: RequestType::Wb,
            addr: evicted_addr,
            phys_addr: evicted_addr,
            size: cache.address_map().line_size(),
            mlc_bank: 0,
            l1_bank: 0,
            mem_bank: 0,
            mem_channel: 0,
            start_cycle: now,
            off_path: false,
            dirty_l0: true,
            done_func: None,
        };
        let Some(wb_id) = pool.allocate(wb) else {
            return FillOutcome::Retry;
        };
        let (at, evicted) = cache.insert(addr, proc_id, is_prefetch, data, now, ways);
        return FillOutcome::InstalledWithWriteback {
            wb_id,
            addr: evicted_addr,
            at,
            evicted,
        };
    }

    let (at, evicted) = cache.insert(addr, proc_id, is_prefetch, data, now, ways);
    FillOutcome::Installed { at, evicted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Builder as CacheBuilder, Lookup};
    use crate::config::BufferPoolConfig;
    use crate::replacement::{ReplacementEngine, ReplacementPolicy};

    fn cache() -> Cache<u8> {
        CacheBuilder {
            name: "l1".into(),
            line_size: 64,
            num_sets: 4,
            assoc: 2,
            engine: ReplacementEngine::new(ReplacementPolicy::TrueLru),
        }
        .build()
    }

    fn pool() -> RequestBufferPool {
        RequestBufferPool::new(
            BufferPoolConfig {
                total_entries: 4,
                per_core_quota: 4,
                prefetch_high_watermark: 0.9,
                prefetch_low_watermark: 0.1,
                wb_valve: 0,
            },
            1,
        )
    }

    #[test]
    fn clean_eviction_needs_no_writeback() {
        let mut c = cache();
        let mut p = pool();
        let ways: Vec<usize> = (0..c.assoc()).collect();
        fill_line(&mut c, &mut p, &ways, 0x0000, 0, false, 1, 1, false, false);
        fill_line(&mut c, &mut p, &ways, 0x4000, 0, false, 2, 2, false, false);
        let outcome = fill_line(&mut c, &mut p, &ways, 0x8000, 0, false, 3, 3, false, false);
        assert!(matches!(outcome, FillOutcome::Installed { .. }));
    }

    #[test]
    fn dirty_eviction_schedules_writeback() {
        let mut c = cache();
        let mut p = pool();
        let ways: Vec<usize> = (0..c.assoc()).collect();
        let (a1, _) = c.insert(0x0000, 0, false, 1u8, 1, &ways);
        let (a2, _) = c.insert(0x4000, 0, false, 2u8, 2, &ways);
        c.mark_dirty(a1);
        c.access(0x4000, 3); // make way holding 0x0000 the LRU victim
        let _ = a2;
        let outcome = fill_line(&mut c, &mut p, &ways, 0x8000, 0, false, 3u8, 4, false, false);
        match outcome {
            FillOutcome::InstalledWithWriteback { wb_id, .. } => {
                let wb = p.get(wb_id).unwrap();
                assert_eq!(wb.ty, RequestType::Wb);
            }
            other => panic!("expected writeback, got {other:?}"),
        }
        assert_eq!(c.probe(0x8000), Lookup::Hit(a1));
    }

    #[test]
    fn writeback_retried_when_pool_is_full() {
        let mut c = cache();
        let mut p = RequestBufferPool::new(
            BufferPoolConfig {
                total_entries: 0,
                per_core_quota: 0,
                prefetch_high_watermark: 0.9,
                prefetch_low_watermark: 0.1,
                wb_valve: 0,
            },
            1,
        );
        let ways: Vec<usize> = (0..c.assoc()).collect();
        let (a1, _) = c.insert(0x0000, 0, false, 1u8, 1, &ways);
        c.mark_dirty(a1);
        let before = c.line(a1).tag;
        let outcome = fill_line(&mut c, &mut p, &ways, 0x4000, 0, false, 2u8, 2, false, false);
        assert!(matches!(outcome, FillOutcome::Retry));
        assert_eq!(c.line(a1).tag, before); // cache left untouched on retry
    }
}
