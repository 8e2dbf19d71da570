//! Request buffer pool: fixed-capacity slot array with per-core quotas and
//! hysteresis-gated prefetch admission (spec §4.3).
//!
//! Grounded on `mem_can_allocate_req_buffer`/`mem_allocate_req_buffer`/
//! `mem_init_new_req` in `original_source/src/memory/memory.c`. The original
//! scans a flat array for `req->state == MRS_INV`; here that's a free list so
//! allocation is O(1) instead of an O(n) scan, which changes performance
//! characteristics but not the externally visible admission policy the spec
//! describes.

use crate::config::BufferPoolConfig;
use crate::request::{Builder, Request, RequestType};

#[derive(Debug)]
pub struct RequestBufferPool {
    config: BufferPoolConfig,
    slots: Vec<Option<Request>>,
    free: Vec<usize>,
    per_core_count: Vec<usize>,
    /// Hysteresis latch: once usage crosses the high watermark, new
    /// prefetches are refused until usage drops back under the low
    /// watermark, matching the original's two-threshold admission gate
    /// (avoids rapid admit/reject flapping right at one threshold).
    prefetch_throttled: bool,
    next_unique_num: u64,
}

impl RequestBufferPool {
    #[must_use]
    pub fn new(config: BufferPoolConfig, num_cores: usize) -> Self {
        Self {
            slots: (0..config.total_entries).map(|_| None).collect(),
            free: (0..config.total_entries).rev().collect(),
            per_core_count: vec![0; num_cores],
            prefetch_throttled: false,
            next_unique_num: 0,
            config,
        }
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.config.total_entries - self.free.len()
    }

    #[must_use]
    pub fn occupancy(&self) -> f64 {
        self.in_use() as f64 / self.config.total_entries as f64
    }

    fn update_throttle(&mut self) {
        let occ = self.occupancy();
        if occ >= self.config.prefetch_high_watermark {
            self.prefetch_throttled = true;
        } else if occ <= self.config.prefetch_low_watermark {
            self.prefetch_throttled = false;
        }
    }

    /// Spec §4.3 admission check, kept separate from [`Self::allocate`] so
    /// callers (the lifecycle FSM) can decide whether to retry a different
    /// request type or stall without committing a slot.
    ///
    /// Two independent gates beyond plain exhaustion: the prefetch
    /// hysteresis latch (`prefetch_throttled`) and `WB_VALVE`, which
    /// reserves the last `wb_valve` free slots for writebacks only -- a
    /// non-writeback request is refused once free slots drop to or below
    /// that reserve, even if the pool isn't otherwise full.
    #[must_use]
    pub fn can_allocate(&self, proc_id: usize, ty: RequestType) -> bool {
        if self.free.is_empty() {
            return false;
        }
        if self.per_core_count[proc_id] >= self.config.per_core_quota {
            return false;
        }
        if ty.is_prefetch() && self.prefetch_throttled {
            return false;
        }
        if !ty.is_writeback() && self.free.len() <= self.config.wb_valve {
            return false;
        }
        true
    }

    pub fn allocate(&mut self, mut builder: Builder) -> Option<usize> {
        let proc_id = builder.proc_id;
        if !self.can_allocate(proc_id, builder.ty) {
            return None;
        }
        let slot = self.free.pop()?;
        builder.id = slot;
        builder.unique_num = self.next_unique_num;
        self.next_unique_num += 1;
        let req = builder.build();
        self.slots[slot] = Some(req);
        self.per_core_count[proc_id] += 1;
        self.update_throttle();
        Some(slot)
    }

    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Request> {
        self.slots[id].as_ref()
    }

    #[must_use]
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Request> {
        self.slots[id].as_mut()
    }

    /// Releases a slot back to the free list (spec §4.3's `mem_free_reqbuf`
    /// counterpart). Panics if `id` is already free -- a double-free is a
    /// lifecycle bug, not a recoverable condition.
    pub fn free(&mut self, id: usize) -> Request {
        let req = self.slots[id]
            .take()
            .unwrap_or_else(|| panic!("buffer pool: double free of slot {id}"));
        self.per_core_count[req.proc_id] -= 1;
        self.free.push(id);
        self.update_throttle();
        req
    }

    #[must_use]
    pub fn per_core_in_use(&self, proc_id: usize) -> usize {
        self.per_core_count[proc_id]
    }

    /// All currently-allocated requests, for callers that need to scan the
    /// whole pool (e.g. the partitioner's per-core stall-fraction sampling)
    /// rather than look up a single id.
    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestType;

    fn pool(total: usize, quota: usize) -> RequestBufferPool {
        RequestBufferPool::new(
            BufferPoolConfig {
                total_entries: total,
                per_core_quota: quota,
                prefetch_high_watermark: 0.75,
                prefetch_low_watermark: 0.5,
                wb_valve: 0,
            },
            2,
        )
    }

    fn builder(proc_id: usize, ty: RequestType) -> Builder {
        Builder {
            id: 0,
            proc_id,
            unique_num: 0,
            ty,
            addr: 0x1000,
            phys_addr: 0x1000,
            size: 64,
            mlc_bank: 0,
            l1_bank: 0,
            mem_bank: 0,
            mem_channel: 0,
            start_cycle: 0,
            off_path: false,
            dirty_l0: false,
            done_func: None,
        }
    }

    #[test]
    fn allocate_and_free_roundtrip() {
        let mut p = pool(4, 4);
        let id = p.allocate(builder(0, RequestType::Dfetch)).unwrap();
        assert_eq!(p.in_use(), 1);
        let req = p.free(id);
        assert_eq!(req.proc_id, 0);
        assert_eq!(p.in_use(), 0);
    }

    #[test]
    fn per_core_quota_is_enforced() {
        let mut p = pool(8, 2);
        assert!(p.allocate(builder(0, RequestType::Dfetch)).is_some());
        assert!(p.allocate(builder(0, RequestType::Dfetch)).is_some());
        assert!(p.allocate(builder(0, RequestType::Dfetch)).is_none());
        // core 1 is unaffected by core 0's quota.
        assert!(p.allocate(builder(1, RequestType::Dfetch)).is_some());
    }

    #[test]
    fn prefetch_throttled_above_high_watermark_until_low_watermark() {
        let mut p = pool(4, 4);
        // 3/4 = 0.75 >= high watermark -> throttle engages.
        let a = p.allocate(builder(0, RequestType::Dfetch)).unwrap();
        let _b = p.allocate(builder(0, RequestType::Dfetch)).unwrap();
        let _c = p.allocate(builder(0, RequestType::Dfetch)).unwrap();
        assert!(p.allocate(builder(0, RequestType::Dprf)).is_none());
        p.free(a);
        // 2/4 = 0.5 <= low watermark -> throttle releases.
        assert!(p.allocate(builder(0, RequestType::Dprf)).is_some());
    }

    #[test]
    fn wb_valve_reserves_slots_for_writebacks_only() {
        let mut p = RequestBufferPool::new(
            BufferPoolConfig {
                total_entries: 4,
                per_core_quota: 4,
                prefetch_high_watermark: 1.0,
                prefetch_low_watermark: 0.0,
                wb_valve: 1,
            },
            1,
        );
        // Fill down to exactly 1 free slot (the reserve).
        assert!(p.allocate(builder(0, RequestType::Dfetch)).is_some());
        assert!(p.allocate(builder(0, RequestType::Dfetch)).is_some());
        assert!(p.allocate(builder(0, RequestType::Dfetch)).is_some());
        // One free slot left: non-writebacks are refused...
        assert!(!p.can_allocate(0, RequestType::Dfetch));
        // ...but a writeback can still land in it.
        assert!(p.can_allocate(0, RequestType::Wb));
        assert!(p.allocate(builder(0, RequestType::Wb)).is_some());
    }
}
