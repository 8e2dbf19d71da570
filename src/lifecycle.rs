//! The request lifecycle state machine (spec §4.4), the core of the whole
//! hierarchy: what a request does as it moves between queues and states.
//!
//! This module holds the *pure* decision logic -- given a request and the
//! outcome of a tag-store probe, what state it moves to and what queue it
//! should land in next. [`crate::memory_system::MemorySystem`] owns the
//! queues/caches/buffer pool and drives these functions each cycle, mirroring
//! the split between `mem_process_l1_hit_access`/`mem_process_l1_miss_access`
//! (decision) and `mem_process_l1_reqs` (the queue-draining driver loop) in
//! `original_source/src/memory/memory.c`.

use crate::address::Address;
use crate::buffer_pool::RequestBufferPool;
use crate::request::{Request, RequestType, State};
use log::trace;

/// What the driver should do with a request after a lookup decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stay in the current queue; retry next cycle (e.g. a write port was
    /// unavailable, `mem_start_l1_access`'s `avail == FALSE` path).
    Stall,
    /// Move to `state`, becoming ready at `rdy_cycle`.
    Advance { state: State, rdy_cycle: u64 },
    /// Hit: move into the named fill queue at `priority` so the line reaches
    /// the level above (`MRS_FILL_MLC` / core fill queue transitions).
    EnqueueFill { state: State, priority: u64 },
    /// Hit with nothing above to fill and no waiter: free the slot now
    /// (`mem_free_reqbuf` called inline in `mem_process_l1_hit_access`).
    FreeImmediately,
    /// Miss: hand off to the bus/mem path.
    SendToBus,
}

/// Coalescing/matching lookup: is there already an in-flight request this
/// new one can piggyback on? Ported from `mem_search_reqbuf` +
/// `mem_adjust_matching_request` in `original_source/src/memory/memory.c`,
/// simplified to the matching predicate itself -- bookkeeping updates
/// (`demand_match_prefetch`, `onpath_match_offpath`, `req_count`) are applied
/// by the caller once a match is chosen, not buried in the search.
#[must_use]
pub fn find_coalesce_candidate(
    pool: &RequestBufferPool,
    capacity: usize,
    proc_id: usize,
    line_addr: Address,
    ty: RequestType,
    cross_type_matching: bool,
) -> Option<usize> {
    for id in 0..capacity {
        let Some(other) = pool.get(id) else {
            continue;
        };
        if other.proc_id != proc_id || other.addr != line_addr {
            continue;
        }
        if other.is_final() {
            continue;
        }
        let compatible = other.ty == ty || (cross_type_matching && other.ty.matches(ty));
        if compatible {
            return Some(id);
        }
    }
    None
}

/// Applies the bookkeeping side effects of a successful coalesce: bumps
/// `req_count`, widens `oldest_op_unique_num`, records off-path/prefetch
/// crossing flags, attaches the incoming caller's waiter handle and
/// `done_func` so it still gets woken when the (now-shared) request
/// completes, and promotes `existing.ty` to the incoming demand type when a
/// prefetch is matched by a demand (spec §4.4: "IFETCH<->IPRF: match,
/// prefetch promoted to demand"; spec's S2 scenario: "type promoted to
/// DFETCH ... priority recomputed"). Returns whether a promotion happened,
/// so the caller knows to re-sort whichever unordered queue currently holds
/// `existing`'s id -- this function has no queue handle of its own.
#[allow(clippy::type_complexity)]
pub fn record_coalesce(
    existing: &mut Request,
    incoming_ty: RequestType,
    incoming_off_path: bool,
    incoming_unique_num: u64,
    incoming_done_func: Option<Box<dyn FnMut(&Request) -> crate::request::RetryHint>>,
) -> bool {
    existing.req_count += 1;
    existing.oldest_op_unique_num = existing.oldest_op_unique_num.min(incoming_unique_num);
    existing.waiters.push(crate::request::OpHandle {
        id: existing.op_count as u64,
        unique_num: incoming_unique_num,
    });
    existing.op_count += 1;
    if let Some(cb) = incoming_done_func {
        existing.done_funcs.push(cb);
    }
    if existing.off_path && !incoming_off_path {
        existing.onpath_match_offpath = true;
    }
    if existing.ty.is_prefetch() && incoming_ty.is_demand() {
        existing.demand_match_prefetch = true;
        existing.ty = incoming_ty;
        existing.priority = existing.ty.priority_ordinal();
        return true;
    }
    false
}

/// Decision for an L1 (or MLC) tag-store hit, ported from the control flow
/// of `mem_process_l1_hit_access`: writeback hits complete immediately
/// unless write-through is modeled, everything else either fills the level
/// above or, with nothing above and no waiter, frees its slot on the spot.
#[must_use]
pub fn on_hit(
    req: &Request,
    now: u64,
    fill_above_needed: bool,
    write_through_wb: bool,
) -> Action {
    trace!("lifecycle: hit id={} ty={:?} addr={:#x}", req.id, req.ty, req.addr);
    if write_through_wb && req.ty == RequestType::Wb {
        return Action::Advance {
            state: State::BusNew,
            rdy_cycle: now + 1,
        };
    }
    if fill_above_needed {
        return Action::EnqueueFill {
            state: if matches!(req.ty, RequestType::Wb | RequestType::WbNoDirty) {
                State::L1HitDone
            } else {
                State::FillMlc
            },
            priority: req.priority,
        };
    }
    if req.done_funcs.is_empty() {
        Action::FreeImmediately
    } else {
        Action::Advance {
            state: State::L1HitDone,
            rdy_cycle: now,
        }
    }
}

/// Decision for an L1 (or MLC) tag-store miss, ported from
/// `mem_process_l1_miss_access`. Writebacks on a miss simply insert into the
/// cache (no off-chip traffic); everything else heads to the bus/mem path
/// unless memory bandwidth is modeled as constant-latency and the fill queue
/// is full, which stalls the request in place.
#[must_use]
pub fn on_miss(req: &Request, now: u64, fill_queue_full: bool) -> Action {
    trace!("lifecycle: miss id={} ty={:?} addr={:#x}", req.id, req.ty, req.addr);
    if req.ty.is_writeback() {
        return Action::Advance {
            state: State::FillL1,
            rdy_cycle: now + 1,
        };
    }
    if fill_queue_full {
        return Action::Stall;
    }
    Action::SendToBus
}

/// Invokes every waiter callback attached to `req` exactly once, draining
/// `done_funcs` and keeping only the ones that ask for a retry
/// (`RetryHint::Retry`). Returns whether any callback is still pending
/// afterwards -- callers use this to decide whether the slot can be freed
/// yet (a coalesced request with several waiters may need more than one
/// notification pass before every one of them has been consumed).
pub fn notify_waiters(req: &mut Request) -> bool {
    let callbacks = std::mem::take(&mut req.done_funcs);
    let mut still_pending = Vec::with_capacity(callbacks.len());
    for mut cb in callbacks {
        let hint = cb(req);
        if hint == crate::request::RetryHint::Retry {
            still_pending.push(cb);
        }
    }
    let has_pending = !still_pending.is_empty();
    req.done_funcs = still_pending;
    has_pending
}
