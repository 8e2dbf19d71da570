//! The request buffer entry (`MemReq` in spec §3) and its supporting enums.
//!
//! Grounded on `original_source/src/memory/mem_req.h` for the field list and
//! on the teacher's `mem_fetch::MemFetch` (`romnn-gpucachesim/src/cache/data.rs`)
//! for the Rust shape: a plain data struct built through a `Builder`, cloned
//! cheaply between queues, carrying a `done_func`-style callback instead of the
//! original's raw C function pointer.

use crate::address::Address;
use bitflags::bitflags;
use std::fmt;

/// Request type, priority-ordered smallest-first exactly as `MRT_LIST` in
/// `mem_req.h` declares it (`IFETCH` is the highest priority, `MinPriority` a
/// sentinel used only to evict a queue entry in-place).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RequestType {
    Ifetch = 0,
    Dfetch = 1,
    Dstore = 2,
    Iprf = 3,
    Dprf = 4,
    Wb = 5,
    WbNoDirty = 6,
    MinPriority = 7,
}

impl RequestType {
    #[must_use]
    pub fn is_demand(self) -> bool {
        matches!(self, Self::Ifetch | Self::Dfetch | Self::Dstore)
    }

    #[must_use]
    pub fn is_prefetch(self) -> bool {
        matches!(self, Self::Iprf | Self::Dprf)
    }

    #[must_use]
    pub fn is_writeback(self) -> bool {
        matches!(self, Self::Wb | Self::WbNoDirty)
    }

    /// Static priority ordinal for `OrderingMode::Priority` queues: lower
    /// sorts first, matching the declaration order of `MRT_LIST` in
    /// `original_source/src/memory/mem_req.h` (IFETCH most urgent). Ties at
    /// equal ordinal are broken by queue insertion order (`QueueEntry::seq`),
    /// which stands in for the original's "age in the low bits" scheme.
    #[must_use]
    pub fn priority_ordinal(self) -> u64 {
        self as u64
    }

    /// Requests that block forward progress of the requester and therefore
    /// feed the partitioner's "stalling" accounting (spec §4.6 step 1).
    #[must_use]
    pub fn is_stalling(self) -> bool {
        self.is_demand()
    }

    /// True if coalescing an instruction-class request with a data-class one
    /// (or vice versa) is never valid, independent of prefetch/demand status.
    #[must_use]
    fn is_instruction_class(self) -> bool {
        matches!(self, Self::Ifetch | Self::Iprf)
    }

    /// Matching table from spec §4.4: can `self` (already in-flight) be
    /// coalesced with an incoming request of type `other`?
    #[must_use]
    pub fn matches(self, other: Self) -> bool {
        if self == other {
            return true;
        }
        if self.is_instruction_class() && other.is_instruction_class() {
            return true;
        }
        if !self.is_instruction_class() && !other.is_instruction_class() {
            // DFETCH/DSTORE/DPRF cross-match in the obvious way; WB is handled
            // by the caller (`cross_type_matching_enabled` gate) since it has
            // extra bookkeeping (`wb_requested_back`) on a successful match.
            return !self.is_writeback() && !other.is_writeback();
        }
        false
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

bitflags! {
    /// Which cache level(s) a request should be filled into. Bitwise per
    /// spec §6 ("Destinations ... bit-wise so that 'which levels fill' is a
    /// bitmask"); `original_source/mem_req.h`'s `Destination_enum` is a plain
    /// C enum of powers of two, ported 1:1 onto `bitflags` since that is the
    /// idiomatic Rust container for this exact shape.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Destination: u8 {
        const NONE   = 0;
        const DCACHE = 1 << 0;
        const ICACHE = 1 << 1;
        const MLC    = 1 << 2;
        const L1     = 1 << 3;
        const MEM    = 1 << 4;
    }
}

/// Request lifecycle state, spec §4.4. Variants marked terminal in the prose
/// are exposed through [`State::is_terminal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Inv,
    MlcNew,
    MlcWait,
    MlcHitDone,
    L1New,
    L1Wait,
    L1HitDone,
    BusNew,
    MemNew,
    MemScheduled,
    MemWait,
    MemDone,
    BusInDone,
    FillL1,
    FillMlc,
    FillDone,
}

impl State {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::MlcHitDone | Self::L1HitDone | Self::MemDone | Self::FillDone
        )
    }

    #[must_use]
    pub fn is_new_state(self) -> bool {
        matches!(self, Self::MlcNew | Self::L1New | Self::MemNew)
    }
}

/// What a `done_func` callback may ask the lifecycle machine to do once the
/// waiting op has been notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    Consumed,
    Retry,
}

/// A waiting op's handle, snapshotted with the `unique_num` it had when it
/// attached so a later dereference can detect staleness (spec §3 Coalescing,
/// spec §9 "cyclic graphs" note: op handles are opaque ids, not pointers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHandle {
    pub id: u64,
    pub unique_num: u64,
}

/// The central long-lived entity: one request-buffer slot (spec §3).
#[derive(Clone)]
pub struct Request {
    // -- Identity --
    pub id: usize,
    pub proc_id: usize,
    pub unique_num: u64,
    pub ty: RequestType,

    // -- Addressing --
    pub addr: Address,
    pub phys_addr: Address,
    pub size: u32,
    pub mlc_bank: usize,
    pub l1_bank: usize,
    pub mem_bank: usize,
    pub mem_channel: usize,

    // -- Lifecycle --
    pub state: State,
    pub priority: u64,

    // -- Timing --
    pub start_cycle: u64,
    pub rdy_cycle: u64,
    pub first_stalling_cycle: Option<u64>,
    pub mlc_miss_cycle: Option<u64>,
    pub l1_miss_cycle: Option<u64>,
    pub mem_queue_cycle: Option<u64>,

    // -- Coalescing --
    pub op_count: u32,
    pub waiters: Vec<OpHandle>,
    pub oldest_op_unique_num: u64,
    pub req_count: u32,
    pub onpath_match_offpath: bool,
    pub demand_match_prefetch: bool,

    // -- Flags --
    pub off_path: bool,
    pub off_path_confirmed: bool,
    pub mlc_miss: bool,
    pub mlc_miss_satisfied: bool,
    pub l1_miss: bool,
    pub l1_miss_satisfied: bool,
    pub wb_requested_back: bool,
    pub dirty_l0: bool,
    pub bw_prefetch: bool,
    pub bw_prefetchable: bool,

    // -- Destination --
    pub destination: Destination,

    // -- Prefetcher info --
    pub prefetcher_id: Option<u8>,
    pub pref_distance: u32,
    pub pref_load_pc: Address,
    pub global_hist: u32,

    // -- Hierarchical-MSHR accounting --
    pub reserved_entry_count: u32,

    /// Mem-queue sequence number: tie-breaks requests of equal priority in
    /// controller-visible ordering, independent of per-queue priority sort.
    pub mem_seq_num: u64,

    /// Invoked once the request reaches a hit/fill-done terminal state to
    /// wake whatever op is waiting on it. A coalesced request can have more
    /// than one op waiting (spec §3/§4.4 Coalescing), so this is a list
    /// rather than a single slot -- every originating caller's callback is
    /// attached here in submission/coalesce order and each fires exactly
    /// once (`lifecycle::notify_waiters` drains the list, re-queuing only
    /// the callbacks that ask for `RetryHint::Retry`). Paired with
    /// `waiters: Vec<OpHandle>`, which records the same callers' handles for
    /// staleness bookkeeping without needing to downcast into the closure.
    #[allow(clippy::type_complexity)]
    pub done_funcs: Vec<Box<dyn FnMut(&Request) -> RetryHint>>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("proc_id", &self.proc_id)
            .field("unique_num", &self.unique_num)
            .field("ty", &self.ty)
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("rdy_cycle", &self.rdy_cycle)
            .field("off_path", &self.off_path)
            .field("off_path_confirmed", &self.off_path_confirmed)
            .field("op_count", &self.op_count)
            .field("req_count", &self.req_count)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request(id={}, {} addr={:#x} state={:?})",
            self.id, self.ty, self.addr, self.state
        )
    }
}

impl Request {
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Builder for a freshly allocated request buffer entry, grounded on
/// `mem_init_new_req` in `original_source/src/memory/memory.c` and on the
/// teacher's `mem_fetch::Builder` idiom.
pub struct Builder {
    pub id: usize,
    pub proc_id: usize,
    pub unique_num: u64,
    pub ty: RequestType,
    pub addr: Address,
    pub phys_addr: Address,
    pub size: u32,
    pub mlc_bank: usize,
    pub l1_bank: usize,
    pub mem_bank: usize,
    pub mem_channel: usize,
    pub start_cycle: u64,
    pub off_path: bool,
    pub dirty_l0: bool,
    #[allow(clippy::type_complexity)]
    pub done_func: Option<Box<dyn FnMut(&Request) -> RetryHint>>,
}

impl Builder {
    #[must_use]
    pub fn build(self) -> Request {
        let first_stalling_cycle = if self.ty.is_stalling() {
            Some(self.start_cycle)
        } else {
            None
        };
        Request {
            id: self.id,
            proc_id: self.proc_id,
            unique_num: self.unique_num,
            ty: self.ty,
            addr: self.addr,
            phys_addr: self.phys_addr,
            size: self.size,
            mlc_bank: self.mlc_bank,
            l1_bank: self.l1_bank,
            mem_bank: self.mem_bank,
            mem_channel: self.mem_channel,
            state: State::Inv,
            priority: 0,
            start_cycle: self.start_cycle,
            rdy_cycle: self.start_cycle,
            first_stalling_cycle,
            mlc_miss_cycle: None,
            l1_miss_cycle: None,
            mem_queue_cycle: None,
            op_count: 0,
            waiters: Vec::new(),
            oldest_op_unique_num: self.unique_num,
            req_count: 1,
            onpath_match_offpath: false,
            demand_match_prefetch: false,
            off_path: self.off_path,
            off_path_confirmed: false,
            mlc_miss: false,
            mlc_miss_satisfied: false,
            l1_miss: false,
            l1_miss_satisfied: false,
            wb_requested_back: false,
            dirty_l0: self.dirty_l0,
            bw_prefetch: false,
            bw_prefetchable: false,
            destination: Destination::NONE,
            prefetcher_id: None,
            pref_distance: 0,
            pref_load_pc: 0,
            global_hist: 0,
            reserved_entry_count: 0,
            mem_seq_num: 0,
            done_funcs: self.done_func.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordinal_matches_declaration_order() {
        assert!(RequestType::Ifetch.priority_ordinal() < RequestType::Dfetch.priority_ordinal());
        assert!(RequestType::Dprf.priority_ordinal() < RequestType::Wb.priority_ordinal());
    }

    #[test]
    fn priority_order_matches_original_mrt_list() {
        assert!(RequestType::Ifetch < RequestType::Dfetch);
        assert!(RequestType::Dfetch < RequestType::Dstore);
        assert!(RequestType::Dstore < RequestType::Iprf);
        assert!(RequestType::Iprf < RequestType::Dprf);
        assert!(RequestType::Dprf < RequestType::Wb);
        assert!(RequestType::Wb < RequestType::WbNoDirty);
        assert!(RequestType::WbNoDirty < RequestType::MinPriority);
    }

    #[test]
    fn ifetch_iprf_cross_match() {
        assert!(RequestType::Ifetch.matches(RequestType::Iprf));
        assert!(RequestType::Iprf.matches(RequestType::Ifetch));
    }

    #[test]
    fn data_classes_cross_match_but_not_writebacks() {
        assert!(RequestType::Dfetch.matches(RequestType::Dprf));
        assert!(RequestType::Dstore.matches(RequestType::Dprf));
        assert!(!RequestType::Wb.matches(RequestType::Dfetch));
        assert!(!RequestType::Dfetch.matches(RequestType::Wb));
    }

    #[test]
    fn instruction_and_data_classes_never_cross_match() {
        assert!(!RequestType::Ifetch.matches(RequestType::Dfetch));
        assert!(!RequestType::Iprf.matches(RequestType::Dprf));
    }

    #[test]
    fn destination_bitmask_is_bitwise_or_able() {
        let d = Destination::MLC | Destination::L1;
        assert!(d.contains(Destination::MLC));
        assert!(d.contains(Destination::L1));
        assert!(!d.contains(Destination::MEM));
    }

    #[test]
    fn terminal_states() {
        assert!(State::MlcHitDone.is_terminal());
        assert!(State::L1HitDone.is_terminal());
        assert!(State::MemDone.is_terminal());
        assert!(State::FillDone.is_terminal());
        assert!(!State::L1Wait.is_terminal());
        assert!(!State::Inv.is_terminal());
    }
}
