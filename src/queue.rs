//! The per-stage request queue (spec §4.5): MLC-in, L1-in, bus-out, mem-in,
//! fill queues are all one of these with different capacities.
//!
//! Grounded on `mem_insert_req_into_queue`/`mem_insert_req_round_robin` and
//! the prefetch kick-out family (`mem_kick_out_prefetch_from_queue`,
//! `mem_kick_out_prefetch_from_queues`,
//! `mem_kick_out_oldest_first_prefetch_from_queues`) in
//! `original_source/src/memory/memory.c`. Rust shape -- a `Vec` sorted lazily
//! rather than re-sorted on every push -- follows the teacher's queue
//! handling in `romnn-gpucachesim/src/cluster.rs`, which defers reordering to
//! the point of consumption.

use crate::config::OrderingMode;
use crate::request::RequestType;
use log::debug;

/// Outcome of [`Queue::push_with_kickout`]: whether a prefetch had to be
/// evicted to make room, so the caller can free *that* request's
/// buffer-pool slot and notify the prefetcher of the drop -- neither of
/// which this module can do itself, since it has no handle on the pool or
/// the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    PushedAfterKickout { evicted_id: usize },
    Rejected,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueEntry {
    pub id: usize,
    pub ty: RequestType,
    pub priority: u64,
    /// Monotonic insertion order, used as the FIFO key and as a tie-break
    /// under `Priority` ordering (spec §4.5: "ties broken FIFO").
    pub seq: u64,
}

#[derive(Debug)]
pub struct Queue {
    name: String,
    capacity: usize,
    mode: OrderingMode,
    entries: Vec<QueueEntry>,
    sorted: bool,
    next_seq: u64,
}

impl Queue {
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize, mode: OrderingMode) -> Self {
        Self {
            name: name.into(),
            capacity,
            mode,
            entries: Vec::new(),
            sorted: true,
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Appends `id` if there's room. Returns `false` (capacity failure, not
    /// an error per spec §7) if the queue is full; caller should then try
    /// [`Self::kick_out_prefetch`] before giving up.
    pub fn push(&mut self, id: usize, ty: RequestType, priority: u64) -> bool {
        if self.is_full() {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            id,
            ty,
            priority,
            seq,
        });
        self.sorted = false;
        true
    }

    fn ensure_sorted(&mut self) {
        if self.sorted {
            return;
        }
        match self.mode {
            OrderingMode::Fifo => self.entries.sort_by_key(|e| e.seq),
            OrderingMode::Priority => {
                self.entries.sort_by_key(|e| (e.priority, e.seq));
            }
        }
        self.sorted = true;
    }

    /// Removes and returns the next entry to process, per the queue's
    /// ordering mode.
    pub fn pop_next(&mut self) -> Option<QueueEntry> {
        self.ensure_sorted();
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    #[must_use]
    pub fn peek_next(&mut self) -> Option<&QueueEntry> {
        self.ensure_sorted();
        self.entries.first()
    }

    /// Updates the priority of an already-queued entry in place and marks
    /// the queue for re-sort -- used when coalescing promotes a request's
    /// type to a higher-priority one while it's still sitting in an
    /// unordered queue (spec §4.4 Coalescing: "priority recomputed and
    /// queue resorted if still in an unordered queue"). Returns whether
    /// `id` was found here; a `false` is not an error, it just means the
    /// request has already left this queue (e.g. for the bus or a fill
    /// queue) by the time the caller learned of the promotion.
    pub fn resort(&mut self, id: usize, new_priority: u64) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.priority = new_priority;
            self.sorted = false;
            true
        } else {
            false
        }
    }

    /// Evicts the lowest-priority (FIFO: oldest) prefetch entry to make room
    /// for a demand request, matching `mem_kick_out_oldest_first_prefetch_from_queues`'s
    /// "demand always beats prefetch for a slot" rule. Returns the evicted
    /// request's id so the caller can free its buffer-pool entry.
    pub fn kick_out_prefetch(&mut self) -> Option<usize> {
        self.ensure_sorted();
        let victim_idx = match self.mode {
            OrderingMode::Fifo => self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.ty.is_prefetch())
                .min_by_key(|(_, e)| e.seq)
                .map(|(i, _)| i),
            OrderingMode::Priority => self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.ty.is_prefetch())
                .max_by_key(|(_, e)| (e.priority, std::cmp::Reverse(e.seq)))
                .map(|(i, _)| i),
        };
        victim_idx.map(|i| {
            let evicted = self.entries.remove(i);
            debug!(
                "queue[{}]: kicked out prefetch id={} to make room",
                self.name, evicted.id
            );
            evicted.id
        })
    }

    /// Pushes `id`, kicking out a queued prefetch first if the queue is full
    /// and `ty` is not itself a prefetch (spec §4.5 admission rule). The
    /// evicted id, when present, is still occupying a buffer-pool slot and a
    /// prefetcher-drop hook the caller owes -- this module only removes it
    /// from the queue.
    pub fn push_with_kickout(&mut self, id: usize, ty: RequestType, priority: u64) -> PushOutcome {
        if self.push(id, ty, priority) {
            return PushOutcome::Pushed;
        }
        if !ty.is_prefetch() {
            if let Some(evicted_id) = self.kick_out_prefetch() {
                if self.push(id, ty, priority) {
                    return PushOutcome::PushedAfterKickout { evicted_id };
                }
            }
        }
        PushOutcome::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_mode_preserves_insertion_order() {
        let mut q = Queue::new("q", 4, OrderingMode::Fifo);
        assert!(q.push(1, RequestType::Dfetch, 0));
        assert!(q.push(2, RequestType::Dstore, 0));
        assert_eq!(q.pop_next().unwrap().id, 1);
        assert_eq!(q.pop_next().unwrap().id, 2);
    }

    #[test]
    fn priority_mode_orders_by_priority_then_fifo() {
        let mut q = Queue::new("q", 4, OrderingMode::Priority);
        assert!(q.push(1, RequestType::Dstore, 5));
        assert!(q.push(2, RequestType::Ifetch, 1));
        assert!(q.push(3, RequestType::Dfetch, 1));
        assert_eq!(q.pop_next().unwrap().id, 2); // priority 1, earliest seq
        assert_eq!(q.pop_next().unwrap().id, 3); // priority 1, later seq
        assert_eq!(q.pop_next().unwrap().id, 1); // priority 5
    }

    #[test]
    fn full_queue_rejects_push() {
        let mut q = Queue::new("q", 1, OrderingMode::Fifo);
        assert!(q.push(1, RequestType::Dfetch, 0));
        assert!(!q.push(2, RequestType::Dfetch, 0));
    }

    #[test]
    fn demand_kicks_out_prefetch_when_full() {
        let mut q = Queue::new("q", 1, OrderingMode::Fifo);
        assert!(q.push(1, RequestType::Dprf, 0));
        assert_eq!(
            q.push_with_kickout(2, RequestType::Dfetch, 0),
            PushOutcome::PushedAfterKickout { evicted_id: 1 }
        );
        assert_eq!(q.pop_next().unwrap().id, 2);
    }

    #[test]
    fn prefetch_never_kicks_out_another_prefetch_to_fit_itself() {
        let mut q = Queue::new("q", 1, OrderingMode::Fifo);
        assert!(q.push(1, RequestType::Dprf, 0));
        assert_eq!(
            q.push_with_kickout(2, RequestType::Iprf, 0),
            PushOutcome::Rejected
        );
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_next().unwrap().id, 1);
    }

    #[test]
    fn resort_updates_priority_and_marks_unsorted() {
        let mut q = Queue::new("q", 4, OrderingMode::Priority);
        assert!(q.push(1, RequestType::Dprf, 5));
        assert!(q.push(2, RequestType::Ifetch, 1));
        assert!(q.resort(1, 0)); // promote id 1 above id 2
        assert_eq!(q.pop_next().unwrap().id, 1);
        assert_eq!(q.pop_next().unwrap().id, 2);
    }

    #[test]
    fn resort_reports_missing_id() {
        let mut q = Queue::new("q", 4, OrderingMode::Fifo);
        assert!(!q.resort(99, 0));
    }
}
