//! Inline counters (ambient stack per the teacher: `romnn-gpucachesim`'s
//! `stats/src/instructions.rs` keeps a plain `serde`-serializable counts
//! struct with an `AddAssign` impl for merging across cores -- the same
//! shape fits the hierarchy's hit/miss/kickout counters).

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct CacheCounters {
    pub demand_hits: u64,
    pub demand_misses: u64,
    pub prefetch_hits: u64,
    pub prefetch_misses: u64,
    pub writeback_hits: u64,
    pub writeback_misses: u64,
    pub evictions: u64,
    pub dirty_evictions: u64,
}

impl CacheCounters {
    #[must_use]
    pub fn demand_miss_rate(&self) -> f64 {
        let accesses = self.demand_hits + self.demand_misses;
        if accesses == 0 {
            0.0
        } else {
            self.demand_misses as f64 / accesses as f64
        }
    }
}

impl AddAssign for CacheCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.demand_hits += rhs.demand_hits;
        self.demand_misses += rhs.demand_misses;
        self.prefetch_hits += rhs.prefetch_hits;
        self.prefetch_misses += rhs.prefetch_misses;
        self.writeback_hits += rhs.writeback_hits;
        self.writeback_misses += rhs.writeback_misses;
        self.evictions += rhs.evictions;
        self.dirty_evictions += rhs.dirty_evictions;
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BufferPoolCounters {
    pub allocations_rejected_capacity: u64,
    pub allocations_rejected_quota: u64,
    pub allocations_rejected_prefetch_throttle: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueueCounters {
    pub kickouts: u64,
    pub full_rejections: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimStats {
    pub l1: CacheCounters,
    pub mlc: CacheCounters,
    pub buffer_pool: BufferPoolCounters,
    pub queues: QueueCounters,
    pub cycles_simulated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_counters_additively() {
        let mut a = CacheCounters {
            demand_hits: 10,
            demand_misses: 5,
            ..Default::default()
        };
        let b = CacheCounters {
            demand_hits: 3,
            demand_misses: 1,
            ..Default::default()
        };
        a += b;
        assert_eq!(a.demand_hits, 13);
        assert_eq!(a.demand_misses, 6);
    }

    #[test]
    fn miss_rate_is_zero_with_no_accesses() {
        assert_eq!(CacheCounters::default().demand_miss_rate(), 0.0);
    }
}
