//! Replacement policy engine (spec §4.2).
//!
//! Ported function-for-function from `repl_class` in
//! `original_source/src/libs/cache_lib/repl.cc`: same tie-break rules (an
//! invalid way wins immediately; LRU/MRU prefer an untouched prefetch at
//! their respective end of the timeline; SRRIP ages the whole candidate set
//! when nothing has hit `max_rrpv` yet). The engine holds no storage of its
//! own -- per-line state lives in [`crate::block::ReplMeta`], which the cache
//! owns; this module is pure policy logic over a caller-supplied snapshot,
//! which keeps it trivially unit-testable independent of `Cache<T>`.

use crate::block::{CacheAddress, ReplMeta};
use rand::Rng;

pub const MAX_RRPV: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplacementPolicy {
    TrueLru,
    Mru,
    Random,
    Srrip,
    /// Shared-cache way partitioning defers to [`crate::partition::Partitioner`]
    /// to restrict the candidate set; victim selection within the allotted
    /// ways still runs true-LRU (spec §4.6 step 4).
    Partition,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplacementEngine {
    pub policy: ReplacementPolicy,
    pub max_rrpv: u8,
}

impl ReplacementEngine {
    #[must_use]
    pub fn new(policy: ReplacementPolicy) -> Self {
        Self {
            policy,
            max_rrpv: MAX_RRPV,
        }
    }

    pub fn on_insert(&self, meta: &mut ReplMeta, now: u64, proc_id: usize, is_prefetch: bool) {
        meta.owner = proc_id;
        meta.prefetch = is_prefetch;
        meta.insert_cycle = now;
        meta.access_cycle = now;
        if matches!(self.policy, ReplacementPolicy::Srrip) {
            meta.rrpv = self.max_rrpv - 1;
        }
    }

    pub fn on_access(&self, meta: &mut ReplMeta, now: u64) {
        meta.access_cycle = now;
        meta.prefetch = false;
        if matches!(self.policy, ReplacementPolicy::Srrip) {
            meta.rrpv = 0;
        }
    }

    pub fn on_invalidate(&self, meta: &mut ReplMeta) {
        meta.access_cycle = u64::MAX;
        meta.insert_cycle = u64::MAX;
        meta.prefetch = false;
        if matches!(self.policy, ReplacementPolicy::Srrip) {
            meta.rrpv = self.max_rrpv;
        }
    }

    /// Picks a victim among `candidates`. `metas[i]` is the replacement state
    /// of `candidates[i]`; a candidate with `valid == false` in its
    /// [`CacheAddress`] is not a member of this cache's candidate set at all
    /// (used by the partitioner to present a restricted subset of ways) and
    /// is skipped, distinct from `metas[i].valid`, which means "this way does
    /// not currently hold a live line" and therefore wins immediately.
    ///
    /// SRRIP may age every candidate's `rrpv` in place before returning;
    /// `metas` must be written back to the cache's grid by the caller
    /// afterwards.
    ///
    /// # Panics
    /// Panics if no candidate is selectable, which can only happen if the
    /// caller passes an empty or entirely-invalid candidate set -- a
    /// configuration error, not a runtime condition.
    #[must_use]
    pub fn select_victim(
        &self,
        candidates: &[CacheAddress],
        metas: &mut [ReplMeta],
    ) -> usize {
        debug_assert_eq!(candidates.len(), metas.len());
        match self.policy {
            ReplacementPolicy::TrueLru | ReplacementPolicy::Partition => {
                self.select_lru_like(candidates, metas, false)
            }
            ReplacementPolicy::Mru => self.select_lru_like(candidates, metas, true),
            ReplacementPolicy::Random => self.select_random(candidates),
            ReplacementPolicy::Srrip => self.select_srrip(candidates, metas),
        }
    }

    fn select_lru_like(
        &self,
        candidates: &[CacheAddress],
        metas: &[ReplMeta],
        mru: bool,
    ) -> usize {
        let mut best: Option<usize> = None;
        let mut best_cycle = if mru { 0 } else { u64::MAX };
        let mut best_prefetch: Option<usize> = None;
        let mut best_prefetch_cycle = if mru { 0 } else { u64::MAX };

        for (i, (addr, meta)) in candidates.iter().zip(metas.iter()).enumerate() {
            if !addr.valid {
                continue;
            }
            if !meta.valid_marker() {
                // An empty way always wins immediately.
                return i;
            }
            if meta.prefetch {
                let better = if mru {
                    meta.insert_cycle > best_prefetch_cycle
                } else {
                    meta.insert_cycle < best_prefetch_cycle
                };
                if better {
                    best_prefetch = Some(i);
                    best_prefetch_cycle = meta.insert_cycle;
                }
            }
            let better = if mru {
                meta.access_cycle > best_cycle
            } else {
                meta.access_cycle < best_cycle
            };
            if better {
                best = Some(i);
                best_cycle = meta.access_cycle;
            }
        }

        if let Some(p) = best_prefetch {
            return p;
        }
        best.expect("replacement engine: candidate set must contain at least one valid way")
    }

    fn select_random(&self, candidates: &[CacheAddress]) -> usize {
        let live: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.valid)
            .map(|(i, _)| i)
            .collect();
        assert!(
            !live.is_empty(),
            "replacement engine: candidate set must contain at least one valid way"
        );
        let pick = rand::thread_rng().gen_range(0..live.len());
        live[pick]
    }

    fn select_srrip(&self, candidates: &[CacheAddress], metas: &mut [ReplMeta]) -> usize {
        for _round in 0..=self.max_rrpv {
            for (i, (addr, meta)) in candidates.iter().zip(metas.iter()).enumerate() {
                if addr.valid && !meta.valid_marker() {
                    return i;
                }
            }
            for (i, (addr, meta)) in candidates.iter().zip(metas.iter()).enumerate() {
                if addr.valid && meta.rrpv == self.max_rrpv {
                    return i;
                }
            }
            for (addr, meta) in candidates.iter().zip(metas.iter_mut()) {
                if addr.valid {
                    debug_assert_ne!(meta.rrpv, self.max_rrpv);
                    meta.rrpv += 1;
                }
            }
        }
        unreachable!(
            "SRRIP victim search must terminate within max_rrpv+1 aging rounds (spec §8)"
        );
    }
}

/// `ReplMeta` doesn't carry its own "is this way populated" bit -- that lives
/// on [`crate::block::Line::valid`] -- so the engine is handed a sentinel
/// reading through `valid_marker`: an access_cycle of `u64::MAX` means "never
/// inserted / invalidated", matching `on_invalidate`'s use of `MAX_CTR` in the
/// original (`repl.cc`'s `repl_class::invalidate`).
impl ReplMeta {
    #[must_use]
    fn valid_marker(&self) -> bool {
        self.access_cycle != u64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::CacheAddress;

    fn addrs(n: usize) -> Vec<CacheAddress> {
        (0..n).map(|w| CacheAddress::at(0, w)).collect()
    }

    #[test]
    fn empty_way_wins_immediately_under_lru() {
        let engine = ReplacementEngine::new(ReplacementPolicy::TrueLru);
        let candidates = addrs(4);
        let mut metas = vec![
            ReplMeta {
                access_cycle: 10,
                ..Default::default()
            },
            ReplMeta::default(), // access_cycle MAX => empty
            ReplMeta {
                access_cycle: 5,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 1,
                ..Default::default()
            },
        ];
        assert_eq!(engine.select_victim(&candidates, &mut metas), 1);
    }

    #[test]
    fn lru_breaks_ties_toward_oldest_prefetch() {
        let engine = ReplacementEngine::new(ReplacementPolicy::TrueLru);
        let candidates = addrs(3);
        let mut metas = vec![
            ReplMeta {
                access_cycle: 100,
                insert_cycle: 100,
                prefetch: false,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 50,
                insert_cycle: 10,
                prefetch: true,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 20,
                insert_cycle: 20,
                prefetch: false,
                ..Default::default()
            },
        ];
        // Way 2 has the smallest access_cycle (20) but way 1 is an untouched
        // prefetch, which always wins over plain LRU recency.
        assert_eq!(engine.select_victim(&candidates, &mut metas), 1);
    }

    #[test]
    fn mru_picks_most_recently_used() {
        let engine = ReplacementEngine::new(ReplacementPolicy::Mru);
        let candidates = addrs(3);
        let mut metas = vec![
            ReplMeta {
                access_cycle: 10,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 99,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 40,
                ..Default::default()
            },
        ];
        assert_eq!(engine.select_victim(&candidates, &mut metas), 1);
    }

    #[test]
    fn srrip_picks_max_rrpv_and_terminates() {
        let engine = ReplacementEngine::new(ReplacementPolicy::Srrip);
        let candidates = addrs(4);
        let mut metas = vec![
            ReplMeta {
                access_cycle: 1,
                rrpv: 1,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 1,
                rrpv: 0,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 1,
                rrpv: 2,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 1,
                rrpv: 1,
                ..Default::default()
            },
        ];
        let victim = engine.select_victim(&candidates, &mut metas);
        // Nothing starts at max_rrpv=3, so the engine ages the whole set
        // once (all rrpv += 1) and the way that was at 2 now hits 3 first.
        assert_eq!(victim, 2);
        assert_eq!(metas[2].rrpv, MAX_RRPV);
    }

    #[test]
    fn srrip_immediate_hit_when_already_at_max() {
        let engine = ReplacementEngine::new(ReplacementPolicy::Srrip);
        let candidates = addrs(2);
        let mut metas = vec![
            ReplMeta {
                access_cycle: 1,
                rrpv: MAX_RRPV,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 1,
                rrpv: 0,
                ..Default::default()
            },
        ];
        assert_eq!(engine.select_victim(&candidates, &mut metas), 0);
    }

    #[test]
    fn partitioned_candidate_subset_is_respected() {
        let engine = ReplacementEngine::new(ReplacementPolicy::TrueLru);
        let mut candidates = addrs(4);
        candidates[0].valid = false; // not part of this core's allotted ways
        let mut metas = vec![
            ReplMeta {
                access_cycle: 1, // oldest, but excluded from the candidate set
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 5,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 9,
                ..Default::default()
            },
            ReplMeta {
                access_cycle: 7,
                ..Default::default()
            },
        ];
        assert_eq!(engine.select_victim(&candidates, &mut metas), 1);
    }

    #[test]
    fn insert_then_access_then_invalidate_cycle_srrip() {
        let engine = ReplacementEngine::new(ReplacementPolicy::Srrip);
        let mut meta = ReplMeta::default();
        engine.on_insert(&mut meta, 10, 0, false);
        assert_eq!(meta.rrpv, MAX_RRPV - 1);
        engine.on_access(&mut meta, 20);
        assert_eq!(meta.rrpv, 0);
        engine.on_invalidate(&mut meta);
        assert_eq!(meta.rrpv, MAX_RRPV);
        assert!(!meta.valid_marker());
    }
}
