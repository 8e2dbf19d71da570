//! Prefetcher observer interface (spec §6): the hierarchy core notifies an
//! observer of fills/evictions/hits and accepts back a list of addresses to
//! prefetch; the prediction logic itself (stream detection, stride
//! tracking, confidence) is an external collaborator and out of scope.
//! Grounded on the same trait-seam idiom as [`crate::dram::MemoryController`]
//! (`romnn-gpucachesim`'s controller traits) and on the `pref_ul1_hit`/
//! `pref_ul1_miss`/`pref_ul1_pref_hit`/`pref_ul1_pref_hit_late`/
//! `pref_ul1evict`/`pref_evictline_used`/`pref_evictline_notused`/
//! `pref_req_drop_process` call sites in
//! `original_source/src/memory/memory.c`, which is where the original
//! notifies its (much larger) prefetcher framework of the same events.

use crate::address::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchRequest {
    pub proc_id: usize,
    pub addr: Address,
}

/// Events the hierarchy reports to an observer (spec §6's seven named
/// hooks, one method each so a caller can act on exactly the event it cares
/// about instead of a conflated callback).
pub trait PrefetchObserver: std::fmt::Debug {
    /// `pref_ul1_hit`: a demand request hit a line that was *not* an
    /// untouched prefetch (an ordinary demand-filled or already-used line).
    fn on_demand_hit(&mut self, proc_id: usize, addr: Address) {
        let _ = (proc_id, addr);
    }

    /// `pref_ul1_miss`: a demand request missed. Called once per completed
    /// demand miss, giving the observer a chance to propose new prefetch
    /// candidates.
    fn on_demand_miss(&mut self, proc_id: usize, addr: Address) -> Vec<PrefetchRequest> {
        let _ = (proc_id, addr);
        Vec::new()
    }

    /// `pref_ul1_pref_hit`: a demand request hit a line this observer
    /// previously prefetched, and the line had not yet been used.
    fn on_prefetch_hit(&mut self, proc_id: usize, addr: Address) {
        let _ = (proc_id, addr);
    }

    /// `pref_ul1_pref_hit_late`: a demand request coalesced onto a
    /// still-in-flight prefetch for the same line (spec §4.4 Coalescing:
    /// the prefetch hadn't completed its fill yet, so the demand caught it
    /// "late" rather than hitting an already-installed line).
    fn on_prefetch_hit_late(&mut self, proc_id: usize, addr: Address) {
        let _ = (proc_id, addr);
    }

    /// `pref_evictline_used`/`pref_evictline_notused`: an ordinary
    /// (non-prefetch) line is about to be evicted; `used` is whether it was
    /// ever accessed after its fill.
    fn on_evict(&mut self, proc_id: usize, addr: Address, used: bool) {
        let _ = (proc_id, addr, used);
    }

    /// `pref_ul1evict`: a line that was filled in as a prefetch is about to
    /// be evicted; `used` is whether a demand ever hit it before eviction.
    fn on_evict_prefetch(&mut self, proc_id: usize, addr: Address, used: bool) {
        let _ = (proc_id, addr, used);
    }

    /// `pref_req_drop_process`: a queued prefetch request was kicked out to
    /// make room for a demand before it ever reached the cache (spec §4.5
    /// kick-out), distinct from [`Self::on_evict_prefetch`] which fires for
    /// an already-installed line.
    fn on_prefetch_dropped(&mut self, proc_id: usize, addr: Address) {
        let _ = (proc_id, addr);
    }
}

/// No-op observer: emits nothing, ignores every event. Default when no
/// prefetcher is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PrefetchObserver for NullObserver {}

/// A minimal next-line stream prefetcher, used as a worked example of the
/// trait and as a test fixture: on every demand miss it proposes the next
/// `degree` sequential lines.
#[derive(Debug, Clone)]
pub struct NextLineStreamPrefetcher {
    pub line_size: u32,
    pub degree: u32,
}

impl PrefetchObserver for NextLineStreamPrefetcher {
    fn on_demand_miss(&mut self, proc_id: usize, addr: Address) -> Vec<PrefetchRequest> {
        (1..=self.degree)
            .map(|i| PrefetchRequest {
                proc_id,
                addr: addr.wrapping_add(u64::from(i) * u64::from(self.line_size)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_observer_proposes_nothing() {
        let mut obs = NullObserver;
        assert!(obs.on_demand_miss(0, 0x1000).is_empty());
    }

    #[test]
    fn stream_prefetcher_proposes_next_n_lines() {
        let mut pf = NextLineStreamPrefetcher {
            line_size: 64,
            degree: 2,
        };
        let reqs = pf.on_demand_miss(0, 0x1000);
        assert_eq!(
            reqs,
            vec![
                PrefetchRequest {
                    proc_id: 0,
                    addr: 0x1040
                },
                PrefetchRequest {
                    proc_id: 0,
                    addr: 0x1080
                },
            ]
        );
    }
}
