//! Top-level driver (spec §2, §5): wires cache, buffer pool, queues,
//! lifecycle FSM, fill logic, partitioner, DRAM boundary and prefetch
//! observer into one `tick()`.
//!
//! Grounded on `update_memory()` in `original_source/src/memory/memory.c`
//! for the per-cycle ordering (partition update, fill-queue drains, DRAM
//! tick, bus-out drain, L1/MLC queue drains, per-core fill drains).
//! `tick` is the uncore reference clock; the memory and per-core domains
//! tick at their own configured ratio off of it via `clock::FrequencyDomain`
//! (`tick` drives the memory domain internally, `tick_cores` drives the
//! core domains -- call both once per reference cycle).
//!
//! Non-goal, recorded here, in `SPEC_FULL.md`'s Non-goals list and in
//! `DESIGN.md`: read/write port contention (`get_read_port`/`get_write_port`
//! and the `*_NEW -> *_WAIT` two-phase port-acquisition dance in
//! `mem_start_l1_access`/`mem_start_mlc_access`) is not modeled -- every
//! request is treated as if a port were always free. Capacity failures still
//! occur (buffer pool exhaustion, queue fullness, fill-queue fullness),
//! they're just not port-contention-shaped; the `State::{MlcNew, L1New}`
//! "new" variants exist on `Request` for protocol completeness but this
//! driver transitions straight through them to `*Wait` in the same tick.

use crate::address::Address;
use crate::block::LinePayload;
use crate::buffer_pool::RequestBufferPool;
use crate::cache::{Builder as CacheBuilder, Cache, Lookup};
use crate::clock::FrequencyDomain;
use crate::config::SimConfig;
use crate::dram::MemoryController;
use crate::fill::{fill_line, FillOutcome};
use crate::lifecycle::{find_coalesce_candidate, notify_waiters, on_hit, on_miss, record_coalesce, Action};
use crate::partition::{search_bruteforce, search_lookahead, CoreSample, ShadowCache};
use crate::prefetch::PrefetchObserver;
use crate::queue::{PushOutcome, Queue};
use crate::request::{Builder, Request, RequestType, State};
use crate::stats::SimStats;
use log::{debug, warn};

pub struct MemorySystem<MC, PF> {
    config: SimConfig,
    pool: RequestBufferPool,
    mlc: Option<Cache<LinePayload>>,
    l1: Cache<LinePayload>,
    mlc_in: Queue,
    l1_in: Queue,
    bus_out: Queue,
    mem_in: Queue,
    l1_fill: Queue,
    mlc_fill: Queue,
    core_fill: Vec<Queue>,
    mem_controller: MC,
    prefetch: PF,
    shadow_caches: Vec<ShadowCache>,
    partition_tie_breaker: usize,
    current_partition: Vec<usize>,
    last_partition_epoch: u64,
    /// Per-core count of ticks where that core has at least one
    /// outstanding stalling request (approximates the original's
    /// `RET_BLOCKED_L1_MISS` retirement-stall counter, which this crate
    /// can't reproduce exactly since it has no pipeline/retirement model).
    stall_cycles: Vec<u64>,
    total_ticks: u64,
    /// Memory domain's own clock, divided down from the uncore reference
    /// clock this struct's `tick` drives (spec §2's three frequency
    /// domains; see `clock.rs`).
    mem_clock: FrequencyDomain,
    /// Per-core clocks, divided down the same way.
    core_clocks: Vec<FrequencyDomain>,
    pub stats: SimStats,
}

impl<MC: MemoryController, PF: PrefetchObserver> MemorySystem<MC, PF> {
    pub fn new(config: SimConfig, mem_controller: MC, prefetch: PF) -> Result<Self, crate::error::ConfigError> {
        config.validate()?;
        let l1_sets = config.l1.num_sets()?;
        let l1 = CacheBuilder {
            name: "L1".into(),
            line_size: config.l1.line_size,
            num_sets: l1_sets,
            assoc: config.l1.assoc,
            engine: crate::replacement::ReplacementEngine::new(config.l1.policy),
        }
        .build();
        let mlc = match &config.mlc {
            Some(mlc_cfg) => Some(
                CacheBuilder {
                    name: "MLC".into(),
                    line_size: mlc_cfg.line_size,
                    num_sets: mlc_cfg.num_sets()?,
                    assoc: mlc_cfg.assoc,
                    engine: crate::replacement::ReplacementEngine::new(mlc_cfg.policy),
                }
                .build(),
            ),
            None => None,
        };
        let queue_cap = config.buffer_pool.total_entries;
        let shadow_caches = (0..config.num_cores)
            .map(|_| ShadowCache::new(config.l1.line_size, l1_sets, config.l1.assoc))
            .collect();
        let default_ways = config.l1.assoc / config.num_cores.max(1);

        Ok(Self {
            pool: RequestBufferPool::new(config.buffer_pool, config.num_cores),
            mlc_in: Queue::new("mlc_in", queue_cap, config.ordering),
            l1_in: Queue::new("l1_in", queue_cap, config.ordering),
            bus_out: Queue::new("bus_out", queue_cap, config.ordering),
            mem_in: Queue::new("mem_in", queue_cap, config.ordering),
            l1_fill: Queue::new("l1_fill", queue_cap, config.ordering),
            mlc_fill: Queue::new("mlc_fill", queue_cap, config.ordering),
            core_fill: (0..config.num_cores)
                .map(|c| Queue::new(format!("core_fill[{c}]"), queue_cap, config.ordering))
                .collect(),
            mlc,
            l1,
            mem_controller,
            prefetch,
            shadow_caches,
            partition_tie_breaker: 0,
            current_partition: vec![default_ways; config.num_cores],
            last_partition_epoch: 0,
            stall_cycles: vec![0; config.num_cores],
            total_ticks: 0,
            mem_clock: FrequencyDomain::new(config.clock.mem_ratio_num, config.clock.mem_ratio_den),
            core_clocks: (0..config.num_cores)
                .map(|_| FrequencyDomain::new(config.clock.core_ratio_num, config.clock.core_ratio_den))
                .collect(),
            stats: SimStats::default(),
            config,
        })
    }

    fn l1_ways_for(&self, proc_id: usize) -> Vec<usize> {
        if !self.config.partition.enabled {
            return (0..self.config.l1.assoc).collect();
        }
        let start: usize = self.current_partition[..proc_id].iter().sum();
        (start..start + self.current_partition[proc_id]).collect()
    }

    /// Admits a new demand/prefetch request into the hierarchy (spec §4.4
    /// entry point, ground: `new_mem_req` in `original_source/memory.c`).
    /// Returns the buffer-pool slot id, or `None` on a capacity failure
    /// (buffer pool full/quota hit/prefetch throttled -- spec §7).
    pub fn submit_request(
        &mut self,
        ty: RequestType,
        proc_id: usize,
        addr: Address,
        now: u64,
        done_func: Option<Box<dyn FnMut(&Request) -> crate::request::RetryHint>>,
    ) -> Option<usize> {
        let line_addr = self.l1.address_map().line_addr(addr);
        let cross_type = !self.config.hier_mshr_on || !ty.is_writeback();
        if let Some(existing_id) = find_coalesce_candidate(
            &self.pool,
            self.config.buffer_pool.total_entries,
            proc_id,
            line_addr,
            ty,
            cross_type,
        ) {
            let incoming_unique_num = 0; // not yet allocated; 0 sorts as "oldest"
            let promoted = if let Some(existing) = self.pool.get_mut(existing_id) {
                record_coalesce(existing, ty, false, incoming_unique_num, done_func)
            } else {
                false
            };
            if promoted {
                // Still sitting in an unordered queue -- the type promotion
                // just raised its priority, so it needs to be resorted
                // in-place (spec §4.4: "priority recomputed and queue
                // resorted if still in an unordered queue"). At most one of
                // these queues holds it; a request further along (bus/mem/fill)
                // has already left both and neither resort does anything.
                let new_priority = ty.priority_ordinal();
                if !self.mlc_in.resort(existing_id, new_priority) {
                    self.l1_in.resort(existing_id, new_priority);
                }
                self.prefetch.on_prefetch_hit_late(proc_id, addr);
            }
            debug!("memory_system: coalesced {ty:?} addr={addr:#x} onto id={existing_id}");
            return Some(existing_id);
        }

        let priority = ty.priority_ordinal();
        let builder = Builder {
            id: 0,
            proc_id,
            unique_num: 0,
            ty,
            addr,
            phys_addr: addr,
            size: self.l1.address_map().line_size(),
            mlc_bank: 0,
            l1_bank: 0,
            mem_bank: 0,
            mem_channel: 0,
            start_cycle: now,
            off_path: false,
            dirty_l0: false,
            done_func,
        };
        let id = self.pool.allocate(builder)?;
        if let Some(req) = self.pool.get_mut(id) {
            req.priority = priority;
        }
        let entry_queue = if self.mlc.is_some() {
            &mut self.mlc_in
        } else {
            &mut self.l1_in
        };
        match entry_queue.push_with_kickout(id, ty, priority) {
            PushOutcome::Pushed => Some(id),
            PushOutcome::PushedAfterKickout { evicted_id } => {
                self.drop_kicked_out_prefetch(evicted_id);
                Some(id)
            }
            PushOutcome::Rejected => {
                self.stats.queues.full_rejections += 1;
                self.pool.free(id);
                None
            }
        }
    }

    /// Frees a prefetch request's buffer-pool slot after it's been kicked
    /// out of a queue to make room for a demand (spec §4.5), and tells the
    /// prefetcher it never reached the cache (`pref_req_drop_process`).
    fn drop_kicked_out_prefetch(&mut self, evicted_id: usize) {
        if let Some(req) = self.pool.get(evicted_id) {
            self.prefetch.on_prefetch_dropped(req.proc_id, req.addr);
        }
        self.pool.free(evicted_id);
        self.stats.queues.kickouts += 1;
        debug!("memory_system: kicked-out prefetch id={evicted_id} dropped");
    }

    /// One L1-frequency-domain cycle, ordered per spec §2: partition update,
    /// fill-queue drains, DRAM tick, bus-out drain, L1-queue drain,
    /// MLC-queue drain.
    pub fn tick(&mut self, now: u64) {
        self.sample_stall_cycles();
        self.maybe_update_partition(now);
        self.process_fill_queue(false, now); // MLC fill
        self.process_fill_queue(true, now); // L1 fill
        for _ in 0..self.mem_clock.advance_reference() {
            self.process_mem_in(now); // DRAM tick
            self.process_bus_out(now);
        }
        self.process_l1_queue(now);
        self.process_mlc_queue(now);
        self.stats.cycles_simulated = now;
    }

    /// Drives every core's fill-queue drain for this reference cycle,
    /// firing each core's own clock (spec §2's core frequency domain)
    /// rather than assuming a fixed 1:1 ratio with the uncore. Callers
    /// should call this once per reference cycle alongside `tick`.
    pub fn tick_cores(&mut self, now: u64) {
        for core in 0..self.core_clocks.len() {
            let fires = self.core_clocks[core].advance_reference();
            for _ in 0..fires {
                self.tick_core(core, now);
            }
        }
    }

    /// Marks, for each core, whether it has an outstanding stalling request
    /// this cycle -- the data `maybe_update_partition` turns into a
    /// per-core stall fraction for the `GmeanPerf` metric.
    fn sample_stall_cycles(&mut self) {
        self.total_ticks += 1;
        let mut stalled = vec![false; self.stall_cycles.len()];
        for req in self.pool.iter() {
            if req.first_stalling_cycle.is_some() && !req.is_final() {
                stalled[req.proc_id] = true;
            }
        }
        for (count, was_stalled) in self.stall_cycles.iter_mut().zip(stalled) {
            if was_stalled {
                *count += 1;
            }
        }
    }

    /// Drains requests whose DRAM round-trip has completed (`rdy_cycle <=
    /// now`) into the L1 fill queue; everything else goes back to wait
    /// another cycle. Ground: `mem_process_bus_in_reqs` in the original,
    /// which moves a completed `MemReq` from the memory controller straight
    /// into the fill path.
    fn process_mem_in(&mut self, now: u64) {
        let len = self.mem_in.len();
        for _ in 0..len {
            let Some(entry) = self.mem_in.pop_next() else { break };
            let ready = self
                .pool
                .get(entry.id)
                .map(|r| r.rdy_cycle <= now)
                .unwrap_or(false);
            if !ready {
                if !self.mem_in.push(entry.id, entry.ty, entry.priority) {
                    self.stats.queues.full_rejections += 1;
                }
                continue;
            }
            if let Some(req) = self.pool.get_mut(entry.id) {
                req.state = State::MemDone;
            }
            if !self.l1_fill.push(entry.id, entry.ty, entry.priority) {
                self.stats.queues.full_rejections += 1;
            }
        }
    }

    /// Drains `core`'s fill queue, waking whatever op was waiting on each
    /// entry (`mem_process_core_fill_reqs` in the original).
    pub fn tick_core(&mut self, core: usize, now: u64) {
        while let Some(entry) = self.core_fill[core].pop_next() {
            let Some(req) = self.pool.get_mut(entry.id) else {
                continue;
            };
            req.state = State::FillDone;
            let _ = notify_waiters(req);
            self.pool.free(entry.id);
        }
        let _ = now;
    }

    fn maybe_update_partition(&mut self, now: u64) {
        if !self.config.partition.enabled {
            return;
        }
        if now.saturating_sub(self.last_partition_epoch) < self.config.partition.epoch_cycles {
            return;
        }
        self.last_partition_epoch = now;
        let use_stalling = true;
        let total_ticks = self.total_ticks.max(1) as f64;
        let samples: Vec<CoreSample> = self
            .shadow_caches
            .iter()
            .zip(&self.current_partition)
            .zip(&self.stall_cycles)
            .map(|((sc, &ways), &stalled)| CoreSample {
                miss_curve: sc.miss_rate_curve(use_stalling),
                stall_fraction: stalled as f64 / total_ticks,
                current_ways: ways,
            })
            .collect();
        let assoc = self.config.l1.assoc;
        let partition = if self.config.partition.lookahead {
            search_lookahead(
                self.config.partition.metric,
                &samples,
                assoc,
                &mut self.partition_tie_breaker,
            )
        } else {
            search_bruteforce(self.config.partition.metric, &samples, assoc)
        };
        debug!("memory_system: new L1 partition {partition:?}");
        self.current_partition = partition;
    }

    fn process_bus_out(&mut self, now: u64) {
        while let Some(entry) = self.bus_out.peek_next().copied() {
            let Some((addr, proc_id)) = self.pool.get(entry.id).map(|r| (r.addr, r.proc_id)) else {
                self.bus_out.pop_next();
                continue;
            };
            match self.mem_controller.schedule(addr, proc_id, now) {
                Some(rdy) => {
                    self.bus_out.pop_next();
                    if let Some(req) = self.pool.get_mut(entry.id) {
                        req.state = State::MemWait;
                        req.rdy_cycle = rdy;
                    }
                    if !self.mem_in.push(entry.id, entry.ty, entry.priority) {
                        self.stats.queues.full_rejections += 1;
                    }
                }
                None => break, // downstream rejection: capacity failure, retry next tick
            }
        }
    }

    fn process_l1_queue(&mut self, now: u64) {
        self.process_queue_level(true, now);
    }

    fn process_mlc_queue(&mut self, now: u64) {
        if self.mlc.is_some() {
            self.process_queue_level(false, now);
        }
    }

    fn process_queue_level(&mut self, is_l1: bool, now: u64) {
        let queue_len = if is_l1 {
            self.l1_in.len()
        } else {
            self.mlc_in.len()
        };
        for _ in 0..queue_len {
            let entry = if is_l1 {
                self.l1_in.pop_next()
            } else {
                self.mlc_in.pop_next()
            };
            let Some(entry) = entry else { break };
            self.process_one_request(is_l1, entry.id, now);
        }
    }

    fn process_one_request(&mut self, is_l1: bool, id: usize, now: u64) {
        let Some(req) = self.pool.get(id) else {
            return;
        };
        let addr = req.addr;
        let proc_id = req.proc_id;
        let ty = req.ty;
        let priority = req.priority;

        let lookup = if is_l1 {
            self.l1.access(addr, now)
        } else {
            self.mlc.as_mut().expect("mlc queue active without mlc").access(addr, now)
        };

        if self.config.partition.enabled && is_l1 {
            let stalling = ty.is_stalling();
            let demand = ty.is_demand();
            self.shadow_caches[proc_id].record_access(addr, now, stalling, demand);
        }

        match lookup {
            Lookup::Hit(at) => {
                self.record_hit(is_l1, ty);
                if ty.is_demand() {
                    let cache_ref = if is_l1 { &self.l1 } else { self.mlc.as_ref().unwrap() };
                    let payload = cache_ref.line(at).data.unwrap_or_default();
                    if payload.was_prefetch && payload.first_use_cycle.is_none() {
                        self.prefetch.on_prefetch_hit(proc_id, addr);
                    } else {
                        self.prefetch.on_demand_hit(proc_id, addr);
                    }
                    let cache_mut = if is_l1 { &mut self.l1 } else { self.mlc.as_mut().unwrap() };
                    if let Some(p) = cache_mut.line_mut(at).data.as_mut() {
                        p.first_use_cycle.get_or_insert(now);
                    }
                }
                let fill_above_needed = is_l1 && self.mlc.is_some() && !ty.is_writeback();
                let Some(req) = self.pool.get_mut(id) else {
                    return;
                };
                match on_hit(req, now, fill_above_needed, false) {
                    Action::FreeImmediately => {
                        req.state = State::L1HitDone;
                        self.pool.free(id);
                    }
                    Action::Advance { state, rdy_cycle } => {
                        req.state = state;
                        req.rdy_cycle = rdy_cycle;
                        let _ = notify_waiters(self.pool.get_mut(id).unwrap());
                        self.pool.free(id);
                    }
                    Action::EnqueueFill { state, priority } => {
                        req.state = state;
                        let fill_queue = if is_l1 {
                            &mut self.mlc_fill
                        } else {
                            self.core_fill.get_mut(proc_id).unwrap()
                        };
                        if !fill_queue.push(id, ty, priority) {
                            self.stats.queues.full_rejections += 1;
                        }
                    }
                    Action::Stall | Action::SendToBus => {
                        let violation =
                            crate::error::ProtocolViolation::new("on_hit returned Stall/SendToBus", req);
                        log::error!("{violation}");
                        panic!("{violation}");
                    }
                }
            }
            Lookup::Miss => {
                self.record_miss(is_l1, ty);
                let prefetches = self.prefetch.on_demand_miss(proc_id, addr);
                for pf in prefetches {
                    let _ = self.submit_request(RequestType::Dprf, pf.proc_id, pf.addr, now, None);
                }
                let fill_queue_full = if is_l1 { self.l1_fill.is_full() } else { self.mlc_fill.is_full() };
                let Some(req) = self.pool.get_mut(id) else {
                    return;
                };
                match on_miss(req, now, fill_queue_full) {
                    Action::Stall => {
                        if !(if is_l1 { &mut self.l1_in } else { &mut self.mlc_in })
                            .push(id, ty, priority)
                        {
                            self.stats.queues.full_rejections += 1;
                        }
                    }
                    Action::SendToBus if is_l1 => {
                        req.state = State::BusNew;
                        if !self.bus_out.push(id, ty, priority) {
                            self.stats.queues.full_rejections += 1;
                        }
                    }
                    Action::SendToBus => {
                        // MLC miss: descends to the L1 queue rather than
                        // going straight to the memory controller.
                        req.state = State::L1New;
                        match self.l1_in.push_with_kickout(id, ty, priority) {
                            PushOutcome::Pushed => {}
                            PushOutcome::PushedAfterKickout { evicted_id } => {
                                self.drop_kicked_out_prefetch(evicted_id);
                            }
                            PushOutcome::Rejected => {
                                self.stats.queues.full_rejections += 1;
                            }
                        }
                    }
                    Action::Advance { state, rdy_cycle } => {
                        req.state = state;
                        req.rdy_cycle = rdy_cycle;
                        let fill_queue = if is_l1 { &mut self.l1_fill } else { &mut self.mlc_fill };
                        if !fill_queue.push(id, ty, priority) {
                            self.stats.queues.full_rejections += 1;
                        }
                    }
                    Action::FreeImmediately | Action::EnqueueFill { .. } => {
                        let violation = crate::error::ProtocolViolation::new(
                            "on_miss returned FreeImmediately/EnqueueFill",
                            req,
                        );
                        log::error!("{violation}");
                        panic!("{violation}");
                    }
                }
            }
        }
    }

    fn record_hit(&mut self, is_l1: bool, ty: RequestType) {
        let counters = if is_l1 { &mut self.stats.l1 } else { &mut self.stats.mlc };
        if ty.is_prefetch() {
            counters.prefetch_hits += 1;
        } else if ty.is_writeback() {
            counters.writeback_hits += 1;
        } else {
            counters.demand_hits += 1;
        }
    }

    fn record_miss(&mut self, is_l1: bool, ty: RequestType) {
        let counters = if is_l1 { &mut self.stats.l1 } else { &mut self.stats.mlc };
        if ty.is_prefetch() {
            counters.prefetch_misses += 1;
        } else if ty.is_writeback() {
            counters.writeback_misses += 1;
        } else {
            counters.demand_misses += 1;
        }
    }

    fn process_fill_queue(&mut self, is_l1: bool, now: u64) {
        let len = if is_l1 { self.l1_fill.len() } else { self.mlc_fill.len() };
        for _ in 0..len {
            let entry = if is_l1 { self.l1_fill.pop_next() } else { self.mlc_fill.pop_next() };
            let Some(entry) = entry else { break };
            let Some(req) = self.pool.get(entry.id) else { continue };
            let addr = req.addr;
            let proc_id = req.proc_id;
            let is_prefetch = req.ty.is_prefetch();
            let payload = LinePayload {
                prefetcher_id: req.prefetcher_id,
                pref_load_pc: req.pref_load_pc,
                global_hist: req.global_hist,
                fetched_by_offpath: req.off_path,
                fill_cycle: now,
                was_prefetch: is_prefetch,
                first_use_cycle: None,
            };
            let ways = self.l1_ways_for(proc_id);
            let cache = if is_l1 { &mut self.l1 } else { self.mlc.as_mut().unwrap() };

            let outcome = fill_line(
                cache,
                &mut self.pool,
                &ways,
                addr,
                proc_id,
                is_prefetch,
                payload,
                now,
                false,
                false,
            );

            // Pull out the evicted line's eviction-hook data (if any) while
            // `cache` is still around to reassemble its address; the fields
            // we keep are plain values, so nothing below needs `cache`
            // again (spec §4.7 step 2 fill metadata, spec §6 eviction hooks).
            let eviction_report = match &outcome {
                FillOutcome::Installed { at, evicted } | FillOutcome::InstalledWithWriteback { at, evicted, .. } => {
                    evicted.as_ref().map(|line| {
                        let evicted_addr = cache.address_map().reassemble(line.tag, at.set);
                        let line_payload = line.data.unwrap_or_default();
                        (
                            line.proc_id,
                            evicted_addr,
                            line_payload.was_prefetch,
                            line_payload.first_use_cycle.is_some(),
                        )
                    })
                }
                FillOutcome::Retry => None,
            };
            if let Some((evicted_proc_id, evicted_addr, was_prefetch, used)) = eviction_report {
                if was_prefetch {
                    self.prefetch.on_evict_prefetch(evicted_proc_id, evicted_addr, used);
                } else {
                    self.prefetch.on_evict(evicted_proc_id, evicted_addr, used);
                }
            }

            match outcome {
                FillOutcome::Retry => {
                    let (ty, priority) = {
                        let req = self.pool.get(entry.id).unwrap();
                        (req.ty, req.priority)
                    };
                    let fq = if is_l1 { &mut self.l1_fill } else { &mut self.mlc_fill };
                    if !fq.push(entry.id, ty, priority) {
                        warn!("memory_system: dropped fill retry for id={}", entry.id);
                    }
                }
                FillOutcome::Installed { .. } | FillOutcome::InstalledWithWriteback { .. } => {
                    if let FillOutcome::InstalledWithWriteback { wb_id, .. } = outcome {
                        self.stats.l1.dirty_evictions += 1;
                        if !self.bus_out.push(wb_id, RequestType::Wb, u64::MAX) {
                            self.stats.queues.full_rejections += 1;
                        }
                    }
                    self.stats.l1.evictions += 1;
                    let Some(req) = self.pool.get_mut(entry.id) else { continue };
                    if is_l1 {
                        req.state = State::L1HitDone;
                        if !notify_waiters(req) {
                            self.pool.free(entry.id);
                        }
                    } else {
                        req.state = State::MlcHitDone;
                        let target = &mut self.core_fill[proc_id];
                        if !target.push(entry.id, req.ty, req.priority) {
                            self.stats.queues.full_rejections += 1;
                        }
                    }
                }
            }
        }
    }
}
