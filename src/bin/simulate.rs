//! CLI harness (spec §8 scenarios): replay a trace of memory requests
//! against a configured hierarchy and dump final stats as JSON.
//!
//! Grounded on the teacher's `profile/src/main.rs` (a thin CLI over the
//! library crate) and `clap::Parser` as used elsewhere in the pack.

use chipmem_sim::memory_system::MemorySystem;
use chipmem_sim::prefetch::NullObserver;
use chipmem_sim::{dram::ConstantLatencyController, config::SimConfig, request::RequestType};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;

/// One line of a replayed trace: `<cycle> <proc_id> <type> <addr_hex>`.
#[derive(Debug, Clone, Copy)]
struct TraceEntry {
    cycle: u64,
    proc_id: usize,
    ty: RequestType,
    addr: u64,
}

fn parse_request_type(s: &str) -> Option<RequestType> {
    match s {
        "IFETCH" => Some(RequestType::Ifetch),
        "DFETCH" => Some(RequestType::Dfetch),
        "DSTORE" => Some(RequestType::Dstore),
        "IPRF" => Some(RequestType::Iprf),
        "DPRF" => Some(RequestType::Dprf),
        _ => None,
    }
}

fn parse_trace(input: &str) -> Vec<TraceEntry> {
    input
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            let cycle = parts.next()?.parse().ok()?;
            let proc_id = parts.next()?.parse().ok()?;
            let ty = parse_request_type(parts.next()?)?;
            let addr_str = parts.next()?.trim_start_matches("0x");
            let addr = u64::from_str_radix(addr_str, 16).ok()?;
            Some(TraceEntry {
                cycle,
                proc_id,
                ty,
                addr,
            })
        })
        .collect()
}

/// Replay a memory-request trace against a configured cache hierarchy.
#[derive(Parser, Debug)]
#[command(name = "simulate", about = "Replay a memory-request trace against a configured cache hierarchy")]
struct Args {
    /// Path to a JSON `SimConfig` (see config.rs); reads from stdin trace only if omitted.
    #[arg(long)]
    config: PathBuf,

    /// Path to a trace file (`<cycle> <proc_id> <TYPE> <addr_hex>` per line); stdin if omitted.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Fixed DRAM round-trip latency in cycles.
    #[arg(long, default_value_t = 200)]
    mem_latency: u64,

    /// How many uncore cycles to run past the last trace entry, to drain in-flight requests.
    #[arg(long, default_value_t = 10_000)]
    drain_cycles: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config_text = std::fs::read_to_string(&args.config).unwrap_or_else(|e| {
        eprintln!("error reading config {}: {e}", args.config.display());
        std::process::exit(1);
    });
    let config: SimConfig = serde_json::from_str(&config_text).unwrap_or_else(|e| {
        eprintln!("error parsing config: {e}");
        std::process::exit(1);
    });

    let trace_text = match &args.trace {
        Some(path) => std::fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("error reading trace {}: {e}", path.display());
            std::process::exit(1);
        }),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .expect("failed to read trace from stdin");
            buf
        }
    };
    let trace = parse_trace(&trace_text);

    let mut sys = MemorySystem::new(config, ConstantLatencyController::new(args.mem_latency), NullObserver)
        .unwrap_or_else(|e| {
            eprintln!("invalid config: {e}");
            std::process::exit(1);
        });

    let last_cycle = trace.last().map_or(0, |e| e.cycle);
    let mut trace_iter = trace.into_iter().peekable();
    let end = last_cycle + args.drain_cycles;

    for now in 0..=end {
        while trace_iter.peek().is_some_and(|e| e.cycle == now) {
            let entry = trace_iter.next().unwrap();
            let _ = sys.submit_request(entry.ty, entry.proc_id, entry.addr, now, None);
        }
        sys.tick(now);
        sys.tick_cores(now);
    }

    let json = serde_json::to_string_pretty(&sys.stats).expect("SimStats is always serializable");
    println!("{json}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_trace_line() {
        let trace = parse_trace("0 0 DFETCH 0x1000\n# comment\n\n10 1 DSTORE 2000");
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].cycle, 0);
        assert_eq!(trace[0].proc_id, 0);
        assert_eq!(trace[0].ty, RequestType::Dfetch);
        assert_eq!(trace[0].addr, 0x1000);
        assert_eq!(trace[1].addr, 0x2000);
    }

    #[test]
    fn skips_malformed_lines() {
        let trace = parse_trace("not a trace line\n0 0 BOGUS 0x10");
        assert!(trace.is_empty());
    }
}
