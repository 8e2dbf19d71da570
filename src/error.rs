//! Error taxonomy, per spec §7.
//!
//! Capacity failures (buffer pool full, queue full, port busy) and downstream
//! rejection are deliberately *not* represented here: spec §7 classifies them
//! as recoverable and requires the caller to retry next cycle, so they are
//! surfaced as plain `bool`/status-enum returns on the hot path (matching the
//! teacher's `cache::RequestStatus`), never as `Result::Err`. Only the two
//! fatal classes -- configuration errors and protocol violations -- get a
//! `thiserror` type, grounded on the teacher's use of `thiserror::Error` in
//! `exec/src/tracegen.rs` and `validate/src/materialized/mod.rs`.

use crate::request::Request;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be a power of two, got {value}")]
    NotPowerOfTwo { field: &'static str, value: u64 },

    #[error("unknown replacement policy {0:?} for cache partitioning (requires SRRIP, LRU, MRU or PARTITION)")]
    UnknownPartitionPolicy(String),

    #[error("L1 associativity ({assoc}) is not divisible by the number of cores ({cores}) under cache partitioning")]
    AssocNotDivisibleByCores { assoc: usize, cores: usize },

    #[error("cache partitioning requires a shared L1 (PRIVATE_L1 must be false)")]
    PartitioningRequiresSharedL1,

    #[error("associativity must be at least 1, got {0}")]
    ZeroAssociativity(usize),

    #[error("cache size {size} is not evenly divisible by line_size*assoc ({line_size}*{assoc})")]
    SizeNotDivisible {
        size: usize,
        line_size: u32,
        assoc: usize,
    },
}

/// A fatal, should-never-happen invariant violation (spec §7/§8). Reimplements
/// the original's `ASSERT`/`FATAL_ERROR` convention: this type exists so a
/// diagnostic dump can be attached before the caller decides whether to
/// `panic!` (debug builds) or log-and-abort (release).
#[derive(thiserror::Error, Debug)]
#[error("protocol violation: {message}\n--- offending request ---\n{request:#?}")]
pub struct ProtocolViolation {
    pub message: String,
    pub request: Box<Request>,
}

impl ProtocolViolation {
    #[must_use]
    pub fn new(message: impl Into<String>, request: &Request) -> Self {
        Self {
            message: message.into(),
            request: Box::new(request.clone()),
        }
    }
}
