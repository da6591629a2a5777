//! Profiler counters (supplementing spec §4 with an always-on ambient
//! observability surface, grounded in `original_source/pma/rebalancing_profiler.hpp`,
//! which accumulates exactly this shape of counter across the rebalancer's
//! operations). Exposed through [`crate::pma::PackedMemoryArray::stats`].

/// Running counts of the operations a [`crate::pma::PackedMemoryArray`]
/// has performed, for diagnostics and tests rather than the hot path
/// itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmaStats {
    pub inserts: u64,
    pub removes: u64,
    pub local_spreads: u64,
    pub resizes: u64,
    pub predictor_hits: u64,
}

impl PmaStats {
    pub fn new() -> Self {
        Self::default()
    }
}
