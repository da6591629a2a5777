//! The predictor / detector (spec §4.9): a bounded record of insertion
//! hot-spots consulted by the adaptive partitioner (§4.8) to bias free
//! space towards hammered keys. Two shapes coexist, behind a common
//! trait so the rebalancer and partitioner can be written once.

pub mod mru;
pub mod segment_tally;

pub use mru::MruPredictor;
pub use segment_tally::SegmentTallyPredictor;

/// An entry returned by [`Predictor::items`], tagged with its physical
/// position inside the predictor's own backing storage so that, after a
/// spread relocates the pointed-at key, the rebalancer can call
/// [`Predictor::reset_ptr`] to keep the predictor's records valid (Design
/// Notes: "Callbacks-through-indices": never leak raw pointers across a
/// rebalance, only positions into the predictor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermutedItem {
    pub pointer: u64,
    pub count: u32,
    pub permuted_position: usize,
}

pub trait Predictor {
    /// Record a hit on `pointer` (a stable-until-the-next-spread slot
    /// index inside the storage).
    fn update(&mut self, pointer: u64);

    /// All recorded entries whose pointer falls in `[min, max]`, sorted
    /// ascending by pointer.
    fn items(&self, min: u64, max: u64) -> Vec<PermutedItem>;

    /// Resize the predictor's backing capacity.
    fn resize(&mut self, new_capacity: usize);

    /// Update the pointer stored at `permuted_position` after a spread has
    /// relocated the key it referred to.
    fn reset_ptr(&mut self, permuted_position: usize, new_pointer: u64);

    fn set_max_count(&mut self, value: u32);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// Dispatches between the two predictor shapes without paying for dynamic
/// dispatch on the hot insert path (Design Notes: tagged variants rather
/// than inheritance).
pub enum AnyPredictor {
    Mru(MruPredictor),
    SegmentTally(SegmentTallyPredictor),
}

impl Predictor for AnyPredictor {
    fn update(&mut self, pointer: u64) {
        match self {
            AnyPredictor::Mru(p) => p.update(pointer),
            AnyPredictor::SegmentTally(p) => p.update(pointer),
        }
    }

    fn items(&self, min: u64, max: u64) -> Vec<PermutedItem> {
        match self {
            AnyPredictor::Mru(p) => p.items(min, max),
            AnyPredictor::SegmentTally(p) => p.items(min, max),
        }
    }

    fn resize(&mut self, new_capacity: usize) {
        match self {
            AnyPredictor::Mru(p) => p.resize(new_capacity),
            AnyPredictor::SegmentTally(p) => p.resize(new_capacity),
        }
    }

    fn reset_ptr(&mut self, permuted_position: usize, new_pointer: u64) {
        match self {
            AnyPredictor::Mru(p) => p.reset_ptr(permuted_position, new_pointer),
            AnyPredictor::SegmentTally(p) => p.reset_ptr(permuted_position, new_pointer),
        }
    }

    fn set_max_count(&mut self, value: u32) {
        match self {
            AnyPredictor::Mru(p) => p.set_max_count(value),
            AnyPredictor::SegmentTally(p) => p.set_max_count(value),
        }
    }

    fn len(&self) -> usize {
        match self {
            AnyPredictor::Mru(p) => p.len(),
            AnyPredictor::SegmentTally(p) => p.len(),
        }
    }

    fn clear(&mut self) {
        match self {
            AnyPredictor::Mru(p) => p.clear(),
            AnyPredictor::SegmentTally(p) => p.clear(),
        }
    }
}
