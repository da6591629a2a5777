//! The public facade (spec §4 overview / §7): wires storage, separator
//! index, predictor, density bounds and the rebalancer together into one
//! ordered key-value store. Grounded in `original_source/pma/generic/packed_memory_array.cpp`'s
//! `insert`/`find`/`remove` orchestration, which this module's control
//! flow follows closely (separator lookup -> in-place insert if room,
//! else rebalancer finds a window -> adaptive partitioner -> spread, with
//! a resize as the fallback when no window fits).

use crate::config::PmaConfig;
use crate::density::{calibrator_tree_height, CachedDensityBounds};
use crate::error::{PmaError, Result};
use crate::index::{AnySeparatorIndex, DynamicSeparatorIndex, SeparatorIndex, StaticSeparatorIndex};
use crate::iter::{range_sum, PmaIter, RangeSummary};
use crate::partition::{PartitionParams, Weight};
use crate::predictor::{AnyPredictor, MruPredictor, Predictor, SegmentTallyPredictor};
use crate::rebalance::{self, Direction, Operation, ResizeDirection};
use crate::stats::PmaStats;
use crate::storage::SparseSegmentedStorage;
use log::{debug, info, trace};

/// Which separator-index variant backs a given store (spec §4.4 vs §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Static,
    Dynamic,
}

/// Which predictor/detector variant backs a given store (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorKind {
    Mru,
    SegmentTally,
}

/// An in-memory, cache-aware ordered key-value store built on the Packed
/// Memory Array family (spec §1 overview).
pub struct PackedMemoryArray {
    config: PmaConfig,
    storage: SparseSegmentedStorage,
    index: AnySeparatorIndex,
    predictor: AnyPredictor,
    density: CachedDensityBounds,
    /// The separator currently recorded in `index` for each segment, kept
    /// so the dynamic index variant can remove its stale entry before
    /// inserting the new one (spec §4.5; `AnySeparatorIndex::sync`).
    segment_min: Vec<i64>,
    stats: PmaStats,
}

impl PackedMemoryArray {
    /// Build a store with the static separator index and MRU predictor,
    /// the combination spec §7's constructor signature defaults to.
    pub fn new(config: PmaConfig) -> Result<Self> {
        Self::with_kinds(config, IndexKind::Static, PredictorKind::Mru)
    }

    pub fn with_kinds(config: PmaConfig, index_kind: IndexKind, predictor_kind: PredictorKind) -> Result<Self> {
        config.validate()?;
        let initial_segments = 2;
        let storage = SparseSegmentedStorage::new(&config, initial_segments)?;

        let mut index = match index_kind {
            IndexKind::Static => AnySeparatorIndex::Static(StaticSeparatorIndex::new(config.block_size)),
            IndexKind::Dynamic => {
                AnySeparatorIndex::Dynamic(DynamicSeparatorIndex::new(config.block_size, config.block_size))
            }
        };
        index.rebuild(initial_segments);

        let height = calibrator_tree_height(initial_segments);
        let predictor_capacity = (height * config.predictor_scale).max(4);
        let predictor = match predictor_kind {
            PredictorKind::Mru => AnyPredictor::Mru(MruPredictor::new(predictor_capacity, config.predictor_count_max)),
            PredictorKind::SegmentTally => {
                AnyPredictor::SegmentTally(SegmentTallyPredictor::new(initial_segments, 0.9))
            }
        };

        let density = CachedDensityBounds::new(config.density_bounds, config.primary_density_cutoff_extents);

        info!(
            "PackedMemoryArray::new segment_capacity={} initial_segments={} rewiring={}",
            config.segment_capacity, initial_segments, storage.is_rewired()
        );

        Ok(PackedMemoryArray {
            config,
            storage,
            index,
            predictor,
            density,
            segment_min: vec![i64::MIN; initial_segments],
            stats: PmaStats::new(),
        })
    }

    pub fn size(&self) -> usize {
        self.storage.cardinality()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.storage.number_segments() * self.storage.segment_capacity()
    }

    pub fn memory_footprint(&self) -> usize {
        self.storage.memory_footprint()
    }

    pub fn stats(&self) -> PmaStats {
        self.stats
    }

    /// Discard every element, resetting to the construction-time segment
    /// count. Not part of the original's surface (spec's Non-goals don't
    /// exclude it); a cheap, obviously-correct convenience grounded in the
    /// same reset the resizer already performs after a resize.
    pub fn clear(&mut self) -> Result<()> {
        let initial_segments = 2;
        self.storage = SparseSegmentedStorage::new(&self.config, initial_segments)?;
        self.index.rebuild(initial_segments);
        self.segment_min = vec![i64::MIN; initial_segments];
        self.predictor.clear();
        self.predictor.resize((calibrator_tree_height(initial_segments) * self.config.predictor_scale).max(4));
        Ok(())
    }

    fn segments_per_extent(&self) -> usize {
        self.config.segments_per_extent()
    }

    fn window_weights(&self, window_start: usize, window_length: usize) -> Vec<Weight> {
        let lo = window_start as u64;
        let hi = (window_start + window_length).saturating_sub(1) as u64;
        self.predictor
            .items(lo, hi)
            .into_iter()
            .map(|item| Weight {
                idx: item.permuted_position,
                position: ((item.pointer - lo) as i64) * self.storage.segment_capacity() as i64,
                amount: item.count as f64,
            })
            .collect()
    }

    fn apply_touched(&mut self, touched: &[(usize, i64)]) {
        for &(seg, new_key) in touched {
            let old = self.segment_min.get(seg).copied();
            self.index.sync(seg, old, new_key);
            if seg >= self.segment_min.len() {
                self.segment_min.resize(seg + 1, i64::MIN);
            }
            self.segment_min[seg] = new_key;
        }
    }

    fn apply_weight_remap(&mut self, remap: &[(usize, usize)]) {
        for &(permuted_position, new_segment) in remap {
            self.predictor.reset_ptr(permuted_position, new_segment as u64);
        }
    }

    /// Grow the storage to `new_number_segments`, preserving the contents
    /// of every existing segment at its current segment index. The
    /// subsequent `spread` performs redistribution, not this step.
    /// Rewiring-backed storage extends in place; heap-backed storage is
    /// rebuilt and the old contents copied across, since spec §4.3 says
    /// heap-mode `extend` is unsupported and growth must reallocate.
    fn ensure_capacity(&mut self, new_number_segments: usize) -> Result<()> {
        if self.storage.extend(new_number_segments).is_ok() {
            return Ok(());
        }
        let mut new_storage = SparseSegmentedStorage::new(&self.config, new_number_segments)?;
        for seg in 0..self.storage.number_segments() {
            let n = self.storage.size_of(seg);
            new_storage.set_size(seg, n);
            let old_range = self.storage.occupied_range(seg);
            let new_range = new_storage.occupied_range(seg);
            for (old_slot, new_slot) in old_range.zip(new_range) {
                let (k, v) = self.storage.read_slot(old_slot);
                new_storage.write_slot(new_slot, k, v);
            }
        }
        new_storage.recompute_cardinality();
        self.storage = new_storage;
        Ok(())
    }

    fn shrink_capacity(&mut self, new_number_segments: usize) -> Result<()> {
        if self.storage.shrink(new_number_segments).is_ok() {
            return Ok(());
        }
        let mut new_storage = SparseSegmentedStorage::new(&self.config, new_number_segments)?;
        for seg in 0..new_number_segments {
            let n = self.storage.size_of(seg);
            new_storage.set_size(seg, n);
            let old_range = self.storage.occupied_range(seg);
            let new_range = new_storage.occupied_range(seg);
            for (old_slot, new_slot) in old_range.zip(new_range) {
                let (k, v) = self.storage.read_slot(old_slot);
                new_storage.write_slot(new_slot, k, v);
            }
        }
        new_storage.recompute_cardinality();
        self.storage = new_storage;
        Ok(())
    }

    /// Resize (spec §4.7.5) in the insert direction, merging `pending` in
    /// during the same spread, then rebuild the index and reset the
    /// predictor at the new height.
    fn resize_and_insert(&mut self, key: i64, value: i64) -> Result<()> {
        let new_segments = rebalance::plan_resize(ResizeDirection::Grow, self.storage.number_segments());
        debug!(
            "resize grow {} -> {} segments",
            self.storage.number_segments(),
            new_segments
        );
        self.ensure_capacity(new_segments)?;
        self.finish_resize(Some((key, value)), new_segments)
    }

    fn resize_shrink(&mut self) -> Result<()> {
        let new_segments = rebalance::plan_resize(ResizeDirection::Shrink, self.storage.number_segments());
        if new_segments >= self.storage.number_segments() {
            return Ok(());
        }
        debug!(
            "resize shrink {} -> {} segments",
            self.storage.number_segments(),
            new_segments
        );
        self.shrink_capacity(new_segments)?;
        self.finish_resize(None, new_segments)
    }

    fn finish_resize(&mut self, pending: Option<(i64, i64)>, new_segments: usize) -> Result<()> {
        let h = calibrator_tree_height(new_segments);
        let extents_worth = new_segments.div_ceil(self.segments_per_extent().max(1));
        let mut params = PartitionParams {
            density: &mut self.density,
            tree_height: h,
            extents_worth_of_segments: extents_worth,
            segment_capacity: self.storage.segment_capacity(),
            can_fill_segments: true,
            resize: true,
        };
        let result = rebalance::spread(
            &mut self.storage,
            0,
            new_segments,
            h,
            pending,
            &[],
            &mut params,
            self.segments_per_extent(),
        )?;

        self.index.rebuild(new_segments);
        self.segment_min = vec![i64::MIN; new_segments];
        self.apply_touched(&result.touched);

        let predictor_capacity = (h * self.config.predictor_scale).max(4);
        self.predictor.clear();
        self.predictor.resize(predictor_capacity);

        self.stats.resizes += 1;
        Ok(())
    }

    /// Insert `(key, value)`. The store is an ordered multiset of pairs
    /// rather than a deduplicating map: inserting an already-present key
    /// adds a second entry rather than overwriting (grounded in
    /// `original_source/pma/adaptive/bh07_v2/packed_memory_array.cpp`'s
    /// `insert_common`, which never checks for an existing key before
    /// placing the new one).
    pub fn insert(&mut self, key: i64, value: i64) -> Result<()> {
        let segment = self.index.find(key).min(self.storage.number_segments().saturating_sub(1));
        let capacity = self.storage.segment_capacity();

        if self.storage.size_of(segment) < capacity {
            let neighbours = self.storage.insert(segment, key, value)?;
            let new_min = self.storage.key_at(segment, 0).unwrap_or(i64::MIN);
            self.apply_touched(&[(segment, new_min)]);
            self.predictor.update(segment as u64);
            self.stats.inserts += 1;
            trace!("insert {} direct into segment {} (pred {}, succ {})", key, segment, neighbours.predecessor, neighbours.successor);
            return Ok(());
        }

        let plan = rebalance::find_window(
            &self.storage,
            segment,
            Direction::Insert,
            &mut self.density,
            self.segments_per_extent(),
        );

        match plan.operation {
            Operation::Rebalance => {
                let weights = self.window_weights(plan.window_start, plan.window_length);
                let extents_worth = self
                    .storage
                    .number_segments()
                    .div_ceil(self.segments_per_extent().max(1));
                let h = calibrator_tree_height(self.storage.number_segments());
                let mut params = PartitionParams {
                    density: &mut self.density,
                    tree_height: h,
                    extents_worth_of_segments: extents_worth,
                    segment_capacity: capacity,
                    can_fill_segments: true,
                    resize: false,
                };
                let result = rebalance::spread(
                    &mut self.storage,
                    plan.window_start,
                    plan.window_length,
                    plan.window_level,
                    Some((key, value)),
                    &weights,
                    &mut params,
                    self.segments_per_extent(),
                )?;
                self.apply_touched(&result.touched);
                self.apply_weight_remap(&result.weight_segment);
                let final_segment = self.index.find(key);
                self.predictor.update(final_segment as u64);
                self.stats.local_spreads += 1;
            }
            Operation::Resize => {
                self.resize_and_insert(key, value)?;
                let final_segment = self.index.find(key);
                self.predictor.update(final_segment as u64);
            }
        }
        self.stats.inserts += 1;
        Ok(())
    }

    /// Look up the value stored for `key`, if present (spec §7 `find`,
    /// point form).
    pub fn find(&self, key: i64) -> Option<i64> {
        if self.storage.number_segments() == 0 {
            return None;
        }
        let segment = self.index.find(key);
        let range = self.storage.occupied_range(segment);
        for slot in range {
            let (k, v) = self.storage.read_slot(slot);
            if k == key {
                return Some(v);
            }
            if k > key {
                break;
            }
        }
        None
    }

    /// Remove `key`, returning its value if it was present (spec §7
    /// `remove`). May trigger a halving resize if the overall density
    /// falls below `0.5` (spec §4.7.5).
    pub fn remove(&mut self, key: i64) -> Result<Option<i64>> {
        if self.storage.number_segments() == 0 {
            return Ok(None);
        }
        let segment = self.index.find(key);
        let removed = self.storage.remove(segment, key);
        if removed.is_none() {
            return Ok(None);
        }

        let new_min = self.storage.key_at(segment, 0).unwrap_or(i64::MIN);
        self.apply_touched(&[(segment, new_min)]);
        self.stats.removes += 1;

        let capacity = self.storage.segment_capacity();
        let rho_floor = self.config.density_bounds.rho_0;
        let occupancy = self.storage.size_of(segment) as f64 / capacity as f64;
        if occupancy < rho_floor {
            let plan = rebalance::find_window(
                &self.storage,
                segment,
                Direction::Delete,
                &mut self.density,
                self.segments_per_extent(),
            );
            if plan.operation == Operation::Rebalance {
                let weights = self.window_weights(plan.window_start, plan.window_length);
                let extents_worth = self
                    .storage
                    .number_segments()
                    .div_ceil(self.segments_per_extent().max(1));
                let h = calibrator_tree_height(self.storage.number_segments());
                let cap = self.storage.segment_capacity();
                let mut params = PartitionParams {
                    density: &mut self.density,
                    tree_height: h,
                    extents_worth_of_segments: extents_worth,
                    segment_capacity: cap,
                    can_fill_segments: true,
                    resize: false,
                };
                let result = rebalance::spread(
                    &mut self.storage,
                    plan.window_start,
                    plan.window_length,
                    plan.window_level,
                    None,
                    &weights,
                    &mut params,
                    self.segments_per_extent(),
                )?;
                self.apply_touched(&result.touched);
                self.apply_weight_remap(&result.weight_segment);
            }
        }

        let overall_density = self.storage.cardinality() as f64
            / (self.storage.number_segments() * self.storage.segment_capacity()) as f64;
        if overall_density < 0.5 && self.storage.number_segments() > 2 {
            self.resize_shrink()?;
        }

        Ok(removed)
    }

    /// An in-order iterator over `[kmin, kmax]` (spec §4.10).
    pub fn find_range(&self, kmin: i64, kmax: i64) -> Result<PmaIter<'_>> {
        if kmin > kmax {
            return Err(PmaError::invalid("find_range: kmin > kmax"));
        }
        if self.storage.number_segments() == 0 {
            return Ok(PmaIter::bounded(&self.storage, 0, 0, kmin, kmax));
        }
        let start = self.index.find_first(kmin);
        let end = self.index.find_last(kmax).max(start);
        Ok(PmaIter::bounded(&self.storage, start, end, kmin, kmax))
    }

    /// Aggregate `[kmin, kmax]` in one pass (spec §4.10 range-sum).
    pub fn sum(&self, kmin: i64, kmax: i64) -> Result<RangeSummary> {
        if kmin > kmax {
            return Err(PmaError::invalid("sum: kmin > kmax"));
        }
        if self.storage.number_segments() == 0 {
            return Ok(RangeSummary {
                num_elements: 0,
                sum_keys: 0,
                sum_values: 0,
                first_key: None,
                last_key: None,
            });
        }
        let start = self.index.find_first(kmin);
        let end = self.index.find_last(kmax).max(start);
        Ok(range_sum(&self.storage, start, end, kmin, kmax))
    }

    /// Dump every `(key, value)` pair in order, for debugging and tests
    /// (spec §7 `dump`).
    pub fn dump(&self) -> Vec<(i64, i64)> {
        if self.storage.number_segments() == 0 {
            return Vec::new();
        }
        PmaIter::new(&self.storage, 0, self.storage.number_segments() - 1, i64::MAX).collect()
    }
}
