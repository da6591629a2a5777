//! The rebalancer (spec §4.7): walks the calibrator tree to find the
//! smallest enclosing window whose density tolerates an insert or delete,
//! and performs the gather/scatter spread that redistributes elements
//! across that window according to the adaptive partitioner's plan.
//!
//! Grounded in `original_source/pma/generic/bulk_loading.cpp` and
//! `adaptive_rebalancing.cpp` for the window-search and gather/scatter
//! shape, and `buffered_rewired_memory.cpp` for the rewiring-aware variant.
//! `spread` gathers through the storage's flat view either way, but when
//! the window is rewired storage *and* exactly extent-aligned, it scatters
//! one extent at a time through `SparseSegmentedStorage::
//! scatter_extent_via_rewiring` (spec §4.7.4 "rewiring-aware spread")
//! instead of writing slot by slot; sub-extent windows and heap-backed
//! storage keep the direct in-place scatter, since there is no whole
//! extent there to swap. `spread` itself is used both for an in-window
//! rebalance and for the post-resize whole-array rebalance.

use crate::density::{calibrator_tree_height, CachedDensityBounds};
use crate::error::Result;
use crate::partition::{self, PartitionParams, Weight};
use crate::storage::SparseSegmentedStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Rebalance,
    Resize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Insert,
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub struct RebalancePlan {
    pub operation: Operation,
    pub window_start: usize,
    pub window_length: usize,
    pub window_level: usize,
    pub cardinality_after: usize,
}

/// Walk the calibrator tree upward from `segment`, looking for the
/// smallest enclosing, page-aligned window whose density (after applying
/// `direction`'s +-1 element) satisfies that level's bounds (spec
/// §4.7.1). Returns a [`Operation::Resize`] plan if even the root level
/// fails.
pub fn find_window(
    storage: &SparseSegmentedStorage,
    segment: usize,
    direction: Direction,
    density: &mut CachedDensityBounds,
    segments_per_extent: usize,
) -> RebalancePlan {
    let s = storage.number_segments();
    let c = storage.segment_capacity();
    let h = calibrator_tree_height(s);
    let extents_worth = s.div_ceil(segments_per_extent.max(1));
    let delta: i64 = match direction {
        Direction::Insert => 1,
        Direction::Delete => -1,
    };

    for level in 1..=h {
        let raw_length = 1usize << (level - 1);
        let window_length = raw_length.min(s);
        let window_start = (segment / window_length) * window_length;
        let window_start = window_start.min(s.saturating_sub(window_length));

        let mut cardinality_after = 0i64;
        for seg in window_start..(window_start + window_length).min(s) {
            cardinality_after += storage.size_of(seg) as i64;
        }
        cardinality_after += delta;
        let cardinality_after = cardinality_after.max(0) as usize;

        let capacity = window_length * c;
        let occupancy = cardinality_after as f64 / capacity as f64;
        let (rho, theta) = density.thresholds(h, level, extents_worth);

        let fits = match direction {
            Direction::Insert => occupancy <= theta,
            Direction::Delete => occupancy >= rho,
        };
        if fits {
            return RebalancePlan {
                operation: Operation::Rebalance,
                window_start,
                window_length,
                window_level: level,
                cardinality_after,
            };
        }
    }

    RebalancePlan {
        operation: Operation::Resize,
        window_start: 0,
        window_length: s,
        window_level: h,
        cardinality_after: (storage.cardinality() as i64 + delta).max(0) as usize,
    }
}

pub struct SpreadResult {
    /// `(segment, new_minimum_key_or_MIN_if_empty)` for every segment in
    /// the window, in ascending segment order.
    pub touched: Vec<(usize, i64)>,
    /// `(weight.idx, new_absolute_segment)` forwarded from the
    /// partitioner, for the predictor's `reset_ptr`.
    pub weight_segment: Vec<(usize, usize)>,
    /// The keys the merged-in insertion ended up between, `i64::MIN` /
    /// `i64::MAX` at a window boundary. Only meaningful when a pending
    /// insert was supplied.
    pub predecessor: i64,
    pub successor: i64,
}

/// Gather every element in `[window_start, window_start+window_length)`,
/// optionally merge in `pending_insert`, then scatter into the same
/// window according to the adaptive partitioner's plan over `weights`.
/// `segments_per_extent` gates the rewiring-aware scatter path; pass `0`
/// (or the storage's plain heap backing) to always fall back to the
/// direct in-place scatter.
pub fn spread(
    storage: &mut SparseSegmentedStorage,
    window_start: usize,
    window_length: usize,
    window_level: usize,
    pending_insert: Option<(i64, i64)>,
    weights: &[Weight],
    params: &mut PartitionParams,
    segments_per_extent: usize,
) -> Result<SpreadResult> {
    let mut gathered: Vec<(i64, i64)> = Vec::new();
    for seg in window_start..window_start + window_length {
        for slot in storage.occupied_range(seg) {
            gathered.push(storage.read_slot(slot));
        }
    }

    let (predecessor, successor) = if let Some((key, value)) = pending_insert {
        let pos = gathered.partition_point(|&(k, _)| k < key);
        let predecessor = if pos > 0 { gathered[pos - 1].0 } else { i64::MIN };
        let successor = if pos < gathered.len() {
            gathered[pos].0
        } else {
            i64::MAX
        };
        gathered.insert(pos, (key, value));
        (predecessor, successor)
    } else {
        (i64::MIN, i64::MAX)
    };

    let cardinality_after = gathered.len();
    let plan = partition::plan_partitions(
        window_start,
        window_length,
        window_level,
        cardinality_after,
        weights,
        params,
    );

    let use_rewiring_scatter = storage.is_rewired()
        && segments_per_extent > 0
        && window_start % segments_per_extent == 0
        && window_length % segments_per_extent == 0;

    let mut touched = Vec::with_capacity(window_length);
    let mut cursor = 0usize;
    let mut seg = window_start;
    let mut extent_buf: Vec<(usize, Vec<(i64, i64)>)> = Vec::with_capacity(segments_per_extent.max(1));
    for part in &plan.partitions {
        let counts = distribute_evenly(part.cardinality, part.segment_count);
        for &count in &counts {
            let min_key = if count > 0 { gathered[cursor].0 } else { i64::MIN };

            if use_rewiring_scatter {
                let pairs = gathered[cursor..cursor + count].to_vec();
                extent_buf.push((seg, pairs));
                if extent_buf.len() == segments_per_extent {
                    let extent_index = seg / segments_per_extent;
                    storage.scatter_extent_via_rewiring(extent_index, &extent_buf)?;
                    extent_buf.clear();
                }
            } else {
                storage.set_size(seg, count);
                let range = storage.occupied_range(seg);
                for (j, slot) in range.enumerate() {
                    let (k, v) = gathered[cursor + j];
                    storage.write_slot(slot, k, v);
                }
            }

            touched.push((seg, min_key));
            cursor += count;
            seg += 1;
        }
    }
    storage.recompute_cardinality();

    Ok(SpreadResult {
        touched,
        weight_segment: plan.weight_segment,
        predecessor,
        successor,
    })
}

/// Split `total` as evenly as possible across `count` buckets, the first
/// `total % count` buckets getting one extra (spec §4.7.3 "rounded up in
/// the first few segments").
fn distribute_evenly(total: usize, count: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let base = total / count;
    let rem = total % count;
    (0..count)
        .map(|i| if i < rem { base + 1 } else { base })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDirection {
    Grow,
    Shrink,
}

/// The new segment count for a doubling/halving resize (spec §4.7.5),
/// floored so a halving resize never drops below two segments (needed for
/// the parity pairing to make sense).
pub fn plan_resize(direction: ResizeDirection, number_segments: usize) -> usize {
    match direction {
        ResizeDirection::Grow => (number_segments * 2).max(2),
        ResizeDirection::Shrink => (number_segments / 2).max(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DensityParams, PmaConfig};

    fn test_config() -> PmaConfig {
        let mut c = PmaConfig::default();
        c.use_rewiring = false;
        c.segment_capacity = 32;
        c
    }

    #[test]
    fn find_window_grows_with_local_density_pressure() {
        let cfg = test_config();
        let mut storage = SparseSegmentedStorage::new(&cfg, 4).unwrap();
        for seg in 0..4 {
            for k in 0..28 {
                storage.insert(seg, (seg * 100 + k) as i64, 0).unwrap();
            }
        }
        let mut density = CachedDensityBounds::new(DensityParams::default(), 64);
        let plan = find_window(&storage, 0, Direction::Insert, &mut density, cfg.segments_per_extent());
        assert!(plan.window_length >= 1);
    }

    #[test]
    fn spread_preserves_total_cardinality_and_sort_order() {
        let cfg = test_config();
        let mut storage = SparseSegmentedStorage::new(&cfg, 4).unwrap();
        for seg in 0..4 {
            for i in 0..10 {
                storage.insert(seg, (seg * 1000 + i * 2) as i64, 0).unwrap();
            }
        }
        let mut density = CachedDensityBounds::new(DensityParams::default(), 64);
        let mut params = PartitionParams {
            density: &mut density,
            tree_height: 3,
            extents_worth_of_segments: 1,
            segment_capacity: 32,
            can_fill_segments: true,
            resize: false,
        };
        let result = spread(&mut storage, 0, 4, 3, Some((500, 1)), &[], &mut params, cfg.segments_per_extent()).unwrap();
        assert_eq!(storage.cardinality(), 41);
        assert_eq!(result.touched.len(), 4);

        let mut all_keys = Vec::new();
        for seg in 0..4 {
            for slot in storage.occupied_range(seg) {
                all_keys.push(storage.read_slot(slot).0);
            }
        }
        let mut sorted = all_keys.clone();
        sorted.sort();
        assert_eq!(all_keys, sorted);
    }

    #[cfg(unix)]
    #[test]
    fn spread_over_an_extent_aligned_rewired_window_uses_the_scatter_swap() {
        let mut cfg = PmaConfig::default();
        cfg.use_rewiring = true;
        cfg.segment_capacity = 32;
        cfg.pages_per_extent = 1;
        let segments_per_extent = cfg.segments_per_extent();
        assert_eq!(segments_per_extent, 16);

        let mut storage = SparseSegmentedStorage::new(&cfg, segments_per_extent).unwrap();
        assert!(storage.is_rewired());
        for seg in 0..segments_per_extent {
            for i in 0..10 {
                storage.insert(seg, (seg * 1000 + i * 2) as i64, (seg * 1000 + i * 2) as i64).unwrap();
            }
        }
        let total_before = storage.cardinality();

        let mut density = CachedDensityBounds::new(DensityParams::default(), 64);
        let mut params = PartitionParams {
            density: &mut density,
            tree_height: 5,
            extents_worth_of_segments: 1,
            segment_capacity: 32,
            can_fill_segments: true,
            resize: false,
        };
        let result = spread(
            &mut storage,
            0,
            segments_per_extent,
            5,
            Some((500, 12345)),
            &[],
            &mut params,
            segments_per_extent,
        )
        .unwrap();
        assert_eq!(storage.cardinality(), total_before + 1);
        assert_eq!(result.touched.len(), segments_per_extent);

        let mut all_keys = Vec::new();
        for seg in 0..segments_per_extent {
            for slot in storage.occupied_range(seg) {
                all_keys.push(storage.read_slot(slot));
            }
        }
        let mut sorted_keys: Vec<i64> = all_keys.iter().map(|&(k, _)| k).collect();
        sorted_keys.sort();
        assert_eq!(all_keys.iter().map(|&(k, _)| k).collect::<Vec<_>>(), sorted_keys);
        assert!(all_keys.iter().any(|&(k, v)| k == 500 && v == 12345));
    }
}
