//! The adaptive partitioner (spec §4.8, "APMA"): given a window, its
//! post-operation cardinality and a set of recent hot-spot weights,
//! produces an uneven split of cardinalities across segments that biases
//! free space towards the hammered positions. With no weights it
//! degenerates to uniform partitioning.
//!
//! Grounded in the binary-recursion description of spec §4.8 itself (the
//! surviving specification for this algorithm is more precise than the
//! source's `adaptive_rebalancing.cpp`, which this follows in spirit:
//! walk the calibrator tree top-down, splitting the admissible cardinality
//! range at each level by the point that best balances the recorded
//! weight either side of the split).

use crate::density::CachedDensityBounds;

/// A hot-spot record intersecting the window being partitioned. `position`
/// is expressed in the same slot-offset units as the window's capacity
/// (`0..window_length*segment_capacity`), consistent across recursive
/// calls by shifting origin as we descend.
#[derive(Debug, Clone, Copy)]
pub struct Weight {
    /// Index into the caller's original weight list, so the resulting
    /// move-detector remap can be applied back to the predictor.
    pub idx: usize,
    pub position: i64,
    pub amount: f64,
}

/// A run of adjacent segments sharing one target cardinality (spec §4.8
/// "Output"). `cardinality` is the total to spread across `segment_count`
/// segments, rounded up in the first few if not evenly divisible. The
/// rounding itself is the scatter phase's job (spec §4.7.3), not this
/// planner's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub cardinality: usize,
    pub segment_count: usize,
}

pub struct PartitionPlan {
    pub partitions: Vec<Partition>,
    /// `(weight.idx, new_absolute_segment)` for every weight that reached
    /// a base-case (single-segment) partition.
    pub weight_segment: Vec<(usize, usize)>,
}

pub struct PartitionParams<'a> {
    pub density: &'a mut CachedDensityBounds,
    pub tree_height: usize,
    pub extents_worth_of_segments: usize,
    pub segment_capacity: usize,
    /// If false, at least one slot must remain free per segment.
    pub can_fill_segments: bool,
    /// Disables uneven splits at the two lowest levels of the tree
    /// (closest to individual segments), per spec §4.8 "Input".
    pub resize: bool,
}

/// Plan a spread of `cardinality` elements across `window_length` segments
/// starting at absolute segment `window_start`, sitting at calibrator-tree
/// level `window_level` (the window's own height, `1` for a single
/// segment up to the tree's full height for the whole array).
pub fn plan_partitions(
    window_start: usize,
    window_length: usize,
    window_level: usize,
    cardinality: usize,
    weights: &[Weight],
    params: &mut PartitionParams,
) -> PartitionPlan {
    let mut out = PartitionPlan {
        partitions: Vec::new(),
        weight_segment: Vec::new(),
    };
    recurse(
        window_start,
        window_length,
        window_level,
        cardinality,
        weights,
        params,
        &mut out,
    );
    out
}

fn recurse(
    start: usize,
    length: usize,
    level: usize,
    cardinality: usize,
    weights: &[Weight],
    params: &mut PartitionParams,
    out: &mut PartitionPlan,
) {
    if length == 1 {
        out.partitions.push(Partition {
            cardinality,
            segment_count: 1,
        });
        for w in weights {
            out.weight_segment.push((w.idx, start));
        }
        return;
    }

    if weights.is_empty() || (params.resize && length == 2) {
        out.partitions.push(Partition {
            cardinality,
            segment_count: length,
        });
        return;
    }

    let half = length / 2;
    let right_len = length - half;
    let c = params.segment_capacity;
    let c_child_left = c * half;
    let c_child_right = c * right_len;

    let child_level = level.saturating_sub(1).max(1);
    let (rho, theta) = params
        .density
        .thresholds(params.tree_height, child_level, params.extents_worth_of_segments);

    let mut density_lo = (rho * c_child_left as f64).ceil() as i64;
    let mut density_hi = (theta * c_child_left as f64).floor() as i64;
    if !params.can_fill_segments {
        density_hi = density_hi.min((c_child_left.saturating_sub(half)) as i64);
        density_lo = density_lo.min(density_hi);
    }

    let size_max_left = if params.can_fill_segments {
        c_child_left
    } else {
        c_child_left.saturating_sub(half)
    } as i64;
    let size_max_right = if params.can_fill_segments {
        c_child_right
    } else {
        c_child_right.saturating_sub(right_len)
    } as i64;
    let n = cardinality as i64;
    // Complementary fill: the left child's cardinality is pinned by what's
    // left over once the right child takes at most `size_max_right` and at
    // least `0`.
    let fill_lo = n - size_max_right;
    let fill_hi = n;

    let mut start_c = density_lo.max(fill_lo).max(0);
    let mut end_c = density_hi.min(fill_hi).min(n);
    if start_c > end_c {
        // The admissible range came up empty (can happen under extreme
        // skew); fall back to the even split so the caller always gets a
        // valid plan rather than an unsatisfiable one.
        let per = n / length as i64;
        start_c = per * half as i64;
        end_c = start_c;
    }
    start_c = start_c.clamp(0, n);
    end_c = end_c.clamp(start_c, n);

    let best_c = best_split(weights, start_c, end_c, c_child_left, c_child_right, n);
    let split_idx = weights.partition_point(|w| (w.position as i64) < best_c);
    let (left_weights, right_weights) = weights.split_at(split_idx);

    let left_card = best_c as usize;
    let right_card = cardinality - left_card;

    recurse(start, half, child_level, left_card, left_weights, params, out);
    recurse(
        start + half,
        right_len,
        child_level,
        right_card,
        right_weights,
        params,
        out,
    );
}

/// Choose the split point `c` in `[lo, hi]` minimising
/// `| L(c)/(c_child_left - c) - R(c)/max(1, c_child_right - (N - c)) |`,
/// ties broken toward the earliest `c`.
fn best_split(
    weights: &[Weight],
    lo: i64,
    hi: i64,
    c_child_left: usize,
    c_child_right: usize,
    n: i64,
) -> i64 {
    if lo >= hi {
        return lo.max(0);
    }
    let c_child_right = c_child_right as i64;
    let mut best = lo;
    let mut best_score = f64::INFINITY;
    let mut c = lo;
    while c <= hi {
        let l: f64 = weights
            .iter()
            .filter(|w| (w.position as i64) < c)
            .map(|w| w.amount)
            .sum();
        let r: f64 = weights
            .iter()
            .filter(|w| (w.position as i64) >= c)
            .map(|w| w.amount)
            .sum();
        let left_denom = (c_child_left as i64 - c).max(1) as f64;
        let right_denom = (c_child_right - (n - c)).max(1) as f64;
        let score = (l / left_denom - r / right_denom).abs();
        if score < best_score {
            best_score = score;
            best = c;
        }
        c += 1;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DensityParams;

    fn params<'a>(density: &'a mut CachedDensityBounds) -> PartitionParams<'a> {
        PartitionParams {
            density,
            tree_height: 4,
            extents_worth_of_segments: 1,
            segment_capacity: 32,
            can_fill_segments: true,
            resize: false,
        }
    }

    #[test]
    fn uniform_partitioning_with_no_weights() {
        let mut density = CachedDensityBounds::new(DensityParams::default(), 64);
        let mut p = params(&mut density);
        let plan = plan_partitions(0, 4, 4, 64, &[], &mut p);
        let total_segments: usize = plan.partitions.iter().map(|p| p.segment_count).sum();
        let total_card: usize = plan.partitions.iter().map(|p| p.cardinality).sum();
        assert_eq!(total_segments, 4);
        assert_eq!(total_card, 64);
    }

    #[test]
    fn hot_weight_biases_its_own_segment_towards_less_free_space() {
        let mut density = CachedDensityBounds::new(DensityParams::default(), 64);
        let mut p = params(&mut density);
        // A single very hot position near the start of the window.
        let weights = vec![Weight {
            idx: 0,
            position: 5,
            amount: 1000.0,
        }];
        let plan = plan_partitions(0, 4, 4, 64, &weights, &mut p);
        let total_card: usize = plan.partitions.iter().map(|p| p.cardinality).sum();
        assert_eq!(total_card, 64);
        assert!(!plan.weight_segment.is_empty());
    }
}
