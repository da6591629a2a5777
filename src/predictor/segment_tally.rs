//! The segment-indexed tally predictor (spec §4.9, second shape). Grounded
//! in `original_source/pma/adaptive/int2/move_detector_info.hpp`: rather
//! than tracking individual hot *keys* in a circular queue, this variant
//! keeps a fixed-size array of per-segment hammer counts with configurable
//! decay, updated on every insert with `(segment, predecessor, successor)`
//! and cleared whenever a full-array rebalance resets the picture.

use super::{PermutedItem, Predictor};

pub struct SegmentTallyPredictor {
    tally: Vec<f64>,
    decay: f64,
    max_count: u32,
}

impl SegmentTallyPredictor {
    pub fn new(num_segments: usize, decay: f64) -> Self {
        SegmentTallyPredictor {
            tally: vec![0.0; num_segments],
            decay,
            max_count: 1 << 16,
        }
    }

    /// Record an insertion landing in `segment`, whose predecessor/successor
    /// keys are supplied so future extensions can key weight off sentinel
    /// hot values rather than raw segment occupancy; the current decay
    /// model only needs `segment` itself.
    pub fn record(&mut self, segment: usize, _predecessor: i64, _successor: i64) {
        for w in self.tally.iter_mut() {
            *w *= self.decay;
        }
        if let Some(slot) = self.tally.get_mut(segment) {
            *slot = (*slot + 1.0).min(self.max_count as f64);
        }
    }

    pub fn weight(&self, segment: usize) -> f64 {
        self.tally.get(segment).copied().unwrap_or(0.0)
    }
}

impl Predictor for SegmentTallyPredictor {
    fn update(&mut self, pointer: u64) {
        self.record(pointer as usize, i64::MIN, i64::MAX);
    }

    fn items(&self, min: u64, max: u64) -> Vec<PermutedItem> {
        let mut out: Vec<PermutedItem> = self
            .tally
            .iter()
            .enumerate()
            .filter(|(seg, &w)| w > 0.0 && (*seg as u64) >= min && (*seg as u64) <= max)
            .map(|(seg, &w)| PermutedItem {
                pointer: seg as u64,
                count: w.round() as u32,
                permuted_position: seg,
            })
            .collect();
        out.sort_by_key(|it| it.pointer);
        out
    }

    fn resize(&mut self, new_capacity: usize) {
        self.tally.resize(new_capacity, 0.0);
    }

    fn reset_ptr(&mut self, permuted_position: usize, new_pointer: u64) {
        if permuted_position >= self.tally.len() {
            return;
        }
        let w = self.tally[permuted_position];
        self.tally[permuted_position] = 0.0;
        let new_segment = new_pointer as usize;
        if new_segment < self.tally.len() {
            self.tally[new_segment] += w;
        }
    }

    fn set_max_count(&mut self, value: u32) {
        self.max_count = value.clamp(1, 1 << 16);
    }

    fn len(&self) -> usize {
        self.tally.iter().filter(|&&w| w > 0.0).count()
    }

    fn clear(&mut self) {
        for w in self.tally.iter_mut() {
            *w = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_hits_dominate_weight() {
        let mut p = SegmentTallyPredictor::new(8, 0.9);
        for _ in 0..50 {
            p.record(3, 0, 0);
        }
        p.record(5, 0, 0);
        assert!(p.weight(3) > p.weight(5));
    }
}
