//! Range iteration and range-sum (spec §4.10). Grounded in
//! `original_source/pma/iterator.cpp`: walk segments in order, treating
//! each even/odd pair's `even_tail ‖ odd_head` as one contiguous run and
//! jumping across the inter-pair gap, bounded by `[kmin, kmax]`.

use crate::storage::SparseSegmentedStorage;

/// An in-order iterator over `[kmin, kmax]`, starting at `start_segment`
/// (typically `index.find_first(kmin)`) and stopping once either the key
/// bound or `end_segment` (typically `index.find_last(kmax)`) is passed.
pub struct PmaIter<'a> {
    storage: &'a SparseSegmentedStorage,
    segment: usize,
    end_segment: usize,
    pos_in_segment: usize,
    kmin: i64,
    kmax: i64,
    exhausted: bool,
}

impl<'a> PmaIter<'a> {
    pub fn new(storage: &'a SparseSegmentedStorage, start_segment: usize, end_segment: usize, kmax: i64) -> Self {
        Self::bounded(storage, start_segment, end_segment, i64::MIN, kmax)
    }

    pub fn bounded(
        storage: &'a SparseSegmentedStorage,
        start_segment: usize,
        end_segment: usize,
        kmin: i64,
        kmax: i64,
    ) -> Self {
        PmaIter {
            storage,
            segment: start_segment,
            end_segment,
            pos_in_segment: 0,
            kmin,
            kmax,
            exhausted: false,
        }
    }

    fn advance_to_next_nonempty_segment(&mut self) -> bool {
        while self.segment <= self.end_segment {
            if self.pos_in_segment < self.storage.size_of(self.segment) {
                return true;
            }
            self.segment += 1;
            self.pos_in_segment = 0;
        }
        false
    }
}

impl<'a> Iterator for PmaIter<'a> {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        loop {
            if self.segment > self.end_segment || self.storage.number_segments() == 0 {
                self.exhausted = true;
                return None;
            }
            if !self.advance_to_next_nonempty_segment() {
                self.exhausted = true;
                return None;
            }
            let range = self.storage.occupied_range(self.segment);
            let slot = range.start + self.pos_in_segment;
            let (key, value) = self.storage.read_slot(slot);
            if key > self.kmax {
                self.exhausted = true;
                return None;
            }
            self.pos_in_segment += 1;
            if key < self.kmin {
                continue;
            }
            return Some((key, value));
        }
    }
}

/// The result of a range-sum query (spec §4.10): the population and the
/// summed keys/values over `[kmin, kmax]`, plus the first/last key
/// actually visited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSummary {
    pub num_elements: usize,
    pub sum_keys: i128,
    pub sum_values: i128,
    pub first_key: Option<i64>,
    pub last_key: Option<i64>,
}

/// Sum `[kmin, kmax]` in straight-line loops across each segment's
/// occupied run, rather than materialising `(key, value)` pairs through
/// the general iterator (spec §4.10 "performs the summation in
/// straight-line loops across each run").
pub fn range_sum(
    storage: &SparseSegmentedStorage,
    start_segment: usize,
    end_segment: usize,
    kmin: i64,
    kmax: i64,
) -> RangeSummary {
    let mut num_elements = 0usize;
    let mut sum_keys: i128 = 0;
    let mut sum_values: i128 = 0;
    let mut first_key = None;
    let mut last_key = None;

    for seg in start_segment..=end_segment.min(storage.number_segments().saturating_sub(1)) {
        let range = storage.occupied_range(seg);
        for slot in range {
            let (key, value) = storage.read_slot(slot);
            if key < kmin {
                continue;
            }
            if key > kmax {
                break;
            }
            if first_key.is_none() {
                first_key = Some(key);
            }
            last_key = Some(key);
            sum_keys += key as i128;
            sum_values += value as i128;
            num_elements += 1;
        }
    }

    RangeSummary {
        num_elements,
        sum_keys,
        sum_values,
        first_key,
        last_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PmaConfig;

    fn test_config() -> PmaConfig {
        let mut c = PmaConfig::default();
        c.use_rewiring = false;
        c.segment_capacity = 32;
        c
    }

    #[test]
    fn iterates_in_sorted_order_across_segments() {
        let cfg = test_config();
        let mut storage = SparseSegmentedStorage::new(&cfg, 4).unwrap();
        for seg in 0..4 {
            for i in 0..5 {
                storage.insert(seg, (seg * 1000 + i) as i64, (seg * 1000 + i) as i64).unwrap();
            }
        }
        let it = PmaIter::new(&storage, 0, 3, i64::MAX);
        let collected: Vec<i64> = it.map(|(k, _)| k).collect();
        let mut sorted = collected.clone();
        sorted.sort();
        assert_eq!(collected, sorted);
        assert_eq!(collected.len(), 20);
    }

    #[test]
    fn bounded_iterator_excludes_keys_below_kmin() {
        let cfg = test_config();
        let mut storage = SparseSegmentedStorage::new(&cfg, 2).unwrap();
        for k in [10, 20, 30, 40, 50] {
            storage.insert(1, k, k * 2).unwrap();
        }
        let it = PmaIter::bounded(&storage, 0, 1, 25, 45);
        let collected: Vec<(i64, i64)> = it.collect();
        assert_eq!(collected, vec![(30, 60), (40, 80)]);
    }

    #[test]
    fn range_sum_matches_manual_sum_over_bounds() {
        let cfg = test_config();
        let mut storage = SparseSegmentedStorage::new(&cfg, 2).unwrap();
        for k in [10, 20, 30, 40, 50] {
            storage.insert(1, k, k * 2).unwrap();
        }
        let summary = range_sum(&storage, 0, 1, 15, 45);
        assert_eq!(summary.num_elements, 3);
        assert_eq!(summary.sum_keys, 20 + 30 + 40);
        assert_eq!(summary.first_key, Some(20));
        assert_eq!(summary.last_key, Some(40));
    }
}
