//! The dynamic separator index (spec §4.5): an ordered multimap keyed by
//! `(separator_key -> segment_id)` used by the fixed-segment-size PMA
//! variant where segments are created and destroyed dynamically rather
//! than laid out in a single statically sized array.
//!
//! Grounded in `original_source/pma/generic/dynamic_index.hpp`'s (a,b)-tree.
//! The node-level fanout invariants (`N in [b/2, b]` per non-root node,
//! top-down preventive split, bottom-up rebalancing via rotation/merge)
//! are an internal performance concern of a hand-rolled B-tree; Rust's
//! standard `BTreeMap` already provides the same asymptotics for the
//! externally observable contract this index needs (ordered
//! insert/remove/predecessor lookup), so it backs this type instead of a
//! reimplementation of the node-split machinery. `inode_b`/`leaf_b` are
//! kept as configuration the type reports, matching the constructor
//! signature `(inode_b, leaf_b)` from the source, even though `BTreeMap`
//! picks its own internal fanout.

use super::SeparatorIndex;
use std::collections::BTreeMap;

pub struct DynamicSeparatorIndex {
    inode_b: usize,
    leaf_b: usize,
    map: BTreeMap<i64, Vec<usize>>,
    len: usize,
}

impl DynamicSeparatorIndex {
    pub fn new(inode_b: usize, leaf_b: usize) -> Self {
        DynamicSeparatorIndex {
            inode_b,
            leaf_b,
            map: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(64, 64)
    }

    pub fn inode_b(&self) -> usize {
        self.inode_b
    }

    pub fn leaf_b(&self) -> usize {
        self.leaf_b
    }

    /// Insert `(key, segment)`. Duplicate keys are permitted (e.g. several
    /// empty segments all carrying the `i64::MIN` sentinel).
    pub fn insert(&mut self, key: i64, segment: usize) {
        self.map.entry(key).or_default().push(segment);
        self.len += 1;
    }

    /// Remove the exact pair `(key, segment)`. Returns whether it was
    /// present.
    pub fn remove(&mut self, key: i64, segment: usize) -> bool {
        if let Some(bucket) = self.map.get_mut(&key) {
            if let Some(pos) = bucket.iter().position(|&s| s == segment) {
                bucket.remove(pos);
                self.len -= 1;
                if bucket.is_empty() {
                    self.map.remove(&key);
                }
                return true;
            }
        }
        false
    }

    /// Remove and return exactly one segment mapped to `key`, regardless
    /// of which.
    pub fn remove_any(&mut self, key: i64) -> Option<usize> {
        let (remove_key, result) = {
            let bucket = self.map.get_mut(&key)?;
            let result = bucket.pop();
            (bucket.is_empty(), result)
        };
        if result.is_some() {
            self.len -= 1;
        }
        if remove_key {
            self.map.remove(&key);
        }
        result
    }

    /// Any one segment mapped to exactly `key`, without removing it.
    pub fn find_any(&self, key: i64) -> Option<usize> {
        self.map.get(&key).and_then(|bucket| bucket.last().copied())
    }

    pub fn clear_map(&mut self) {
        self.map.clear();
        self.len = 0;
    }
}

impl SeparatorIndex for DynamicSeparatorIndex {
    fn rebuild(&mut self, _n: usize) {
        self.clear_map();
    }

    fn set_separator_key(&mut self, segment: usize, key: i64) {
        // A `set` on a multimap index is "replace whichever entry this
        // segment previously held"; since the map is keyed by separator
        // value rather than segment id, callers are expected to pair this
        // with an explicit `remove` of the segment's previous key first
        // (the rebalancer does so). Here we simply insert.
        self.insert(key, segment);
    }

    fn find(&self, key: i64) -> usize {
        self.map
            .range(..=key)
            .next_back()
            .and_then(|(_, bucket)| bucket.last().copied())
            .unwrap_or(0)
    }

    fn find_first(&self, key: i64) -> usize {
        self.map
            .range(..=key)
            .next_back()
            .and_then(|(_, bucket)| bucket.iter().min().copied())
            .unwrap_or(0)
    }

    fn find_last(&self, key: i64) -> usize {
        self.map
            .range(..=key)
            .next_back()
            .and_then(|(_, bucket)| bucket.iter().max().copied())
            .unwrap_or(0)
    }

    fn clear(&mut self) {
        self.clear_map();
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_round_trip() {
        let mut idx = DynamicSeparatorIndex::with_defaults();
        idx.insert(10, 0);
        idx.insert(20, 1);
        idx.insert(30, 2);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.find(25), 1);
        assert_eq!(idx.find(5), 0);
        assert!(idx.remove(20, 1));
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.find(25), 0);
    }

    #[test]
    fn remove_any_drains_duplicates() {
        let mut idx = DynamicSeparatorIndex::with_defaults();
        idx.insert(i64::MIN, 5);
        idx.insert(i64::MIN, 6);
        assert_eq!(idx.len(), 2);
        let a = idx.remove_any(i64::MIN).unwrap();
        assert!(a == 5 || a == 6);
        assert_eq!(idx.len(), 1);
    }
}
