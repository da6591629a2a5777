//! The MRU circular-queue predictor (spec §4.9, first shape). Grounded in
//! `original_source/pma/adaptive/bh07_v2/predictor.{hpp,cpp}`.
//!
//! The source's buffer is a physically circular array so that entries can
//! be addressed by a stable slot offset (`m_permuted_position`) without
//! ever moving bytes around on a hit. This port keeps that same external
//! contract (positions returned by [`items`] stay valid for [`reset_ptr`]
//! until the next mutating call) but represents the queue as a plain
//! MRU-ordered `Vec`, trading the wraparound indexing for a
//! `Vec::insert`/`Vec::swap`-based implementation of the same moves. The
//! queue's logical behaviour (saturating counts, move-towards-head on a
//! hit, tail-decay-and-evict on a full miss) is unchanged. Physical
//! backing-array shape is simplified (recorded in DESIGN.md).

use super::{PermutedItem, Predictor};

struct Item {
    pointer: u64,
    count: u32,
}

pub struct MruPredictor {
    entries: Vec<Item>,
    capacity: usize,
    count_max: u32,
}

impl MruPredictor {
    pub fn new(capacity: usize, count_max: u32) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        MruPredictor {
            entries: Vec::with_capacity(capacity),
            capacity,
            count_max: count_max.clamp(1, 1 << 16),
        }
    }

    fn position_of(&self, pointer: u64) -> Option<usize> {
        self.entries.iter().position(|it| it.pointer == pointer)
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

impl Predictor for MruPredictor {
    fn update(&mut self, pointer: u64) {
        if let Some(pos) = self.position_of(pointer) {
            self.entries[pos].count = (self.entries[pos].count + 1).min(self.count_max);
            if pos > 0 {
                self.entries.swap(pos, pos - 1);
            }
        } else if !self.is_full() {
            self.entries.insert(0, Item { pointer, count: 1 });
        } else if let Some(last) = self.entries.last_mut() {
            if last.count <= 1 {
                self.entries.pop();
            } else {
                last.count -= 1;
            }
        }
    }

    fn items(&self, min: u64, max: u64) -> Vec<PermutedItem> {
        let mut out: Vec<PermutedItem> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, it)| it.pointer >= min && it.pointer <= max)
            .map(|(i, it)| PermutedItem {
                pointer: it.pointer,
                count: it.count,
                permuted_position: i,
            })
            .collect();
        out.sort_by_key(|it| it.pointer);
        out
    }

    fn resize(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(1).next_power_of_two();
        if self.entries.len() > new_capacity {
            self.entries.truncate(new_capacity);
        }
        self.capacity = new_capacity;
    }

    fn reset_ptr(&mut self, permuted_position: usize, new_pointer: u64) {
        if let Some(it) = self.entries.get_mut(permuted_position) {
            it.pointer = new_pointer;
        }
    }

    fn set_max_count(&mut self, value: u32) {
        self.count_max = value.clamp(1, 1 << 16);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_bubble_towards_head_and_saturate() {
        let mut p = MruPredictor::new(4, 5);
        p.update(100);
        p.update(200);
        p.update(300);
        // 300 is at head; hitting 100 repeatedly should surface it to the
        // head over successive updates and saturate its count at 5.
        for _ in 0..10 {
            p.update(100);
        }
        let items = p.items(0, u64::MAX);
        let entry = items.iter().find(|it| it.pointer == 100).unwrap();
        assert_eq!(entry.count, 5);
    }

    #[test]
    fn full_miss_decays_tail_and_evicts() {
        let mut p = MruPredictor::new(2, 5);
        p.update(1);
        p.update(2);
        assert_eq!(p.len(), 2);
        // A miss on a full queue decays the tail's count; since it was at 1,
        // it evicts outright rather than just losing a count.
        p.update(3);
        assert_eq!(p.len(), 1);
        let items = p.items(0, u64::MAX);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].pointer, 2);
    }
}
