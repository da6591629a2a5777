//! Sparse segmented storage (spec §4.3): the two dense arrays `keys`,
//! `values` and the per-segment population vector `sizes`, laid out so
//! adjacent even/odd segments share a gap (the "parity layout" of spec
//! §3). Grounded in the rewired/heap dual allocation policy described in
//! spec §4.3 itself; the physical substrate comes from
//! [`crate::rewiring::pool::BufferedRewiredMemory`] when rewiring mode
//! applies, matching the source's `Storage` class in
//! `original_source/pma/generic/*` which picks between a rewired and a
//! plain `posix_memalign`-backed array depending on size.

use crate::config::PmaConfig;
use crate::error::{PmaError, Result};
use crate::rewiring::pool::{BufferedRewiredMemory, ScratchBuffer};

/// Either array (`keys` or `values`) is backed by one of these, chosen once
/// at construction based on whether the requested size reaches the extent
/// threshold (spec §4.3 "Allocation policy").
enum Backing {
    Heap(Vec<i64>),
    Rewired(BufferedRewiredMemory),
}

impl Backing {
    fn slots(&self) -> &[i64] {
        match self {
            Backing::Heap(v) => v,
            // Safety: storage is the sole owner of the pool's user region
            // for the lifetime of this borrow, matching the ownership
            // rule in the rewiring module's doc comment.
            Backing::Rewired(pool) => unsafe { pool.user_slots() },
        }
    }

    fn slots_mut(&mut self) -> &mut [i64] {
        match self {
            Backing::Heap(v) => v,
            Backing::Rewired(pool) => unsafe { pool.user_slots() },
        }
    }

    fn capacity_slots(&self) -> usize {
        match self {
            Backing::Heap(v) => v.len(),
            Backing::Rewired(pool) => pool.user_extents() * pool.extent_size() / 8,
        }
    }

    fn extend(&mut self, additional_slots: usize, extent_slots: usize) -> Result<()> {
        match self {
            Backing::Heap(_) => Err(PmaError::invariant(
                "extend called on heap-backed storage; growth must reallocate in the caller",
            )),
            Backing::Rewired(pool) => {
                let extents = additional_slots.div_ceil(extent_slots);
                pool.extend(extents)
            }
        }
    }

    fn shrink(&mut self, removed_slots: usize, extent_slots: usize) -> Result<()> {
        match self {
            Backing::Heap(_) => Err(PmaError::invariant("shrink called on heap-backed storage")),
            Backing::Rewired(pool) => {
                if removed_slots % extent_slots != 0 {
                    return Err(PmaError::invalid(
                        "shrink amount must be a multiple of the extent's slot count",
                    ));
                }
                pool.shrink(removed_slots / extent_slots)
            }
        }
    }

    /// Place one extent's worth of freshly-partitioned data at
    /// `extent_index` (spec §4.7.4 "rewiring-aware spread"). Heap-backed
    /// storage just copies in; rewired storage assembles `data` in a
    /// scratch buffer acquired from the pool and swaps it into place,
    /// so the extent's old physical pages become the next free buffer
    /// instead of being overwritten slot by slot.
    fn scatter_via_rewiring(&mut self, extent_index: usize, extent_slots: usize, data: &[i64]) -> Result<()> {
        match self {
            Backing::Heap(v) => {
                let start = extent_index * extent_slots;
                v[start..start + data.len()].copy_from_slice(data);
                Ok(())
            }
            Backing::Rewired(pool) => {
                let dest_addr = pool.start_address() as usize + extent_index * pool.extent_size();
                let scratch = ScratchBuffer::acquire(pool)?;
                // Safety: the scratch extent was just acquired from the pool
                // and is not yet visible at any user address, so this
                // storage is its sole owner for the duration of the write.
                let buf = unsafe { std::slice::from_raw_parts_mut(scratch.address() as *mut i64, extent_slots) };
                buf[..data.len()].copy_from_slice(data);
                scratch.release_into(dest_addr)
            }
        }
    }
}

/// The adjacent keys a new insertion ended up between, reported to the
/// predictor (spec §4.3 `insert`). Boundary neighbours are reported as
/// `i64::MIN` / `i64::MAX` per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbours {
    pub predecessor: i64,
    pub successor: i64,
}

pub struct SparseSegmentedStorage {
    keys: Backing,
    values: Backing,
    sizes: Vec<u16>,
    segment_capacity: usize,
    number_segments: usize,
    cardinality: usize,
    extent_slots: usize,
}

impl SparseSegmentedStorage {
    /// Allocate storage for `number_segments` segments of `config`'s
    /// capacity. Rewiring mode is used when the keys/values array would be
    /// at least one extent large and `config.use_rewiring` is set;
    /// otherwise plain heap arrays back all three (spec §4.3 "Allocation
    /// policy"). `sizes` is always heap-backed: it is small enough (two
    /// bytes per segment) that giving it its own rewiring substrate, as
    /// the source does for independent extension, buys nothing here and
    /// is simplified away (documented in DESIGN.md).
    pub fn new(config: &PmaConfig, number_segments: usize) -> Result<Self> {
        let capacity = config.segment_capacity;
        let total_slots = capacity * number_segments;
        let extent_slots = config.extent_size() / 8;
        let use_rewiring = config.use_rewiring && total_slots * 8 >= config.extent_size();

        let (keys, values) = if use_rewiring {
            let num_extents = total_slots.div_ceil(extent_slots).max(1);
            let keys = BufferedRewiredMemory::new(
                config.pages_per_extent,
                num_extents,
                config.max_memory,
                config.use_huge_pages,
            )?;
            let values = BufferedRewiredMemory::new(
                config.pages_per_extent,
                num_extents,
                config.max_memory,
                config.use_huge_pages,
            )?;
            (Backing::Rewired(keys), Backing::Rewired(values))
        } else {
            (
                Backing::Heap(vec![i64::MIN; total_slots]),
                Backing::Heap(vec![0i64; total_slots]),
            )
        };

        let sizes = vec![0u16; number_segments.max(2)];

        Ok(SparseSegmentedStorage {
            keys,
            values,
            sizes,
            segment_capacity: capacity,
            number_segments,
            cardinality: 0,
            extent_slots,
        })
    }

    pub fn segment_capacity(&self) -> usize {
        self.segment_capacity
    }

    pub fn number_segments(&self) -> usize {
        self.number_segments
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn is_rewired(&self) -> bool {
        matches!(self.keys, Backing::Rewired(_))
    }

    pub fn size_of(&self, segment: usize) -> usize {
        self.sizes.get(segment).copied().unwrap_or(0) as usize
    }

    fn segment_range(&self, segment: usize) -> std::ops::Range<usize> {
        let c = self.segment_capacity;
        segment * c..(segment + 1) * c
    }

    /// The slot range within segment `segment` currently holding keys,
    /// honouring the parity layout: even segments pack flush right, odd
    /// segments pack flush left (spec §3 "Parity layout").
    pub fn occupied_range(&self, segment: usize) -> std::ops::Range<usize> {
        let bounds = self.segment_range(segment);
        let n = self.size_of(segment);
        if segment % 2 == 0 {
            (bounds.end - n)..bounds.end
        } else {
            bounds.start..(bounds.start + n)
        }
    }

    pub fn keys(&self) -> &[i64] {
        self.keys.slots()
    }

    pub fn values(&self) -> &[i64] {
        self.values.slots()
    }

    /// The key at segment-local occupied index `i`, or `None` if out of
    /// range.
    pub fn key_at(&self, segment: usize, i: usize) -> Option<i64> {
        let range = self.occupied_range(segment);
        range.clone().nth(i).map(|slot| self.keys()[slot])
    }

    /// Insert `(key, value)` into segment `segment`, which must currently
    /// have `size < segment_capacity`. Maintains parity: growth happens on
    /// the side away from the segment's packed edge, so existing elements
    /// shift the minimum possible distance. Returns the keys immediately
    /// adjacent to the insertion point, `i64::MIN`/`i64::MAX` at a
    /// boundary (spec §4.3).
    pub fn insert(&mut self, segment: usize, key: i64, value: i64) -> Result<Neighbours> {
        let n = self.size_of(segment);
        if n >= self.segment_capacity {
            return Err(PmaError::invariant(format!(
                "insert into full segment {} (capacity {})",
                segment, self.segment_capacity
            )));
        }
        let occupied = self.occupied_range(segment);
        let even = segment % 2 == 0;

        // Sorted insertion position among the segment's occupied keys.
        let keys = self.keys.slots();
        let mut pos = 0usize;
        while pos < n && keys[occupied.start + pos] < key {
            pos += 1;
        }

        let predecessor = if pos > 0 {
            keys[occupied.start + pos - 1]
        } else {
            i64::MIN
        };
        let successor = if pos < n {
            keys[occupied.start + pos]
        } else {
            i64::MAX
        };

        let bounds = self.segment_range(segment);
        let keys = self.keys.slots_mut();
        let values = self.values.slots_mut();
        if even {
            // Grows leftward: new occupied start is one slot earlier.
            let new_start = bounds.end - (n + 1);
            for j in 0..pos {
                keys[new_start + j] = keys[occupied.start + j];
                values[new_start + j] = values[occupied.start + j];
            }
            keys[new_start + pos] = key;
            values[new_start + pos] = value;
        } else {
            // Grows rightward: existing tail shifts one slot further out.
            for j in (pos..n).rev() {
                keys[occupied.start + j + 1] = keys[occupied.start + j];
                values[occupied.start + j + 1] = values[occupied.start + j];
            }
            keys[occupied.start + pos] = key;
            values[occupied.start + pos] = value;
        }

        self.sizes[segment] = (n + 1) as u16;
        self.cardinality += 1;

        Ok(Neighbours {
            predecessor,
            successor,
        })
    }

    /// Remove the first occurrence of `key` in `segment`, if present.
    pub fn remove(&mut self, segment: usize, key: i64) -> Option<i64> {
        let n = self.size_of(segment);
        let occupied = self.occupied_range(segment);
        let keys = self.keys.slots();
        let pos = (0..n).find(|&j| keys[occupied.start + j] == key)?;
        let removed_value = self.values.slots()[occupied.start + pos];

        let even = segment % 2 == 0;
        let keys = self.keys.slots_mut();
        let values = self.values.slots_mut();
        if even {
            // Occupied shrinks from the left: shift the prefix rightward.
            for j in (0..pos).rev() {
                keys[occupied.start + j + 1] = keys[occupied.start + j];
                values[occupied.start + j + 1] = values[occupied.start + j];
            }
        } else {
            for j in pos..n - 1 {
                keys[occupied.start + j] = keys[occupied.start + j + 1];
                values[occupied.start + j] = values[occupied.start + j + 1];
            }
        }
        self.sizes[segment] = (n - 1) as u16;
        self.cardinality -= 1;
        Some(removed_value)
    }

    /// Directly set the population count of a segment, used by the
    /// rebalancer after a gather/scatter spread has already placed the
    /// elements in their final slots.
    pub fn set_size(&mut self, segment: usize, size: usize) {
        self.sizes[segment] = size as u16;
    }

    pub fn write_slot(&mut self, slot: usize, key: i64, value: i64) {
        self.keys.slots_mut()[slot] = key;
        self.values.slots_mut()[slot] = value;
    }

    pub fn read_slot(&self, slot: usize) -> (i64, i64) {
        (self.keys()[slot], self.values()[slot])
    }

    /// Recompute `cardinality` from `sizes` after a bulk structural change
    /// (spread/resize) that didn't go through [`insert`]/[`remove`].
    pub fn recompute_cardinality(&mut self) {
        self.cardinality = self.sizes.iter().map(|&s| s as usize).sum();
    }

    /// Slot count of one extent, for callers (the rebalancer) deciding
    /// whether a window lines up with extent boundaries.
    pub fn extent_slots(&self) -> usize {
        self.extent_slots
    }

    /// Scatter `segment_data` (`(segment, sorted (key, value) pairs)` for
    /// every segment extent `extent_index` covers, in ascending segment
    /// order) through the buffered pool's scratch-swap rather than writing
    /// slot by slot (spec §4.7.4). Sets each segment's size first so the
    /// parity-aware occupied ranges used to place each segment's pairs
    /// within the extent are correct.
    pub fn scatter_extent_via_rewiring(
        &mut self,
        extent_index: usize,
        segment_data: &[(usize, Vec<(i64, i64)>)],
    ) -> Result<()> {
        for (segment, pairs) in segment_data {
            self.sizes[*segment] = pairs.len() as u16;
        }
        let extent_slots = self.extent_slots;
        let extent_start = extent_index * extent_slots;
        let mut key_buf = vec![i64::MIN; extent_slots];
        let mut val_buf = vec![0i64; extent_slots];
        for (segment, pairs) in segment_data {
            let range = self.occupied_range(*segment);
            let local_start = range.start - extent_start;
            for (j, &(k, v)) in pairs.iter().enumerate() {
                key_buf[local_start + j] = k;
                val_buf[local_start + j] = v;
            }
        }
        self.keys.scatter_via_rewiring(extent_index, extent_slots, &key_buf)?;
        self.values.scatter_via_rewiring(extent_index, extent_slots, &val_buf)?;
        Ok(())
    }

    /// Grow the storage to `new_number_segments`. Heap-backed storage
    /// cannot grow in place (spec §4.3) and returns an error; the caller
    /// (the resizer, spec §4.7.5) is expected to build a fresh
    /// `SparseSegmentedStorage` and spread into it in that case.
    pub fn extend(&mut self, new_number_segments: usize) -> Result<()> {
        if new_number_segments <= self.number_segments {
            return Err(PmaError::invalid("extend: new size is not larger"));
        }
        let delta_slots = (new_number_segments - self.number_segments) * self.segment_capacity;
        self.keys.extend(delta_slots, self.extent_slots)?;
        self.values.extend(delta_slots, self.extent_slots)?;
        self.sizes.resize(new_number_segments, 0);
        self.number_segments = new_number_segments;
        Ok(())
    }

    pub fn shrink(&mut self, new_number_segments: usize) -> Result<()> {
        if new_number_segments >= self.number_segments {
            return Err(PmaError::invalid("shrink: new size is not smaller"));
        }
        let delta_slots = (self.number_segments - new_number_segments) * self.segment_capacity;
        self.keys.shrink(delta_slots, self.extent_slots)?;
        self.values.shrink(delta_slots, self.extent_slots)?;
        self.sizes.truncate(new_number_segments.max(2));
        self.number_segments = new_number_segments;
        self.recompute_cardinality();
        Ok(())
    }

    pub fn memory_footprint(&self) -> usize {
        self.keys.capacity_slots() * 8 + self.values.capacity_slots() * 8 + self.sizes.len() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_config() -> PmaConfig {
        let mut c = PmaConfig::default();
        c.use_rewiring = false;
        c.segment_capacity = 32;
        c
    }

    #[test]
    fn insert_into_even_segment_packs_right() {
        let mut s = SparseSegmentedStorage::new(&heap_config(), 4).unwrap();
        let n = s.insert(0, 10, 100).unwrap();
        assert_eq!(n, Neighbours { predecessor: i64::MIN, successor: i64::MAX });
        let occ = s.occupied_range(0);
        assert_eq!(occ.end, 32);
        assert_eq!(s.key_at(0, 0), Some(10));
    }

    #[test]
    fn insert_into_odd_segment_packs_left() {
        let mut s = SparseSegmentedStorage::new(&heap_config(), 4).unwrap();
        s.insert(1, 10, 100).unwrap();
        let occ = s.occupied_range(1);
        assert_eq!(occ.start, 32);
        assert_eq!(s.key_at(1, 0), Some(10));
    }

    #[test]
    fn sorted_insertion_within_segment_maintains_order() {
        let mut s = SparseSegmentedStorage::new(&heap_config(), 2).unwrap();
        for k in [50, 10, 30, 20, 40] {
            s.insert(1, k, k * 10).unwrap();
        }
        let n = s.size_of(1);
        let mut prev = i64::MIN;
        for i in 0..n {
            let k = s.key_at(1, i).unwrap();
            assert!(k >= prev);
            prev = k;
        }
        assert_eq!(s.cardinality(), 5);
    }

    #[test]
    fn remove_then_reinsert_keeps_cardinality_consistent() {
        let mut s = SparseSegmentedStorage::new(&heap_config(), 2).unwrap();
        s.insert(0, 1, 1).unwrap();
        s.insert(0, 2, 2).unwrap();
        s.insert(0, 3, 3).unwrap();
        assert_eq!(s.remove(0, 2), Some(2));
        assert_eq!(s.cardinality(), 2);
        assert_eq!(s.key_at(0, 0), Some(1));
        assert_eq!(s.key_at(0, 1), Some(3));
    }
}
