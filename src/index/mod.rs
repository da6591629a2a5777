//! The separator index (spec §4.4/§4.5): a mapping `segment_id ->
//! separator_key` supporting `find`/`find_first`/`find_last` lookups,
//! behind a common trait so the rebalancer can be written once against
//! either the statically-sized or the dynamically-sized PMA variant
//! (Design Notes: "Multi-variant class tree").

pub mod dynamic_tree;
pub mod static_tree;

pub use dynamic_tree::DynamicSeparatorIndex;
pub use static_tree::StaticSeparatorIndex;

/// `find`/`find_first`/`find_last` return `INT64_MIN`'s segment id
/// convention from spec §3: "0 if key <= first" when the structure is
/// empty or the key precedes every separator.
pub trait SeparatorIndex {
    /// Discard the index and preallocate it for `n` segments, all
    /// initialised to the empty-segment sentinel `i64::MIN`.
    fn rebuild(&mut self, n: usize);

    /// Write the separator key for segment `s`.
    fn set_separator_key(&mut self, segment: usize, key: i64);

    /// The segment id whose separator is the largest `<= key`, or 0 if
    /// `key` is less than the first separator.
    fn find(&self, key: i64) -> usize;

    /// Leftmost segment whose range may contain `key`.
    fn find_first(&self, key: i64) -> usize;

    /// Rightmost segment whose range may contain `key`.
    fn find_last(&self, key: i64) -> usize;

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatches between the static and dynamic separator index without
/// paying for dynamic dispatch on the hot lookup path (mirrors
/// [`crate::predictor::AnyPredictor`]'s tagged-variant approach).
pub enum AnySeparatorIndex {
    Static(StaticSeparatorIndex),
    Dynamic(DynamicSeparatorIndex),
}

impl AnySeparatorIndex {
    /// Update the separator recorded for `segment`, replacing whichever
    /// key it previously held. The static variant's array layout makes
    /// this a plain overwrite; the dynamic variant's multimap needs the
    /// previous key to remove the stale entry first (spec §4.5
    /// `remove`/`insert`), which callers must track themselves (the
    /// facade keeps a `segment_min` side table for this purpose) since
    /// the map has no reverse segment -> key lookup.
    pub fn sync(&mut self, segment: usize, old_key: Option<i64>, new_key: i64) {
        match self {
            AnySeparatorIndex::Static(idx) => idx.set_separator_key(segment, new_key),
            AnySeparatorIndex::Dynamic(idx) => {
                if let Some(old) = old_key {
                    idx.remove(old, segment);
                }
                idx.insert(new_key, segment);
            }
        }
    }
}

impl SeparatorIndex for AnySeparatorIndex {
    fn rebuild(&mut self, n: usize) {
        match self {
            AnySeparatorIndex::Static(idx) => idx.rebuild(n),
            AnySeparatorIndex::Dynamic(idx) => idx.rebuild(n),
        }
    }

    fn set_separator_key(&mut self, segment: usize, key: i64) {
        match self {
            AnySeparatorIndex::Static(idx) => idx.set_separator_key(segment, key),
            AnySeparatorIndex::Dynamic(idx) => idx.set_separator_key(segment, key),
        }
    }

    fn find(&self, key: i64) -> usize {
        match self {
            AnySeparatorIndex::Static(idx) => idx.find(key),
            AnySeparatorIndex::Dynamic(idx) => idx.find(key),
        }
    }

    fn find_first(&self, key: i64) -> usize {
        match self {
            AnySeparatorIndex::Static(idx) => idx.find_first(key),
            AnySeparatorIndex::Dynamic(idx) => idx.find_first(key),
        }
    }

    fn find_last(&self, key: i64) -> usize {
        match self {
            AnySeparatorIndex::Static(idx) => idx.find_last(key),
            AnySeparatorIndex::Dynamic(idx) => idx.find_last(key),
        }
    }

    fn clear(&mut self) {
        match self {
            AnySeparatorIndex::Static(idx) => idx.clear(),
            AnySeparatorIndex::Dynamic(idx) => idx.clear(),
        }
    }

    fn len(&self) -> usize {
        match self {
            AnySeparatorIndex::Static(idx) => idx.len(),
            AnySeparatorIndex::Dynamic(idx) => idx.len(),
        }
    }
}
