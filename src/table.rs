//! CBG table core.
//!
//! - Every key has two candidate buckets: windows of `B` contiguous
//!   bins anchored at `fastrange(h, n)` and `fastrange(rot32(h), n)`
//! - Insertion picks eviction victims by smallest displacement label
//!   (LSA_max); saturated labels on both sides abort into a grow
//! - A full bucket can be rescued by reversing its window to the left
//!   of the anchor, by reversing a neighbour that intrudes on its
//!   window, or by hopscotching a nearby empty bin back into it
//! - Growth is in place: most elements move directly to their new
//!   window during a tail-down sweep, the rest spill into a small
//!   overflow list and are replayed

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};

use crate::aob::{AobMap, AobSet};
use crate::aos::{AosMap, AosSet};
use crate::layout::Layout;
use crate::meta;
use crate::soa::{SoaMap, SoaSet};
use crate::{fastrange, make_hash, secondary_hash, DefaultHashBuilder, Error, SearchHint};

/// Label given to a newly placed element: one past the other bucket's
/// minimum, saturating at the label ceiling.
#[inline]
fn bounded_label(other_min: u16) -> u16 {
    (other_min + 1).min(meta::MAX_LABEL)
}

/// Cuckoo Breeding Ground table over a bin layout `L`, a hash builder
/// `S` and bucket arity `B`.
///
/// Use through the [`SetSoA`] / [`MapSoA`] family of aliases unless a
/// custom layout is involved.
pub struct CbgTable<L, S = DefaultHashBuilder, const B: usize = 3> {
    pub(crate) layout: L,
    hash_builder: S,
    num_elems: usize,
    num_buckets: usize,
    max_load_factor: f64,
    grow_factor: f64,
    #[cfg(test)]
    rehash_count: usize,
}

/// Parallel-array set, negative-query oriented (tag-filtered lookups).
pub type SetSoA<T, S = DefaultHashBuilder, const B: usize = 3> = CbgTable<SoaSet<T>, S, B>;

/// Per-bin interleaved set, positive-query oriented.
pub type SetAoS<T, S = DefaultHashBuilder, const B: usize = 3> = CbgTable<AosSet<T>, S, B>;

/// Block-interleaved set, positive-query oriented.
pub type SetAoB<T, S = DefaultHashBuilder, const B: usize = 3> = CbgTable<AobSet<T>, S, B>;

/// Parallel-array map, negative-query oriented (tag-filtered lookups).
pub type MapSoA<K, V, S = DefaultHashBuilder, const B: usize = 3> = CbgTable<SoaMap<K, V>, S, B>;

/// Per-bin interleaved map, positive-query oriented.
pub type MapAoS<K, V, S = DefaultHashBuilder, const B: usize = 3> = CbgTable<AosMap<K, V>, S, B>;

/// Block-interleaved map, positive-query oriented.
pub type MapAoB<K, V, S = DefaultHashBuilder, const B: usize = 3> = CbgTable<AobMap<K, V>, S, B>;

impl<L: Layout, const B: usize> CbgTable<L, DefaultHashBuilder, B> {
    /// Creates a table of minimal capacity with an entropy-seeded hash
    /// builder.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a table with `capacity` bins (clamped up to the minimum
    /// workable size) and an entropy-seeded hash builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::new())
    }

    /// Creates a table whose hash builder is derived from an explicit
    /// seed, for reproducible bucket placement.
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        let hash_builder = DefaultHashBuilder::with_seeds(
            seed,
            seed ^ 0x9e37_79b9_7f4a_7c15,
            seed.rotate_left(23) ^ 0x6a09_e667_f3bc_c909,
            seed.rotate_left(47) ^ 0xbb67_ae85_84ca_a73b,
        );
        Self::with_capacity_and_hasher(capacity, hash_builder)
    }
}

impl<L: Layout, const B: usize> Default for CbgTable<L, DefaultHashBuilder, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Layout, S, const B: usize> CbgTable<L, S, B> {
    /// Buckets of headroom every growth must add, so that the reversed
    /// tail windows of the new table clear the old region.
    const MIN_BUCKETS: usize = 2 * B - 2;

    const ARITY_OK: () = assert!(B >= 2 && B <= 4, "bucket arity must be 2, 3 or 4");

    /// Creates a table with the given hash builder and minimal capacity.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates a table with `capacity` bins and the given hash builder.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        let () = Self::ARITY_OK;

        let num_buckets = capacity.max(Self::MIN_BUCKETS);
        let mut layout = L::with_bins(num_buckets);
        // The last windows may not extend past the table end, so the
        // tail anchors are permanently reversed.
        for i in 0..(B - 1) {
            layout.set_bucket_reversed(num_buckets - 1 - i);
        }

        Self {
            layout,
            hash_builder,
            num_elems: 0,
            num_buckets,
            max_load_factor: 0.9001,
            grow_factor: 1.2,
            #[cfg(test)]
            rehash_count: 0,
        }
    }

    /// Number of bins.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_buckets
    }

    /// Same as [`capacity`](Self::capacity).
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.num_buckets
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.num_elems
    }

    /// Returns `true` if the table holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_elems == 0
    }

    /// Occupancy ratio, `len() / capacity()`.
    #[inline]
    pub fn load_factor(&self) -> f64 {
        self.num_elems as f64 / self.num_buckets as f64
    }

    /// Load factor past which an insertion grows the table first.
    #[inline]
    pub fn max_load_factor(&self) -> f64 {
        self.max_load_factor
    }

    pub fn set_max_load_factor(&mut self, value: f64) {
        debug_assert!(value > 0.0);
        self.max_load_factor = value;
    }

    /// Multiplier applied to the capacity when the table grows.
    #[inline]
    pub fn grow_factor(&self) -> f64 {
        self.grow_factor
    }

    pub fn set_grow_factor(&mut self, value: f64) {
        debug_assert!(value > 0.0);
        self.grow_factor = value;
    }

    /// Returns a reference to the hash builder.
    #[inline]
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Empties the table, keeping its capacity.
    pub fn clear(&mut self) {
        self.num_elems = 0;
        self.layout.clear_meta(0, self.num_buckets);
        for i in 0..(B - 1) {
            self.layout.set_bucket_reversed(self.num_buckets - 1 - i);
        }
    }

    /// First bin of the window anchored at `anchor`.
    #[inline]
    fn window_start(&self, anchor: usize, reversed: bool) -> usize {
        if reversed {
            debug_assert!(anchor + 1 >= B);
            anchor + 1 - B
        } else {
            anchor
        }
    }

    /// Smallest label in a window and the leftmost bin holding it. A
    /// minimum of 0 means the window has a free bin.
    fn calc_min(&self, window_init: usize) -> (u16, usize) {
        let mut minimum = self.layout.label(window_init);
        let mut pos = window_init;

        for i in 1..B {
            if minimum == 0 {
                break;
            }
            let label = self.layout.label(window_init + i);
            if label < minimum {
                minimum = label;
                pos = window_init + i;
            }
        }

        (minimum, pos)
    }

    fn count_empty(&self, window_init: usize) -> usize {
        let mut count = 0;
        for i in 0..B {
            if self.layout.is_empty(window_init + i) {
                count += 1;
            }
        }
        count
    }

    /// Bins in the rightward window of `anchor` holding an element
    /// owned by `anchor` itself.
    fn count_owned_non_reversed(&self, anchor: usize) -> usize {
        let mut count = 0;
        for i in 0..B {
            let pos = anchor + i;
            if !self.layout.is_reversed_item(pos) && self.layout.anchor_distance(pos) == i {
                count += 1;
            }
        }
        count
    }

    /// Owned bins of `anchor`'s rightward window, and how many of them
    /// fall outside the window starting at `range_init`.
    fn count_owned_outside(&self, anchor: usize, range_init: usize) -> (usize, usize) {
        let mut count = 0;
        let mut outside = 0;
        for i in 0..B {
            let pos = anchor + i;
            if !self.layout.is_reversed_item(pos) && self.layout.anchor_distance(pos) == i {
                count += 1;
                // positions left of range_init wrap far above B
                if pos.wrapping_sub(range_init) >= B {
                    outside += 1;
                }
            }
        }
        (count, outside)
    }

    /// Anchor of the bucket owning the element at `pos`, `None` for an
    /// empty bin.
    fn belong_to_bucket(&self, pos: usize) -> Option<usize> {
        if self.layout.is_empty(pos) {
            return None;
        }
        let base = if self.layout.is_reversed_item(pos) {
            pos + (B - 1)
        } else {
            pos
        };
        Some(base - self.layout.anchor_distance(pos))
    }

    /// Flips the bucket at `anchor` into reverse mode and relocates its
    /// owned elements from the rightward window into the leftward one.
    ///
    /// One descending cursor walks the left window, so elements taken
    /// from the far end of the old window fill the far end of the new
    /// one first. If the cursor runs out, the one unplaced element is
    /// the anchor's own (the acceptance counts guarantee it) and it is
    /// re-tagged in place.
    fn reverse_bucket(&mut self, anchor: usize) {
        self.layout.set_bucket_reversed(anchor);

        let mut j = B - 1;
        let mut slots_left = true;
        for i in (0..B).rev() {
            if self.belong_to_bucket(anchor + i) != Some(anchor) {
                continue;
            }
            while slots_left && !self.layout.is_empty(anchor - j) {
                if j == 0 {
                    slots_left = false;
                } else {
                    j -= 1;
                }
            }
            if slots_left {
                let dst = anchor - j;
                let label = self.layout.label(anchor + i);
                let tag = self.layout.stored_tag(anchor + i);
                self.layout.update_bin(dst, B - 1 - j, true, label, tag);
                self.layout.set_empty(anchor + i);
                self.layout.move_elem(dst, anchor + i);
            } else {
                debug_assert_eq!(i, 0);
                let label = self.layout.label(anchor);
                let tag = self.layout.stored_tag(anchor);
                self.layout.update_bin(anchor, B - 1, true, label, tag);
            }
        }
    }

    /// Tries to free a bin inside the currently full window of
    /// `anchor`. Three strategies, first hit wins; on a miss the table
    /// is left untouched.
    fn find_empty_hopscotch(&mut self, anchor: usize, window_init: usize) -> Option<usize> {
        // Reverse this bucket. The prospective left window must have
        // strictly more empty bins than the bucket owns in the right
        // window, or exactly as many when the anchor bin holds an owned
        // element (that one may stay put, still freeing the anchor's
        // old neighbours).
        if !self.layout.is_bucket_reversed(anchor) && anchor >= B {
            let count_empty = self.count_empty(anchor + 1 - B);
            if count_empty > 0 {
                let count_owned = self.count_owned_non_reversed(anchor);
                if count_empty > count_owned
                    || (count_empty == count_owned
                        && self.belong_to_bucket(anchor) == Some(anchor))
                {
                    if count_owned > 0 {
                        self.reverse_bucket(anchor);
                    } else {
                        self.layout.set_bucket_reversed(anchor);
                    }
                    let (min, pos) = self.calc_min(anchor + 1 - B);
                    debug_assert_eq!(min, 0);
                    return Some(pos);
                }
            }
        }

        // Reverse some other bucket whose elements intrude on this
        // window. The reversal must be legal and must vacate at least
        // one bin inside our window.
        if window_init >= 2 * B {
            for i in 0..B {
                let elem_pos = window_init + i;
                if self.layout.is_reversed_item(elem_pos) {
                    continue;
                }
                // non-reversed item: its owner sits leftward by its distance
                let owner = elem_pos - self.layout.anchor_distance(elem_pos);
                if owner == anchor {
                    continue;
                }
                let count_empty = self.count_empty(owner + 1 - B);
                if count_empty == 0 {
                    continue;
                }
                let (count_owned, count_outside) = self.count_owned_outside(owner, window_init);
                debug_assert!(count_owned > count_outside);
                if count_outside < count_empty
                    && (count_empty >= count_owned
                        || (count_empty + 1 == count_owned
                            && self.belong_to_bucket(owner) == Some(owner)))
                {
                    self.reverse_bucket(owner);
                    let (min, pos) = self.calc_min(window_init);
                    debug_assert_eq!(min, 0);
                    return Some(pos);
                }
            }
        }

        // Hopscotch: scan rightward for an empty bin, then drag it back
        // into the window one in-window move at a time. The scan bound
        // grows as bins are passed whose elements could themselves
        // shift rightward.
        let mut max_dist_to_move = B - 1;
        let mut i = 0;
        while i <= max_dist_to_move && window_init + i < self.num_buckets {
            let probe = window_init + i;
            if self.layout.is_empty(probe) {
                let mut blank = probe;
                while blank - window_init >= B {
                    let mut swap = blank + 1 - B;
                    while blank - swap > B - 1 - self.layout.anchor_distance(swap) {
                        swap += 1;
                    }
                    debug_assert!(swap < blank);

                    self.layout.move_elem(blank, swap);
                    let distance = self.layout.anchor_distance(swap) + (blank - swap);
                    let reversed_item = self.layout.is_reversed_item(swap);
                    let label = self.layout.label(swap);
                    let tag = self.layout.stored_tag(swap);
                    self.layout.update_bin(blank, distance, reversed_item, label, tag);
                    // the vacated bin becomes the new blank; its stale
                    // payload is overwritten by the next move or by the
                    // caller
                    blank = swap;
                }
                return Some(blank);
            }
            let reach = i + B - 1 - self.layout.anchor_distance(probe);
            if reach > max_dist_to_move {
                max_dist_to_move = reach;
            }
            i += 1;
        }

        None
    }

    /// Number of times the bin array has been re-laid-out since
    /// construction, counting every retry round.
    #[cfg(test)]
    pub(crate) fn rehash_count(&self) -> usize {
        self.rehash_count
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut occupied = 0;
        for i in 0..self.num_buckets {
            if self.layout.is_empty(i) {
                continue;
            }
            occupied += 1;
            let d = self.layout.anchor_distance(i);
            assert!(d < B, "anchor distance {} out of range at bin {}", d, i);
            let owner = self.belong_to_bucket(i).unwrap();
            assert!(owner < self.num_buckets);
            assert_eq!(
                self.layout.is_reversed_item(i),
                self.layout.is_bucket_reversed(owner),
                "direction flag mismatch at bin {}",
                i
            );
            let init = self.window_start(owner, self.layout.is_bucket_reversed(owner));
            assert!(init <= i && i < init + B, "bin {} outside its window", i);
        }
        assert_eq!(occupied, self.num_elems);
        for i in 0..(B - 1) {
            assert!(self.layout.is_bucket_reversed(self.num_buckets - 1 - i));
        }
    }
}

impl<L, S, const B: usize> CbgTable<L, S, B>
where
    L: Layout,
    L::Key: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn key_eq<Q>(&self, pos: usize, key: &Q) -> bool
    where
        L::Key: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.layout.key(pos).borrow() == key
    }

    /// Probes one bucket window, rejecting bins by hash tag before any
    /// key comparison. Only meaningful on tagged layouts.
    fn probe_bucket_tagged<Q>(&self, anchor: usize, h: u16, key: &Q) -> Option<usize>
    where
        L::Key: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let c0 = self.layout.meta(anchor);
        if (c0 ^ h) & meta::TAG_MASK == 0
            && c0 & meta::LABEL_MASK != 0
            && self.key_eq(anchor, key)
        {
            return Some(anchor);
        }
        let reversed = meta::is_bucket_reversed(c0);
        for i in 1..B {
            let pos = if reversed { anchor - i } else { anchor + i };
            let cc = self.layout.meta(pos);
            if (cc ^ h) & meta::TAG_MASK == 0
                && cc & meta::LABEL_MASK != 0
                && self.key_eq(pos, key)
            {
                return Some(pos);
            }
        }
        None
    }

    /// Probes one bucket window by occupancy and key.
    fn probe_bucket<Q>(&self, anchor: usize, key: &Q) -> Option<usize>
    where
        L::Key: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let c0 = self.layout.meta(anchor);
        if c0 & meta::LABEL_MASK != 0 && self.key_eq(anchor, key) {
            return Some(anchor);
        }
        let reversed = meta::is_bucket_reversed(c0);
        for i in 1..B {
            let pos = if reversed { anchor - i } else { anchor + i };
            let cc = self.layout.meta(pos);
            if cc & meta::LABEL_MASK != 0 && self.key_eq(pos, key) {
                return Some(pos);
            }
        }
        None
    }

    /// Negative-biased lookup with the tag filter: most non-matching
    /// bins are rejected without touching their payload.
    fn find_tagged<Q>(&self, key: &Q) -> Option<usize>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        let anchor = fastrange(hash, self.num_buckets);
        if let Some(pos) = self.probe_bucket_tagged(anchor, hash as u16, key) {
            return Some(pos);
        }
        if self.layout.is_unlucky_bucket(anchor) {
            let hash1 = secondary_hash(hash);
            let anchor2 = fastrange(hash1, self.num_buckets);
            return self.probe_bucket_tagged(anchor2, hash1 as u16, key);
        }
        None
    }

    /// Negative-biased lookup for layouts without tag bytes.
    fn find_untagged<Q>(&self, key: &Q) -> Option<usize>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        let anchor = fastrange(hash, self.num_buckets);
        if let Some(pos) = self.probe_bucket(anchor, key) {
            return Some(pos);
        }
        if self.layout.is_unlucky_bucket(anchor) {
            let anchor2 = fastrange(secondary_hash(hash), self.num_buckets);
            return self.probe_bucket(anchor2, key);
        }
        None
    }

    /// Positive-biased lookup: skips the unlucky-bucket gate and always
    /// probes the secondary bucket, trading a guaranteed miss there for
    /// a branch that never mispredicts on hits.
    fn find_positive<Q>(&self, key: &Q) -> Option<usize>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = make_hash(&self.hash_builder, key);
        let anchor = fastrange(hash, self.num_buckets);
        if let Some(pos) = self.probe_bucket(anchor, key) {
            return Some(pos);
        }
        let anchor2 = fastrange(secondary_hash(hash), self.num_buckets);
        self.probe_bucket(anchor2, key)
    }

    pub(crate) fn find_position<Q>(&self, key: &Q, hint: SearchHint) -> Option<usize>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match hint {
            SearchHint::ExpectPositive => self.find_positive(key),
            _ if L::TAGGED => self.find_tagged(key),
            _ => self.find_untagged(key),
        }
    }

    /// Returns `true` if the key is present.
    pub fn contains<Q>(&self, key: &Q, hint: SearchHint) -> bool
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_position(key, hint).is_some()
    }

    /// Number of elements with this key, 0 or 1.
    pub fn count<Q>(&self, key: &Q, hint: SearchHint) -> usize
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        usize::from(self.contains(key, hint))
    }

    /// Removes the element with this key, returning `true` if one was
    /// present. Only the bin's element bits are blanked; anchor flags
    /// the bin carries stay behind.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.find_position(key, SearchHint::Unknown) {
            Some(pos) => {
                self.layout.set_empty(pos);
                self.num_elems -= 1;
                true
            }
            None => false,
        }
    }

    /// Inserts an element. If its key is already present the stored
    /// element is overwritten and the size does not change; `Ok(false)`
    /// reports that case. May grow the table.
    pub fn insert(&mut self, elem: L::Elem) -> Result<bool, Error> {
        if let Some(pos) = self.find_position(L::key_of(&elem), SearchHint::Unknown) {
            self.layout.save(pos, elem);
            return Ok(false);
        }

        if self.num_elems as f64 >= self.num_buckets as f64 * self.max_load_factor {
            let target = self.grow_size()?;
            self.rehash(target)?;
        }

        let mut pending = elem;
        while !self.try_insert(&mut pending) {
            let target = self.grow_size()?;
            self.rehash(target)?;
        }
        Ok(true)
    }

    /// Grows the table to at least `new_capacity` bins. Requests below
    /// the current capacity plus the minimum headroom are ignored.
    pub fn reserve(&mut self, new_capacity: usize) -> Result<(), Error> {
        if new_capacity >= self.num_buckets.saturating_add(Self::MIN_BUCKETS) {
            self.rehash(new_capacity)?;
        }
        Ok(())
    }

    fn grow_size(&self) -> Result<usize, Error> {
        let floor = self
            .num_buckets
            .checked_add(Self::MIN_BUCKETS)
            .ok_or(Error::CapacityExhausted)?;
        let scaled = (self.num_buckets as f64 * self.grow_factor) as usize;
        Ok(floor.max(scaled))
    }

    /// One run of the insertion algorithm. On failure the element left
    /// in `elem` is the last eviction victim, not necessarily the one
    /// passed in; the caller must grow the table and retry with it.
    fn try_insert(&mut self, elem: &mut L::Elem) -> bool {
        loop {
            let hash0 = make_hash(&self.hash_builder, L::key_of(elem));
            let hash1 = secondary_hash(hash0);

            let anchor1 = fastrange(hash0, self.num_buckets);
            let anchor2 = fastrange(hash1, self.num_buckets);

            let reversed1 = self.layout.is_bucket_reversed(anchor1);
            let reversed2 = self.layout.is_bucket_reversed(anchor2);
            let init1 = self.window_start(anchor1, reversed1);
            let init2 = self.window_start(anchor2, reversed2);

            let mut min1 = self.layout.label(init1);
            let mut min2 = self.layout.label(init2);
            let mut pos1 = init1;
            let mut pos2 = init2;
            for i in 1..B {
                let l1 = self.layout.label(init1 + i);
                let l2 = self.layout.label(init2 + i);
                if l1 < min1 {
                    min1 = l1;
                    pos1 = init1 + i;
                }
                if l2 < min2 {
                    min2 = l2;
                    pos2 = init2 + i;
                }
            }

            // free bin in the primary window
            if min1 == 0 {
                self.layout.update_bin(
                    pos1,
                    pos1 - init1,
                    reversed1,
                    bounded_label(min2),
                    meta::tag_of_hash(hash0),
                );
                self.layout.save(pos1, *elem);
                self.num_elems += 1;
                return true;
            }

            // primary rescue: reversal or hopscotch may free one
            if let Some(empty) = self.find_empty_hopscotch(anchor1, init1) {
                let reversed1 = self.layout.is_bucket_reversed(anchor1);
                let init1 = self.window_start(anchor1, reversed1);
                self.layout.update_bin(
                    empty,
                    empty - init1,
                    reversed1,
                    bounded_label(min2),
                    meta::tag_of_hash(hash0),
                );
                self.layout.save(empty, *elem);
                self.num_elems += 1;
                return true;
            }

            // free bin in the secondary window
            if min2 == 0 {
                self.layout.set_unlucky_bucket(anchor1);
                self.layout.update_bin(
                    pos2,
                    pos2 - init2,
                    reversed2,
                    bounded_label(min1),
                    meta::tag_of_hash(hash1),
                );
                self.layout.save(pos2, *elem);
                self.num_elems += 1;
                return true;
            }

            // secondary rescue
            if let Some(empty) = self.find_empty_hopscotch(anchor2, init2) {
                self.layout.set_unlucky_bucket(anchor1);
                let reversed2 = self.layout.is_bucket_reversed(anchor2);
                let init2 = self.window_start(anchor2, reversed2);
                self.layout.update_bin(
                    empty,
                    empty - init2,
                    reversed2,
                    bounded_label(min1),
                    meta::tag_of_hash(hash1),
                );
                self.layout.save(empty, *elem);
                self.num_elems += 1;
                return true;
            }

            // both buckets saturated: give up and let the caller grow
            if min1.min(min2) >= meta::MAX_LABEL {
                return false;
            }

            // LSA_max eviction: kick the smallest label, ties prefer
            // the primary bucket
            if min1 <= min2 {
                self.layout.update_bin(
                    pos1,
                    pos1 - init1,
                    reversed1,
                    bounded_label(min2),
                    meta::tag_of_hash(hash0),
                );
                let victim = self.layout.elem(pos1);
                self.layout.save(pos1, *elem);
                *elem = victim;
            } else {
                self.layout.set_unlucky_bucket(anchor1);
                self.layout.update_bin(
                    pos2,
                    pos2 - init2,
                    reversed2,
                    bounded_label(min1),
                    meta::tag_of_hash(hash1),
                );
                let victim = self.layout.elem(pos2);
                self.layout.save(pos2, *elem);
                *elem = victim;
            }
        }
    }

    /// In-place growth to `target` bins, retried with a ~3% larger
    /// target whenever the replay cannot settle every element.
    fn rehash(&mut self, mut target: usize) -> Result<(), Error> {
        debug_assert!(target >= self.num_buckets + Self::MIN_BUCKETS);

        let mut overflow: Vec<L::Elem> = Vec::with_capacity((self.num_elems / 8).max(1));

        loop {
            #[cfg(test)]
            {
                self.rehash_count += 1;
            }

            let old_buckets = self.num_buckets;
            self.num_buckets = target;
            self.layout.grow_to(target);
            self.num_elems = 0;
            for i in 0..(B - 1) {
                self.layout.set_bucket_reversed(self.num_buckets - 1 - i);
            }

            // Old bins drain from the tail down. An element moves
            // straight to its new window only when that window starts
            // past its current bin, so the write cannot clobber a bin
            // that has not been drained yet.
            for i in (1..old_buckets).rev() {
                if !self.layout.is_empty(i) {
                    let hash0 = make_hash(&self.hash_builder, self.layout.key(i));
                    let anchor = fastrange(hash0, self.num_buckets);
                    let reversed = self.layout.is_bucket_reversed(anchor);
                    let init = self.window_start(anchor, reversed);
                    let mut moved = false;
                    if init > i {
                        let (min, pos) = self.calc_min(init);
                        if min == 0 {
                            self.layout.update_bin(
                                pos,
                                pos - init,
                                reversed,
                                1,
                                meta::tag_of_hash(hash0),
                            );
                            self.layout.move_elem(pos, i);
                            self.num_elems += 1;
                            moved = true;
                        }
                    }
                    if !moved {
                        overflow.push(self.layout.elem(i));
                    }
                }
                self.layout.clear_meta(i, 1);
            }
            if !self.layout.is_empty(0) {
                overflow.push(self.layout.elem(0));
            }
            self.layout.clear_meta(0, 1);

            // replay the spill through the regular insertion path
            let mut stuck = false;
            while let Some(last) = overflow.last_mut() {
                if self.try_insert(last) {
                    overflow.pop();
                } else {
                    stuck = true;
                    break;
                }
            }
            if !stuck {
                return Ok(());
            }
            target = self
                .num_buckets
                .checked_add((self.num_buckets >> 5).max(1))
                .ok_or(Error::CapacityExhausted)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::hash::{BuildHasherDefault, Hasher};

    const HINTS: [SearchHint; 3] = [
        SearchHint::Unknown,
        SearchHint::ExpectPositive,
        SearchHint::ExpectNegative,
    ];

    #[test]
    fn test_empty_table() {
        let mut set = SetSoA::<u64, DefaultHashBuilder, 2>::with_capacity(8);
        assert_eq!(set.capacity(), 8);
        assert_eq!(set.len(), 0);
        assert!(set.is_empty());
        assert!(!set.contains(&42, SearchHint::Unknown));
        assert!(!set.remove(&42));
        assert_eq!(set.count(&42, SearchHint::ExpectNegative), 0);
    }

    #[test]
    fn test_single_element() {
        let mut set = SetSoA::<u64, DefaultHashBuilder, 2>::with_capacity(8);
        assert!(set.insert(42).unwrap());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&42, SearchHint::Unknown));
        assert!(!set.contains(&43, SearchHint::Unknown));
        assert!(set.remove(&42));
        assert_eq!(set.len(), 0);
        assert!(!set.contains(&42, SearchHint::Unknown));
        set.check_invariants();
    }

    #[test]
    fn test_capacity_clamped_to_minimum() {
        let set = SetSoA::<u64, DefaultHashBuilder, 4>::with_capacity(3);
        assert_eq!(set.capacity(), 6);
        let set = SetSoA::<u64, DefaultHashBuilder, 2>::with_capacity(0);
        assert_eq!(set.capacity(), 2);
        let set = SetAoS::<u64, DefaultHashBuilder, 3>::with_capacity(100);
        assert_eq!(set.capacity(), 100);
        assert_eq!(set.bucket_count(), 100);
    }

    #[test]
    fn test_redundant_insert_keeps_size() {
        let mut set = SetSoA::<u64>::with_capacity(16);
        assert!(set.insert(9).unwrap());
        assert!(!set.insert(9).unwrap());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&9, SearchHint::Unknown));
        set.check_invariants();
    }

    #[test]
    fn test_round_trip() {
        let mut set = SetAoS::<u64>::with_capacity(32);
        for k in [1u64, 500, 123_456_789, u64::MAX] {
            assert!(set.insert(k).unwrap());
            assert!(set.contains(&k, SearchHint::ExpectPositive));
            assert!(set.remove(&k));
            assert!(!set.contains(&k, SearchHint::Unknown));
        }
        assert!(set.is_empty());
    }

    #[test]
    fn test_fill_past_max_load_grows() {
        let mut set = SetSoA::<u64, DefaultHashBuilder, 2>::with_seed(16, 7);
        for k in 0..16u64 {
            assert!(set.insert(k).unwrap());
        }
        assert!(set.capacity() > 16);
        assert!(set.rehash_count() >= 1);
        assert_eq!(set.len(), 16);
        for k in 0..16u64 {
            assert!(set.contains(&k, SearchHint::Unknown), "lost key {}", k);
        }
        set.check_invariants();
    }

    #[test]
    fn test_clear_reinitialises() {
        let mut set = SetAoB::<u64, DefaultHashBuilder, 3>::with_seed(64, 3);
        for k in 0..40u64 {
            set.insert(k).unwrap();
        }
        let cap = set.capacity();
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.capacity(), cap);
        for k in 0..40u64 {
            assert!(!set.contains(&k, SearchHint::Unknown));
        }
        set.check_invariants();
        for k in 0..40u64 {
            assert!(set.insert(k).unwrap());
        }
        assert_eq!(set.len(), 40);
        set.check_invariants();
    }

    #[test]
    fn test_reserve() {
        let mut set = SetSoA::<u64, DefaultHashBuilder, 2>::with_seed(8, 11);
        for k in 0..5u64 {
            set.insert(k).unwrap();
        }
        set.reserve(32).unwrap();
        assert_eq!(set.capacity(), 32);
        for k in 0..5u64 {
            assert!(set.contains(&k, SearchHint::Unknown));
        }
        // below capacity plus headroom: no-op
        set.reserve(33).unwrap();
        assert_eq!(set.capacity(), 32);
        set.reserve(34).unwrap();
        assert_eq!(set.capacity(), 34);
        set.check_invariants();
    }

    #[test]
    fn test_load_factor_accessors() {
        let mut set = SetSoA::<u64>::with_capacity(100);
        assert_eq!(set.load_factor(), 0.0);
        assert!((set.max_load_factor() - 0.9001).abs() < 1e-9);
        assert!((set.grow_factor() - 1.2).abs() < 1e-9);
        set.set_max_load_factor(0.5);
        set.set_grow_factor(2.0);
        assert_eq!(set.max_load_factor(), 0.5);
        assert_eq!(set.grow_factor(), 2.0);
        set.insert(1).unwrap();
        assert!((set.load_factor() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_stress_95_percent_arity_4() {
        let n = 20_000usize;
        let mut set = SetSoA::<u64, DefaultHashBuilder, 4>::with_seed(n, 0xCB6);
        let mut rng = StdRng::seed_from_u64(99);
        let members: Vec<u64> = (0..n * 95 / 100).map(|_| rng.gen()).collect();
        for &k in &members {
            set.insert(k).unwrap();
        }
        assert_eq!(set.len(), members.len());
        set.check_invariants();

        for &k in &members {
            for hint in HINTS {
                assert!(set.contains(&k, hint), "member {} missing", k);
            }
        }
        let mut miss_rng = StdRng::seed_from_u64(100);
        for _ in 0..n {
            let k: u64 = miss_rng.gen();
            for hint in HINTS {
                assert!(!set.contains(&k, hint), "phantom member {}", k);
            }
        }
    }

    #[test]
    fn test_high_load_arity_4_seed_1() {
        // table sized for exactly as many elements as get inserted; any
        // growth comes from the insertion algorithm giving up, and the
        // minimal grow factor keeps each growth at the headroom floor
        let n = 100_000usize;
        let mut set = SetSoA::<u64, DefaultHashBuilder, 4>::with_seed(n, 0xCB64);
        set.set_max_load_factor(1.0);
        set.set_grow_factor(1.0);

        let mut rng = StdRng::seed_from_u64(1);
        let keys: Vec<u64> = (0..n).map(|_| rng.gen()).collect();
        for &k in &keys {
            set.insert(k).unwrap();
        }
        assert_eq!(set.len(), n);
        assert!(
            set.load_factor() >= 0.97,
            "load factor {} too low after {} rehashes",
            set.load_factor(),
            set.rehash_count()
        );
        for &k in &keys {
            assert!(set.contains(&k, SearchHint::ExpectPositive));
        }
        set.check_invariants();
    }

    #[test]
    fn test_arity_2_at_80_percent() {
        let mut set = SetAoS::<u64, DefaultHashBuilder, 2>::with_seed(125_000, 0xCB2);
        let mut rng = StdRng::seed_from_u64(2);
        let keys: Vec<u64> = (0..100_000).map(|_| rng.gen()).collect();
        for &k in &keys {
            set.insert(k).unwrap();
        }
        assert_eq!(set.len(), keys.len());
        for &k in &keys {
            assert!(set.contains(&k, SearchHint::Unknown));
        }
        set.check_invariants();
    }

    #[test]
    fn test_arity_4_at_98_percent_bounded_rehashes() {
        // 100_000 elements into 102_041 bins is a 98% target; growth is
        // allowed but must stay within the geometric-growth bound
        let mut set = SetSoA::<u64, DefaultHashBuilder, 4>::with_seed(102_041, 0xCB98);
        set.set_max_load_factor(0.99);
        let mut rng = StdRng::seed_from_u64(3);
        let keys: Vec<u64> = (0..100_000).map(|_| rng.gen()).collect();
        for &k in &keys {
            set.insert(k).unwrap();
        }
        assert_eq!(set.len(), keys.len());
        assert!(
            set.rehash_count() <= 22,
            "{} rehashes for 100k inserts at a 98% target",
            set.rehash_count()
        );
        for &k in &keys {
            assert!(set.contains(&k, SearchHint::ExpectPositive));
        }
        set.check_invariants();
    }

    /// Hasher returning the key verbatim, for tests that steer keys
    /// into chosen buckets.
    #[derive(Default)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | b as u64;
            }
        }

        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
    }

    #[test]
    fn test_secondary_bucket_path() {
        // all 16 keys share primary bucket 55 of 64; their secondary
        // buckets are 0..16
        let mut set: CbgTable<crate::soa::SoaSet<u64>, BuildHasherDefault<IdentityHasher>, 2> =
            CbgTable::with_capacity_and_hasher(64, BuildHasherDefault::default());

        let keys: Vec<u64> = (0..16u64)
            .map(|i| (0xDEAD_BEEF_u64 << 32) | (i << 26))
            .collect();
        for &k in &keys {
            assert!(set.insert(k).unwrap());
        }
        assert_eq!(set.len(), 16);

        let primary = 55usize;
        assert!(set.layout.is_unlucky_bucket(primary));

        let mut in_primary = 0;
        for &k in &keys {
            for hint in HINTS {
                assert!(set.contains(&k, hint));
            }
            let pos = set.find_position(&k, SearchHint::Unknown).unwrap();
            if set.belong_to_bucket(pos) == Some(primary) {
                in_primary += 1;
            }
        }
        assert!(in_primary <= 8, "{} keys crowded into one bucket", in_primary);
        set.check_invariants();
    }

    #[test]
    fn test_erase_does_not_resurrect() {
        let mut set = SetSoA::<u64, DefaultHashBuilder, 3>::with_seed(600, 0xE5A);
        for k in 0..1000u64 {
            set.insert(k).unwrap();
        }
        for k in (0..1000u64).step_by(3) {
            assert!(set.remove(&k));
        }
        set.check_invariants();
        for k in 0..1000u64 {
            let expected = usize::from(k % 3 != 0);
            for hint in HINTS {
                assert_eq!(set.count(&k, hint), expected, "key {}", k);
            }
        }
        assert_eq!(set.len(), 1000 - 334);
    }

    #[test]
    fn test_remove_then_reinsert() {
        let mut set = SetAoB::<u64, DefaultHashBuilder, 2>::with_seed(64, 5);
        for k in 0..40u64 {
            set.insert(k).unwrap();
        }
        for k in (0..40u64).step_by(2) {
            assert!(set.remove(&k));
        }
        for k in (0..40u64).step_by(2) {
            assert!(set.insert(k).unwrap());
        }
        assert_eq!(set.len(), 40);
        for k in 0..40u64 {
            assert!(set.contains(&k, SearchHint::Unknown));
        }
        set.check_invariants();
    }

    #[test]
    fn test_mixed_churn_keeps_invariants() {
        let mut set = SetAoS::<u64, DefaultHashBuilder, 3>::with_seed(128, 0x11);
        let mut rng = StdRng::seed_from_u64(77);
        let mut live: Vec<u64> = Vec::new();
        for round in 0..2000 {
            if live.is_empty() || rng.gen_ratio(60, 100) {
                let k: u64 = rng.gen();
                if set.insert(k).unwrap() {
                    live.push(k);
                }
            } else {
                let idx = rng.gen_range(0..live.len());
                let k = live.swap_remove(idx);
                assert!(set.remove(&k), "round {}: {} vanished", round, k);
            }
        }
        assert_eq!(set.len(), live.len());
        set.check_invariants();
        for k in live {
            assert!(set.contains(&k, SearchHint::Unknown));
        }
    }

    #[test]
    fn test_all_layouts_smoke() {
        let mut soa = SetSoA::<u64, DefaultHashBuilder, 3>::with_seed(0, 1);
        let mut aos = SetAoS::<u64, DefaultHashBuilder, 3>::with_seed(0, 1);
        let mut aob = SetAoB::<u64, DefaultHashBuilder, 3>::with_seed(0, 1);
        for k in 0..5000u64 {
            soa.insert(k).unwrap();
            aos.insert(k).unwrap();
            aob.insert(k).unwrap();
        }
        for k in 0..5000u64 {
            assert!(soa.contains(&k, SearchHint::Unknown));
            assert!(aos.contains(&k, SearchHint::Unknown));
            assert!(aob.contains(&k, SearchHint::Unknown));
            assert!(!soa.contains(&(k + 10_000), SearchHint::ExpectNegative));
            assert!(!aos.contains(&(k + 10_000), SearchHint::ExpectNegative));
            assert!(!aob.contains(&(k + 10_000), SearchHint::ExpectNegative));
        }
        soa.check_invariants();
        aos.check_invariants();
        aob.check_invariants();
    }
}
