//! Storage contract between the table core and the bin layouts.
//!
//! A layout owns the bin arrays and answers two kinds of questions: the
//! control word of a bin and the payload of a bin. The table core never
//! sees how the two are arranged in memory, which is the whole point:
//! parallel arrays, per-bin structs and blocked structs all implement
//! the same handful of primitives and the engine monomorphises over
//! them.
//!
//! Payload reads on empty bins are undefined; every accessor that hands
//! out a key or element is only called for bins whose label is nonzero.

use crate::meta;

/// Bin storage for one table. `Elem` is the unit of insertion: the key
/// itself for sets, a `(key, value)` pair for maps.
///
/// `Elem: Copy` is a hard requirement of the engine. Displacement moves
/// bins with plain copies and removal only blanks metadata, so payloads
/// must be bitwise-copyable and must not own resources.
pub trait Layout {
    type Key;
    type Value;
    type Elem: Copy;

    /// Whether control words carry the hash tag byte, enabling the
    /// tag-filtered negative lookup path.
    const TAGGED: bool;

    /// Storage for `bins` bins, all empty.
    fn with_bins(bins: usize) -> Self;

    /// Grows to `bins` bins. Existing bins keep their contents; new
    /// bins come up with zeroed metadata.
    fn grow_to(&mut self, bins: usize);

    /// Whole control word of a bin.
    fn meta(&self, pos: usize) -> u16;

    /// Overwrites the whole control word of a bin. Narrow layouts drop
    /// the tag byte.
    fn store_meta(&mut self, pos: usize, word: u16);

    /// Zeroes `count` control words starting at `from`, anchor bits
    /// included.
    fn clear_meta(&mut self, from: usize, count: usize);

    /// Copies the payload of bin `src` into bin `dst`. Metadata is not
    /// touched.
    fn move_elem(&mut self, dst: usize, src: usize);

    /// Writes an element's payload into a bin.
    fn save(&mut self, pos: usize, elem: Self::Elem);

    /// Key stored in an occupied bin.
    fn key(&self, pos: usize) -> &Self::Key;

    /// Copy of the element stored in an occupied bin.
    fn elem(&self, pos: usize) -> Self::Elem;

    /// Key part of an element not yet stored.
    fn key_of(elem: &Self::Elem) -> &Self::Key;

    // Derived control-word operations, shared by every layout.

    #[inline]
    fn label(&self, pos: usize) -> u16 {
        meta::label(self.meta(pos))
    }

    #[inline]
    fn is_empty(&self, pos: usize) -> bool {
        meta::is_empty(self.meta(pos))
    }

    /// Blanks the element bits of a bin, keeping the anchor flags.
    #[inline]
    fn set_empty(&mut self, pos: usize) {
        self.store_meta(pos, meta::cleared(self.meta(pos)));
    }

    /// Rewrites the element bits of a bin, keeping the anchor flags.
    #[inline]
    fn update_bin(&mut self, pos: usize, distance: usize, reversed_item: bool, label: u16, tag: u16) {
        self.store_meta(pos, meta::pack(self.meta(pos), distance, reversed_item, label, tag));
    }

    #[inline]
    fn stored_tag(&self, pos: usize) -> u16 {
        meta::tag(self.meta(pos))
    }

    #[inline]
    fn anchor_distance(&self, pos: usize) -> usize {
        meta::distance(self.meta(pos))
    }

    #[inline]
    fn is_reversed_item(&self, pos: usize) -> bool {
        meta::is_reversed_item(self.meta(pos))
    }

    #[inline]
    fn is_bucket_reversed(&self, pos: usize) -> bool {
        meta::is_bucket_reversed(self.meta(pos))
    }

    #[inline]
    fn set_bucket_reversed(&mut self, pos: usize) {
        self.store_meta(pos, self.meta(pos) | meta::BUCKET_REVERSED_BIT);
    }

    #[inline]
    fn is_unlucky_bucket(&self, pos: usize) -> bool {
        meta::is_unlucky_bucket(self.meta(pos))
    }

    #[inline]
    fn set_unlucky_bucket(&mut self, pos: usize) {
        self.store_meta(pos, self.meta(pos) | meta::UNLUCKY_BUCKET_BIT);
    }
}

/// Layouts that store a value next to each key, enabling the map
/// operations of the table.
pub trait MapLayout: Layout {
    /// Value stored in an occupied bin.
    fn value(&self, pos: usize) -> &Self::Value;

    /// Mutable value stored in an occupied bin.
    fn value_mut(&mut self, pos: usize) -> &mut Self::Value;

    /// Builds the insertable element from its parts.
    fn pair(key: Self::Key, value: Self::Value) -> Self::Elem;
}
