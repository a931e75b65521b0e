//! Interleaved per-bin storage ("array of structs").
//!
//! Each bin is one struct holding its control byte next to its payload,
//! so a positive lookup usually resolves inside a single cache line.
//! Control words are 8 bits; there is no room for the hash tag, and the
//! untagged lookup paths are used instead.

use std::mem::MaybeUninit;

use crate::layout::{Layout, MapLayout};
use crate::meta;

struct SetBin<K> {
    meta: u8,
    key: MaybeUninit<K>,
}

impl<K> SetBin<K> {
    fn empty() -> Self {
        Self {
            meta: 0,
            key: MaybeUninit::uninit(),
        }
    }
}

/// Set storage: one struct per bin.
pub struct AosSet<K> {
    bins: Vec<SetBin<K>>,
}

impl<K: Copy> Layout for AosSet<K> {
    type Key = K;
    type Value = K;
    type Elem = K;

    const TAGGED: bool = false;

    fn with_bins(bins: usize) -> Self {
        let mut v = Vec::new();
        v.resize_with(bins, SetBin::empty);
        Self { bins: v }
    }

    fn grow_to(&mut self, bins: usize) {
        self.bins.resize_with(bins, SetBin::empty);
    }

    #[inline]
    fn meta(&self, pos: usize) -> u16 {
        self.bins[pos].meta as u16
    }

    #[inline]
    fn store_meta(&mut self, pos: usize, word: u16) {
        self.bins[pos].meta = word as u8;
    }

    #[inline]
    fn clear_meta(&mut self, from: usize, count: usize) {
        for bin in &mut self.bins[from..from + count] {
            bin.meta = 0;
        }
    }

    #[inline]
    fn move_elem(&mut self, dst: usize, src: usize) {
        let key = self.bins[src].key;
        self.bins[dst].key = key;
    }

    #[inline]
    fn save(&mut self, pos: usize, elem: K) {
        self.bins[pos].key = MaybeUninit::new(elem);
    }

    #[inline]
    fn key(&self, pos: usize) -> &K {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.bins[pos].key.assume_init_ref() }
    }

    #[inline]
    fn elem(&self, pos: usize) -> K {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.bins[pos].key.assume_init_read() }
    }

    #[inline]
    fn key_of(elem: &K) -> &K {
        elem
    }
}

struct MapBin<K, V> {
    meta: u8,
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

impl<K, V> MapBin<K, V> {
    fn empty() -> Self {
        Self {
            meta: 0,
            key: MaybeUninit::uninit(),
            value: MaybeUninit::uninit(),
        }
    }
}

/// Map storage: one struct per bin, key and value colocated.
pub struct AosMap<K, V> {
    bins: Vec<MapBin<K, V>>,
}

impl<K: Copy, V: Copy> Layout for AosMap<K, V> {
    type Key = K;
    type Value = V;
    type Elem = (K, V);

    const TAGGED: bool = false;

    fn with_bins(bins: usize) -> Self {
        let mut v = Vec::new();
        v.resize_with(bins, MapBin::empty);
        Self { bins: v }
    }

    fn grow_to(&mut self, bins: usize) {
        self.bins.resize_with(bins, MapBin::empty);
    }

    #[inline]
    fn meta(&self, pos: usize) -> u16 {
        self.bins[pos].meta as u16
    }

    #[inline]
    fn store_meta(&mut self, pos: usize, word: u16) {
        self.bins[pos].meta = word as u8;
    }

    #[inline]
    fn clear_meta(&mut self, from: usize, count: usize) {
        for bin in &mut self.bins[from..from + count] {
            bin.meta = 0;
        }
    }

    #[inline]
    fn move_elem(&mut self, dst: usize, src: usize) {
        let key = self.bins[src].key;
        let value = self.bins[src].value;
        self.bins[dst].key = key;
        self.bins[dst].value = value;
    }

    #[inline]
    fn save(&mut self, pos: usize, elem: (K, V)) {
        self.bins[pos].key = MaybeUninit::new(elem.0);
        self.bins[pos].value = MaybeUninit::new(elem.1);
    }

    #[inline]
    fn key(&self, pos: usize) -> &K {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.bins[pos].key.assume_init_ref() }
    }

    #[inline]
    fn elem(&self, pos: usize) -> (K, V) {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe {
            (
                self.bins[pos].key.assume_init_read(),
                self.bins[pos].value.assume_init_read(),
            )
        }
    }

    #[inline]
    fn key_of(elem: &(K, V)) -> &K {
        &elem.0
    }
}

impl<K: Copy, V: Copy> MapLayout for AosMap<K, V> {
    #[inline]
    fn value(&self, pos: usize) -> &V {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.bins[pos].value.assume_init_ref() }
    }

    #[inline]
    fn value_mut(&mut self, pos: usize) -> &mut V {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.bins[pos].value.assume_init_mut() }
    }

    #[inline]
    fn pair(key: K, value: V) -> (K, V) {
        (key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_words_drop_tag_byte() {
        let mut s: AosSet<u64> = AosSet::with_bins(4);
        s.save(0, 5);
        s.update_bin(0, 1, true, 3, 0xAB00);
        assert_eq!(s.stored_tag(0), 0);
        assert_eq!(s.label(0), 3);
        assert_eq!(s.anchor_distance(0), 1);
        assert!(s.is_reversed_item(0));
    }

    #[test]
    fn test_map_save_move_read() {
        let mut m: AosMap<u32, u64> = AosMap::with_bins(8);
        m.save(2, (3, 30));
        m.update_bin(2, 0, false, 1, 0);
        m.move_elem(6, 2);
        m.update_bin(6, 0, false, 1, 0);
        assert_eq!(*m.key(6), 3);
        assert_eq!(*m.value(6), 30);
        *m.value_mut(6) = 99;
        assert_eq!(m.elem(6), (3, 99));
    }

    #[test]
    fn test_anchor_flags_survive() {
        let mut m: AosMap<u32, u32> = AosMap::with_bins(4);
        m.set_unlucky_bucket(1);
        m.set_bucket_reversed(1);
        m.save(1, (8, 80));
        m.update_bin(1, 2, false, 5, 0);
        m.set_empty(1);
        assert!(m.is_empty(1));
        assert!(m.is_unlucky_bucket(1));
        assert!(m.is_bucket_reversed(1));
    }

    #[test]
    fn test_grow_preserves() {
        let mut s: AosSet<u16> = AosSet::with_bins(2);
        s.save(0, 1);
        s.update_bin(0, 0, false, 1, 0);
        s.grow_to(10);
        assert_eq!(*s.key(0), 1);
        for i in 2..10 {
            assert!(s.is_empty(i));
        }
    }
}
