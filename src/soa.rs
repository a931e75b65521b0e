//! Parallel-array bin storage ("struct of arrays").
//!
//! Control words, keys and values live in separate allocations, so a
//! negative lookup walks only the metadata array and rarely touches a
//! payload cache line. Control words are 16 bits wide: the low byte is
//! the common codec, the high byte tags the stored hash for the
//! tag-filtered lookup path.

use std::mem::MaybeUninit;

use crate::layout::{Layout, MapLayout};
use crate::meta;

/// Set storage: metadata array plus key array.
pub struct SoaSet<K> {
    meta: Vec<u16>,
    keys: Vec<MaybeUninit<K>>,
}

impl<K: Copy> Layout for SoaSet<K> {
    type Key = K;
    type Value = K;
    type Elem = K;

    const TAGGED: bool = true;

    fn with_bins(bins: usize) -> Self {
        let mut keys = Vec::new();
        keys.resize_with(bins, MaybeUninit::uninit);
        Self {
            meta: vec![0; bins],
            keys,
        }
    }

    fn grow_to(&mut self, bins: usize) {
        self.meta.resize(bins, 0);
        self.keys.resize_with(bins, MaybeUninit::uninit);
    }

    #[inline]
    fn meta(&self, pos: usize) -> u16 {
        self.meta[pos]
    }

    #[inline]
    fn store_meta(&mut self, pos: usize, word: u16) {
        self.meta[pos] = word;
    }

    #[inline]
    fn clear_meta(&mut self, from: usize, count: usize) {
        self.meta[from..from + count].fill(0);
    }

    #[inline]
    fn move_elem(&mut self, dst: usize, src: usize) {
        let bin = self.keys[src];
        self.keys[dst] = bin;
    }

    #[inline]
    fn save(&mut self, pos: usize, elem: K) {
        self.keys[pos] = MaybeUninit::new(elem);
    }

    #[inline]
    fn key(&self, pos: usize) -> &K {
        debug_assert!(!meta::is_empty(self.meta[pos]));
        // Safety: only called for occupied bins, whose key was written
        // by `save` or `move_elem`.
        unsafe { self.keys[pos].assume_init_ref() }
    }

    #[inline]
    fn elem(&self, pos: usize) -> K {
        debug_assert!(!meta::is_empty(self.meta[pos]));
        // Safety: as in `key`.
        unsafe { self.keys[pos].assume_init_read() }
    }

    #[inline]
    fn key_of(elem: &K) -> &K {
        elem
    }
}

/// Map storage: metadata array plus parallel key and value arrays.
pub struct SoaMap<K, V> {
    meta: Vec<u16>,
    keys: Vec<MaybeUninit<K>>,
    values: Vec<MaybeUninit<V>>,
}

impl<K: Copy, V: Copy> Layout for SoaMap<K, V> {
    type Key = K;
    type Value = V;
    type Elem = (K, V);

    const TAGGED: bool = true;

    fn with_bins(bins: usize) -> Self {
        let mut keys = Vec::new();
        keys.resize_with(bins, MaybeUninit::uninit);
        let mut values = Vec::new();
        values.resize_with(bins, MaybeUninit::uninit);
        Self {
            meta: vec![0; bins],
            keys,
            values,
        }
    }

    fn grow_to(&mut self, bins: usize) {
        self.meta.resize(bins, 0);
        self.keys.resize_with(bins, MaybeUninit::uninit);
        self.values.resize_with(bins, MaybeUninit::uninit);
    }

    #[inline]
    fn meta(&self, pos: usize) -> u16 {
        self.meta[pos]
    }

    #[inline]
    fn store_meta(&mut self, pos: usize, word: u16) {
        self.meta[pos] = word;
    }

    #[inline]
    fn clear_meta(&mut self, from: usize, count: usize) {
        self.meta[from..from + count].fill(0);
    }

    #[inline]
    fn move_elem(&mut self, dst: usize, src: usize) {
        let key = self.keys[src];
        let value = self.values[src];
        self.keys[dst] = key;
        self.values[dst] = value;
    }

    #[inline]
    fn save(&mut self, pos: usize, elem: (K, V)) {
        self.keys[pos] = MaybeUninit::new(elem.0);
        self.values[pos] = MaybeUninit::new(elem.1);
    }

    #[inline]
    fn key(&self, pos: usize) -> &K {
        debug_assert!(!meta::is_empty(self.meta[pos]));
        // Safety: only called for occupied bins.
        unsafe { self.keys[pos].assume_init_ref() }
    }

    #[inline]
    fn elem(&self, pos: usize) -> (K, V) {
        debug_assert!(!meta::is_empty(self.meta[pos]));
        // Safety: only called for occupied bins.
        unsafe {
            (
                self.keys[pos].assume_init_read(),
                self.values[pos].assume_init_read(),
            )
        }
    }

    #[inline]
    fn key_of(elem: &(K, V)) -> &K {
        &elem.0
    }
}

impl<K: Copy, V: Copy> MapLayout for SoaMap<K, V> {
    #[inline]
    fn value(&self, pos: usize) -> &V {
        debug_assert!(!meta::is_empty(self.meta[pos]));
        // Safety: only called for occupied bins.
        unsafe { self.values[pos].assume_init_ref() }
    }

    #[inline]
    fn value_mut(&mut self, pos: usize) -> &mut V {
        debug_assert!(!meta::is_empty(self.meta[pos]));
        // Safety: only called for occupied bins.
        unsafe { self.values[pos].assume_init_mut() }
    }

    #[inline]
    fn pair(key: K, value: V) -> (K, V) {
        (key, value)
    }
}
