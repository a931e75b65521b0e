//! Blocked interleaved storage ("array of blocks").
//!
//! Bins are grouped into fixed-size blocks, each block holding its
//! control bytes and payloads in small contiguous arrays. Positive
//! lookups stay close to one cache line like the per-bin layout, but
//! the control bytes of a whole block pack together instead of being
//! padded apart by payload alignment.

use std::mem::MaybeUninit;

use crate::layout::{Layout, MapLayout};
use crate::meta;

/// Bins per block.
const BLOCK_BINS: usize = 8;

#[inline]
fn blocks_for(bins: usize) -> usize {
    (bins + BLOCK_BINS - 1) / BLOCK_BINS
}

struct SetBlock<K> {
    meta: [u8; BLOCK_BINS],
    keys: [MaybeUninit<K>; BLOCK_BINS],
}

impl<K> SetBlock<K> {
    fn empty() -> Self {
        Self {
            meta: [0; BLOCK_BINS],
            // Safety: an array of MaybeUninit needs no initialization.
            keys: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }
}

/// Set storage: blocks of control bytes and keys.
pub struct AobSet<K> {
    blocks: Vec<SetBlock<K>>,
}

impl<K: Copy> Layout for AobSet<K> {
    type Key = K;
    type Value = K;
    type Elem = K;

    const TAGGED: bool = false;

    fn with_bins(bins: usize) -> Self {
        let mut v = Vec::new();
        v.resize_with(blocks_for(bins), SetBlock::empty);
        Self { blocks: v }
    }

    fn grow_to(&mut self, bins: usize) {
        self.blocks.resize_with(blocks_for(bins), SetBlock::empty);
    }

    #[inline]
    fn meta(&self, pos: usize) -> u16 {
        self.blocks[pos / BLOCK_BINS].meta[pos % BLOCK_BINS] as u16
    }

    #[inline]
    fn store_meta(&mut self, pos: usize, word: u16) {
        self.blocks[pos / BLOCK_BINS].meta[pos % BLOCK_BINS] = word as u8;
    }

    #[inline]
    fn clear_meta(&mut self, from: usize, count: usize) {
        for pos in from..from + count {
            self.blocks[pos / BLOCK_BINS].meta[pos % BLOCK_BINS] = 0;
        }
    }

    #[inline]
    fn move_elem(&mut self, dst: usize, src: usize) {
        let key = self.blocks[src / BLOCK_BINS].keys[src % BLOCK_BINS];
        self.blocks[dst / BLOCK_BINS].keys[dst % BLOCK_BINS] = key;
    }

    #[inline]
    fn save(&mut self, pos: usize, elem: K) {
        self.blocks[pos / BLOCK_BINS].keys[pos % BLOCK_BINS] = MaybeUninit::new(elem);
    }

    #[inline]
    fn key(&self, pos: usize) -> &K {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.blocks[pos / BLOCK_BINS].keys[pos % BLOCK_BINS].assume_init_ref() }
    }

    #[inline]
    fn elem(&self, pos: usize) -> K {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.blocks[pos / BLOCK_BINS].keys[pos % BLOCK_BINS].assume_init_read() }
    }

    #[inline]
    fn key_of(elem: &K) -> &K {
        elem
    }
}

struct MapBlock<K, V> {
    meta: [u8; BLOCK_BINS],
    keys: [MaybeUninit<K>; BLOCK_BINS],
    values: [MaybeUninit<V>; BLOCK_BINS],
}

impl<K, V> MapBlock<K, V> {
    fn empty() -> Self {
        Self {
            meta: [0; BLOCK_BINS],
            // Safety: an array of MaybeUninit needs no initialization.
            keys: unsafe { MaybeUninit::uninit().assume_init() },
            values: unsafe { MaybeUninit::uninit().assume_init() },
        }
    }
}

/// Map storage: blocks of control bytes, keys and values.
pub struct AobMap<K, V> {
    blocks: Vec<MapBlock<K, V>>,
}

impl<K: Copy, V: Copy> Layout for AobMap<K, V> {
    type Key = K;
    type Value = V;
    type Elem = (K, V);

    const TAGGED: bool = false;

    fn with_bins(bins: usize) -> Self {
        let mut v = Vec::new();
        v.resize_with(blocks_for(bins), MapBlock::empty);
        Self { blocks: v }
    }

    fn grow_to(&mut self, bins: usize) {
        self.blocks.resize_with(blocks_for(bins), MapBlock::empty);
    }

    #[inline]
    fn meta(&self, pos: usize) -> u16 {
        self.blocks[pos / BLOCK_BINS].meta[pos % BLOCK_BINS] as u16
    }

    #[inline]
    fn store_meta(&mut self, pos: usize, word: u16) {
        self.blocks[pos / BLOCK_BINS].meta[pos % BLOCK_BINS] = word as u8;
    }

    #[inline]
    fn clear_meta(&mut self, from: usize, count: usize) {
        for pos in from..from + count {
            self.blocks[pos / BLOCK_BINS].meta[pos % BLOCK_BINS] = 0;
        }
    }

    #[inline]
    fn move_elem(&mut self, dst: usize, src: usize) {
        let key = self.blocks[src / BLOCK_BINS].keys[src % BLOCK_BINS];
        let value = self.blocks[src / BLOCK_BINS].values[src % BLOCK_BINS];
        self.blocks[dst / BLOCK_BINS].keys[dst % BLOCK_BINS] = key;
        self.blocks[dst / BLOCK_BINS].values[dst % BLOCK_BINS] = value;
    }

    #[inline]
    fn save(&mut self, pos: usize, elem: (K, V)) {
        self.blocks[pos / BLOCK_BINS].keys[pos % BLOCK_BINS] = MaybeUninit::new(elem.0);
        self.blocks[pos / BLOCK_BINS].values[pos % BLOCK_BINS] = MaybeUninit::new(elem.1);
    }

    #[inline]
    fn key(&self, pos: usize) -> &K {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.blocks[pos / BLOCK_BINS].keys[pos % BLOCK_BINS].assume_init_ref() }
    }

    #[inline]
    fn elem(&self, pos: usize) -> (K, V) {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe {
            (
                self.blocks[pos / BLOCK_BINS].keys[pos % BLOCK_BINS].assume_init_read(),
                self.blocks[pos / BLOCK_BINS].values[pos % BLOCK_BINS].assume_init_read(),
            )
        }
    }

    #[inline]
    fn key_of(elem: &(K, V)) -> &K {
        &elem.0
    }
}

impl<K: Copy, V: Copy> MapLayout for AobMap<K, V> {
    #[inline]
    fn value(&self, pos: usize) -> &V {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.blocks[pos / BLOCK_BINS].values[pos % BLOCK_BINS].assume_init_ref() }
    }

    #[inline]
    fn value_mut(&mut self, pos: usize) -> &mut V {
        debug_assert!(!meta::is_empty(self.meta(pos)));
        // Safety: only called for occupied bins.
        unsafe { self.blocks[pos / BLOCK_BINS].values[pos % BLOCK_BINS].assume_init_mut() }
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
    fn test_partial_last_block() {
        // 11 bins span two blocks; the tail of the second block is never
        // addressed but must exist
        let s: AobSet<u64> = AobSet::with_bins(11);
        assert_eq!(s.blocks.len(), 2);
        for i in 0..11 {
            assert!(s.is_empty(i));
        }
    }

    #[test]
    fn test_cross_block_move() {
        let mut s: AobSet<u64> = AobSet::with_bins(24);
        s.save(2, 77);
        s.update_bin(2, 0, false, 1, 0);
        s.move_elem(17, 2);
        s.update_bin(17, 1, false, 1, 0);
        assert_eq!(*s.key(17), 77);
    }

    #[test]
    fn test_map_roundtrip_and_flags() {
        let mut m: AobMap<u32, u32> = AobMap::with_bins(16);
        m.set_bucket_reversed(9);
        m.save(9, (4, 40));
        m.update_bin(9, 3, true, 6, 0xFF00);
        assert_eq!(m.stored_tag(9), 0); // narrow words carry no tag
        assert_eq!(*m.key(9), 4);
        assert_eq!(*m.value(9), 40);
        assert!(m.is_bucket_reversed(9));
        m.set_empty(9);
        assert!(m.is_bucket_reversed(9));
        assert!(m.is_empty(9));
    }

    #[test]
    fn test_grow_rounds_up_blocks() {
        let mut s: AobSet<u8> = AobSet::with_bins(8);
        s.save(7, 3);
        s.update_bin(7, 0, false, 1, 0);
        s.grow_to(9);
        assert_eq!(s.blocks.len(), 2);
        assert_eq!(*s.key(7), 3);
        assert!(s.is_empty(8));
    }
}
