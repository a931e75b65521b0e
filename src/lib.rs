//! Cuckoo Breeding Ground (CBG) hash containers.
//!
//! CBG is cuckoo hashing with two hash functions over buckets of `B`
//! contiguous bins, pushed to very high load factors by three rescue
//! mechanisms:
//!
//! - 3-bit displacement labels select eviction victims with the smallest
//!   displacement history (LSA_max), bounding insertion work
//! - a full bucket may reverse, extending its window to the left of the
//!   anchor bin instead of the right
//! - hopscotch displacement drags a nearby empty bin back into a full
//!   bucket's window
//!
//! Lookups probe at most the two candidate bucket windows of a key.
//! Three bin layouts are provided, each as a set and a map:
//!
//! - [`SetSoA`] / [`MapSoA`]: parallel arrays with 16-bit metadata
//!   carrying a hash tag byte. Fastest for negative queries.
//! - [`SetAoS`] / [`MapAoS`]: metadata and payload interleaved per bin.
//!   Fastest for positive queries.
//! - [`SetAoB`] / [`MapAoB`]: bins grouped into fixed blocks. Positive
//!   query oriented, denser than per-bin interleaving for small keys.
//!
//! Bucket arity selection:
//!
//! - `B = 2`: fastest queries, keep the load factor under 80%
//! - `B = 4`: almost no memory waste, load factors up to 99%
//! - `B = 3`: balanced choice for 80% to 95%
//!
//! Elements must be `Copy`: bins are moved with plain copies and `remove`
//! only blanks metadata, so payloads may not own resources.

use core::hash::{BuildHasher, Hash};

pub mod aob;
pub mod aos;
pub mod layout;
mod map;
mod meta;
pub mod soa;
pub mod table;

pub use table::{CbgTable, MapAoB, MapAoS, MapSoA, SetAoB, SetAoS, SetSoA};

/// Hash builder used when none is supplied. A fresh one seeds itself
/// from platform entropy, so bucket placement varies between table
/// instances.
pub type DefaultHashBuilder = ahash::RandomState;

/// Caller expectation for a lookup, selecting the probe path.
///
/// `ExpectPositive` skips the unlucky-bucket gate and always probes the
/// secondary bucket, trading one guaranteed extra probe for a branch
/// that never mispredicts on hits. The wrong hint never affects results,
/// only speed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchHint {
    #[default]
    Unknown,
    ExpectPositive,
    ExpectNegative,
}

/// Failures surfaced by table operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The next growth target does not fit in the addressable bucket
    /// range.
    #[error("table cannot grow any further")]
    CapacityExhausted,

    /// `at()` was called for a key the map does not hold.
    #[error("key not present in the table")]
    KeyNotFound,
}

#[inline]
pub(crate) fn make_hash<S, Q>(hash_builder: &S, key: &Q) -> u64
where
    S: BuildHasher,
    Q: Hash + ?Sized,
{
    hash_builder.hash_one(key)
}

/// Maps a full-range word into `[0, p)` without division: the high half
/// of the 128-bit product.
#[inline]
pub(crate) fn fastrange(word: u64, p: usize) -> usize {
    ((word as u128 * p as u128) >> 64) as usize
}

/// Secondary bucket hash. A rotation of the primary, not an independent
/// hash; adequate while the table stays below 2^48 buckets, which also
/// bounds how many tag bits overlap between the two derived indices.
#[inline]
pub(crate) fn secondary_hash(hash: u64) -> u64 {
    hash.rotate_right(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastrange_bounds() {
        for p in [1usize, 2, 7, 64, 1000] {
            assert_eq!(fastrange(0, p), 0);
            assert!(fastrange(u64::MAX, p) < p);
            assert!(fastrange(0x8000_0000_0000_0000, p) >= p / 2);
        }
    }

    #[test]
    fn test_secondary_hash_is_rotation() {
        let h = 0x0123_4567_89AB_CDEF_u64;
        assert_eq!(secondary_hash(h), 0x89AB_CDEF_0123_4567);
        assert_eq!(secondary_hash(secondary_hash(h)), h);
    }
}
