//! Map operations, available on tables whose layout stores a value
//! next to each key.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};

use crate::layout::MapLayout;
use crate::table::CbgTable;
use crate::{Error, SearchHint};

impl<L, S, const B: usize> CbgTable<L, S, B>
where
    L: MapLayout,
    L::Key: Hash + Eq,
    S: BuildHasher,
{
    /// Returns a reference to the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&L::Value>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.find_position(key, SearchHint::Unknown)?;
        Some(self.layout.value(pos))
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut L::Value>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.find_position(key, SearchHint::Unknown)?;
        Some(self.layout.value_mut(pos))
    }

    /// Returns the value stored under `key`, failing with
    /// [`Error::KeyNotFound`] when absent.
    pub fn at<Q>(&self, key: &Q) -> Result<&L::Value, Error>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self
            .find_position(key, SearchHint::ExpectPositive)
            .ok_or(Error::KeyNotFound)?;
        Ok(self.layout.value(pos))
    }

    /// Returns a mutable reference to the value stored under `key`,
    /// inserting a default value first when the key is absent. May grow
    /// the table.
    ///
    /// The key is copied before it goes into the inserted pair, so the
    /// follow-up lookup never reads a consumed key.
    pub fn or_default(&mut self, key: L::Key) -> Result<&mut L::Value, Error>
    where
        L::Key: Copy,
        L::Value: Default,
    {
        if self
            .find_position(&key, SearchHint::ExpectPositive)
            .is_none()
        {
            self.insert(L::pair(key, L::Value::default()))?;
        }
        let pos = self
            .find_position(&key, SearchHint::ExpectPositive)
            .ok_or(Error::KeyNotFound)?;
        Ok(self.layout.value_mut(pos))
    }
}

#[cfg(test)]
mod tests {
    use crate::table::{MapAoB, MapAoS, MapSoA};
    use crate::{DefaultHashBuilder, Error, SearchHint};

    #[test]
    fn test_insert_overwrites_value() {
        let mut map = MapSoA::<u64, &str, DefaultHashBuilder, 2>::with_capacity(8);
        assert!(map.insert((7, "a")).unwrap());
        assert!(!map.insert((7, "b")).unwrap());
        assert_eq!(map.len(), 1);
        assert_eq!(*map.at(&7).unwrap(), "b");
    }

    #[test]
    fn test_at_missing_key() {
        let mut map = MapSoA::<u64, u64>::with_capacity(8);
        map.insert((1, 10)).unwrap();
        assert_eq!(map.at(&2), Err(Error::KeyNotFound));
        assert_eq!(map.at(&1), Ok(&10));
    }

    #[test]
    fn test_get_and_get_mut() {
        let mut map = MapAoS::<u64, u64>::with_capacity(16);
        map.insert((5, 50)).unwrap();
        assert_eq!(map.get(&5), Some(&50));
        assert_eq!(map.get(&6), None);
        *map.get_mut(&5).unwrap() += 1;
        assert_eq!(map.get(&5), Some(&51));
        assert_eq!(map.get_mut(&6), None);
    }

    #[test]
    fn test_or_default_counts() {
        let mut map = MapAoB::<u64, u64>::with_capacity(16);
        *map.or_default(3).unwrap() += 1;
        *map.or_default(3).unwrap() += 1;
        *map.or_default(4).unwrap() += 1;
        assert_eq!(map.get(&3), Some(&2));
        assert_eq!(map.get(&4), Some(&1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_borrowed_key_lookup() {
        let mut map = MapSoA::<&str, u32>::with_capacity(8);
        map.insert(("hello", 1)).unwrap();
        map.insert(("world", 2)).unwrap();
        // queried through `str`, not `&str`
        assert!(map.contains("hello", SearchHint::Unknown));
        assert_eq!(map.get("world"), Some(&2));
        assert!(!map.contains("nope", SearchHint::ExpectNegative));
        assert!(map.remove("hello"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_map_survives_growth() {
        let mut map = MapSoA::<u64, u64, DefaultHashBuilder, 3>::with_seed(8, 21);
        for k in 0..500u64 {
            map.insert((k, k * 3)).unwrap();
        }
        assert_eq!(map.len(), 500);
        for k in 0..500u64 {
            assert_eq!(map.get(&k), Some(&(k * 3)), "key {}", k);
        }
        map.check_invariants();
    }

    #[test]
    fn test_map_remove_keeps_values_intact() {
        let mut map = MapAoS::<u64, u64, DefaultHashBuilder, 2>::with_seed(64, 9);
        for k in 0..40u64 {
            map.insert((k, k + 100)).unwrap();
        }
        for k in (0..40u64).step_by(2) {
            assert!(map.remove(&k));
        }
        for k in 0..40u64 {
            if k % 2 == 0 {
                assert_eq!(map.get(&k), None);
            } else {
                assert_eq!(map.get(&k), Some(&(k + 100)));
            }
        }
        map.check_invariants();
    }
}
