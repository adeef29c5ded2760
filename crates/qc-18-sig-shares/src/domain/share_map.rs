//! Two-level map keyed by sign hash, then member index.
//!
//! Used for the share store, request reservations, pending verification and
//! pending announcements. Keeping one implementation means a sign hash can be
//! torn down from every index with the same `erase_all_for_sign_hash` call.

use super::entities::{SigShareKey, SignHash};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct SigShareMap<T> {
    inner: HashMap<SignHash, HashMap<u16, T>>,
}

impl<T> Default for SigShareMap<T> {
    fn default() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }
}

impl<T> SigShareMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts if absent. Returns false (and keeps the old value) otherwise.
    pub fn add(&mut self, key: SigShareKey, value: T) -> bool {
        match self.inner.entry(key.0).or_default().entry(key.1) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Inserts or replaces, returning the previous value.
    pub fn insert(&mut self, key: SigShareKey, value: T) -> Option<T> {
        self.inner.entry(key.0).or_default().insert(key.1, value)
    }

    pub fn erase(&mut self, key: &SigShareKey) -> Option<T> {
        let members = self.inner.get_mut(&key.0)?;
        let removed = members.remove(&key.1);
        if members.is_empty() {
            self.inner.remove(&key.0);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn has(&self, key: &SigShareKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &SigShareKey) -> Option<&T> {
        self.inner.get(&key.0)?.get(&key.1)
    }

    pub fn get_mut(&mut self, key: &SigShareKey) -> Option<&mut T> {
        self.inner.get_mut(&key.0)?.get_mut(&key.1)
    }

    pub fn get_or_insert_with<F: FnOnce() -> T>(&mut self, key: SigShareKey, f: F) -> &mut T {
        self.inner.entry(key.0).or_default().entry(key.1).or_insert_with(f)
    }

    /// Some entry, in unspecified order.
    pub fn first(&self) -> Option<(SigShareKey, &T)> {
        self.iter().next()
    }

    /// Total number of entries across all sign hashes.
    pub fn len(&self) -> usize {
        self.inner.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn count_for_sign_hash(&self, sign_hash: &SignHash) -> usize {
        self.inner.get(sign_hash).map_or(0, HashMap::len)
    }

    pub fn get_all_for_sign_hash(&self, sign_hash: &SignHash) -> Option<&HashMap<u16, T>> {
        self.inner.get(sign_hash)
    }

    /// Removes every entry of `sign_hash`, returning how many were dropped.
    pub fn erase_all_for_sign_hash(&mut self, sign_hash: &SignHash) -> usize {
        self.inner.remove(sign_hash).map_or(0, |members| members.len())
    }

    /// Removes every entry for which `evict` returns true.
    pub fn erase_if<F>(&mut self, mut evict: F) -> usize
    where
        F: FnMut(&SigShareKey, &T) -> bool,
    {
        let mut removed = 0;
        self.inner.retain(|sign_hash, members| {
            members.retain(|member, value| {
                let drop_it = evict(&(*sign_hash, *member), value);
                if drop_it {
                    removed += 1;
                }
                !drop_it
            });
            !members.is_empty()
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (SigShareKey, &T)> + '_ {
        self.inner.iter().flat_map(|(sign_hash, members)| {
            members
                .iter()
                .map(move |(member, value)| ((*sign_hash, *member), value))
        })
    }

    pub fn for_each<F: FnMut(&SigShareKey, &T)>(&self, mut f: F) {
        for (key, value) in self.iter() {
            f(&key, value);
        }
    }

    pub fn sign_hashes(&self) -> impl Iterator<Item = &SignHash> + '_ {
        self.inner.keys()
    }

    pub fn keys(&self) -> Vec<SigShareKey> {
        self.iter().map(|(key, _)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(h: u8, member: u16) -> SigShareKey {
        ([h; 32], member)
    }

    #[test]
    fn test_add_is_insert_if_absent() {
        let mut map = SigShareMap::new();
        assert!(map.add(key(1, 0), "first"));
        assert!(!map.add(key(1, 0), "second"));
        assert_eq!(map.get(&key(1, 0)), Some(&"first"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_replaces() {
        let mut map = SigShareMap::new();
        assert_eq!(map.insert(key(1, 0), 1u64), None);
        assert_eq!(map.insert(key(1, 0), 2u64), Some(1));
        assert_eq!(map.get(&key(1, 0)), Some(&2));
    }

    #[test]
    fn test_erase_drops_empty_sign_hash() {
        let mut map = SigShareMap::new();
        map.add(key(1, 3), ());
        assert_eq!(map.erase(&key(1, 3)), Some(()));
        assert!(map.is_empty());
        assert_eq!(map.sign_hashes().count(), 0);
        assert_eq!(map.erase(&key(1, 3)), None);
    }

    #[test]
    fn test_counts_per_sign_hash() {
        let mut map = SigShareMap::new();
        map.add(key(1, 0), ());
        map.add(key(1, 1), ());
        map.add(key(2, 0), ());
        assert_eq!(map.count_for_sign_hash(&[1; 32]), 2);
        assert_eq!(map.count_for_sign_hash(&[3; 32]), 0);
        assert_eq!(map.erase_all_for_sign_hash(&[1; 32]), 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_erase_if_predicate() {
        let mut map = SigShareMap::new();
        for member in 0..6u16 {
            map.add(key(1, member), u64::from(member) * 10);
        }
        let removed = map.erase_if(|_, t| *t >= 30);
        assert_eq!(removed, 3);
        assert_eq!(map.len(), 3);
        assert!(!map.has(&key(1, 4)));
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map: SigShareMap<Vec<u8>> = SigShareMap::new();
        map.get_or_insert_with(key(1, 1), Vec::new).push(1);
        map.get_or_insert_with(key(1, 1), Vec::new).push(2);
        assert_eq!(map.get(&key(1, 1)), Some(&vec![1, 2]));
    }

    proptest! {
        #[test]
        fn prop_len_matches_distinct_keys(entries in proptest::collection::vec((0u8..4, 0u16..16), 0..64)) {
            let mut map = SigShareMap::new();
            let mut distinct = std::collections::HashSet::new();
            for (h, member) in entries {
                let inserted = map.add(key(h, member), ());
                prop_assert_eq!(inserted, distinct.insert((h, member)));
            }
            prop_assert_eq!(map.len(), distinct.len());
            prop_assert_eq!(map.iter().count(), distinct.len());
        }
    }
}
