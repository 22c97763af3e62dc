//! Maps keys to the [crate::lru_list::LruList] slot holding their entry.
//!
//! The index never owns an entry; the slot index is just a lookup handle.  Like the list it lives behind the cache's
//! structural lock, so readers and the single mutator are already serialized by the time they get here.
use std::collections::HashMap;

use ahash::RandomState;

pub(crate) struct Index {
    slots: HashMap<u32, usize, RandomState>,
}

impl Index {
    pub(crate) fn new() -> Index {
        Index {
            slots: Default::default(),
        }
    }

    pub(crate) fn get(&self, key: u32) -> Option<usize> {
        self.slots.get(&key).copied()
    }

    pub(crate) fn contains(&self, key: u32) -> bool {
        self.slots.contains_key(&key)
    }

    /// Record where a new key lives.  A key may only be inserted once.
    pub(crate) fn insert(&mut self, key: u32, slot: usize) {
        let old = self.slots.insert(key, slot);
        assert!(old.is_none(), "Key {} inserted into the index twice", key);
    }

    /// Forget a key, returning whether it was present.
    pub(crate) fn remove(&mut self, key: u32) -> bool {
        self.slots.remove(&key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.slots.iter().map(|(k, s)| (*k, *s))
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}
