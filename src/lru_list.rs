//! The recency list of a cache: every live entry, from least recently used at the head to most recently used at the
//! tail.
//!
//! This is implemented as a vec-backed linked list where each entry owns its slot until it is removed, so slot indices
//! are stable handles which the [crate::index::Index] can point at.  Freed slots are threaded onto a free list and
//! reused.
//!
//! Only the holder of the cache's structural lock ever touches this.
use std::sync::Arc;

use crate::entry::Entry;

struct OccupiedSlot<T> {
    entry: Arc<Entry<T>>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptySlot {
    next_empty: Option<usize>,
}

enum Slot<T> {
    /// This slot is empty, possibly with a pointer at the next empty slot.
    Empty(EmptySlot),
    /// This slot is occupied, and doubly linked to the previous and next slot.
    Occupied(OccupiedSlot<T>),
}

impl<T> Slot<T> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedSlot<T> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("LRU slot should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedSlot<T> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("LRU slot should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptySlot {
        match self {
            Slot::Empty(ref mut x) => x,
            _ => panic!("LRU slot should be empty"),
        }
    }
}

pub(crate) struct LruList<T> {
    slots: Vec<Slot<T>>,
    /// Least recently used.
    head: Option<usize>,
    /// Most recently used.
    tail: Option<usize>,
    empty_head: Option<usize>,
    len: usize,
}

impl<T> LruList<T> {
    pub(crate) fn new() -> LruList<T> {
        LruList {
            slots: Vec::new(),
            head: None,
            tail: None,
            empty_head: None,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Entirely unlink an occupied slot from the list, leaving its own pointers dangling.
    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let s = self.slots[index].as_occupied();
            (s.prev, s.next)
        };

        match prev {
            Some(p) => self.slots[p].as_occupied_mut().next = next,
            None => self.head = next,
        }

        match next {
            Some(n) => self.slots[n].as_occupied_mut().prev = prev,
            None => self.tail = prev,
        }
    }

    /// Link an occupied slot in at the most recently used end.
    fn link_tail(&mut self, index: usize) {
        let old_tail = self.tail;
        {
            let s = self.slots[index].as_occupied_mut();
            s.prev = old_tail;
            s.next = None;
        }

        match old_tail {
            Some(t) => self.slots[t].as_occupied_mut().next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    /// Find an available empty slot, or make one if necessary.
    fn find_empty(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.slots[e].as_empty_mut().next_empty;
            return e;
        }

        self.slots.push(Slot::Empty(EmptySlot { next_empty: None }));
        self.slots.len() - 1
    }

    /// Add an entry as the most recently used one, returning its slot.
    pub(crate) fn push_back(&mut self, entry: Arc<Entry<T>>) -> usize {
        let ind = self.find_empty();
        self.slots[ind] = Slot::Occupied(OccupiedSlot {
            entry,
            prev: None,
            next: None,
        });
        self.link_tail(ind);
        self.len += 1;
        ind
    }

    /// Make the entry in this slot the most recently used one.
    pub(crate) fn touch(&mut self, index: usize) {
        if self.tail == Some(index) {
            return;
        }

        self.unlink(index);
        self.link_tail(index);
    }

    /// Take the entry out of this slot, freeing the slot for reuse.
    pub(crate) fn remove(&mut self, index: usize) -> Arc<Entry<T>> {
        self.unlink(index);
        let mut old = Slot::Empty(EmptySlot {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut old, &mut self.slots[index]);
        self.empty_head = Some(index);
        self.len -= 1;

        match old {
            Slot::Occupied(OccupiedSlot { entry, .. }) => entry,
            _ => panic!("Removed an empty LRU slot"),
        }
    }

    pub(crate) fn entry(&self, index: usize) -> &Arc<Entry<T>> {
        &self.slots[index].as_occupied().entry
    }

    /// The least recently used slot.
    pub(crate) fn front(&self) -> Option<usize> {
        self.head
    }

    /// The slot after this one, towards the most recently used end.
    pub(crate) fn next(&self, index: usize) -> Option<usize> {
        self.slots[index].as_occupied().next
    }

    /// Iterator visiting entries from least to most recently used.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Entry<T>>> {
        let mut ind = self.head;
        std::iter::from_fn(move || {
            let cur = ind?;
            let ret = self.slots[cur].as_occupied();
            ind = ret.next;
            Some(&ret.entry)
        })
    }

    /// Remove every entry, least recently used first.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Entry<T>>> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(h) = self.head {
            out.push(self.remove(h));
        }
        self.slots.clear();
        self.empty_head = None;
        out
    }
}
