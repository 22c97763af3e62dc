//! An internal cache slot: the payload behind its own reader/writer lock, plus the book-keeping the cache needs.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RawRwLock, RwLock};

pub(crate) type ReadGuard<T> = lock_api::ArcRwLockReadGuard<RawRwLock, T>;
pub(crate) type WriteGuard<T> = lock_api::ArcRwLockWriteGuard<RawRwLock, T>;

pub(crate) struct Entry<T> {
    key: u32,
    cost: usize,
    /// Set while a writer turns its lock into a read lock.  Removers must leave the entry alone meanwhile.
    demoting: AtomicBool,
    data: Arc<RwLock<T>>,
}

impl<T> Entry<T> {
    pub(crate) fn new(key: u32, cost: usize, data: T) -> Entry<T> {
        Entry {
            key,
            cost,
            demoting: AtomicBool::new(false),
            data: Arc::new(RwLock::new(data)),
        }
    }

    pub(crate) fn key(&self) -> u32 {
        self.key
    }

    pub(crate) fn cost(&self) -> usize {
        self.cost
    }

    pub(crate) fn try_read(&self) -> Option<ReadGuard<T>> {
        self.data.try_read_arc()
    }

    pub(crate) fn try_write(&self) -> Option<WriteGuard<T>> {
        self.data.try_write_arc()
    }

    /// Lock an entry nobody else can reach.  Never waits.
    pub(crate) fn lock_fresh_read(&self) -> ReadGuard<T> {
        self.data.read_arc()
    }

    /// Lock an entry nobody else can reach.  Never waits.
    pub(crate) fn lock_fresh_write(&self) -> WriteGuard<T> {
        self.data.write_arc()
    }

    pub(crate) fn is_demoting(&self) -> bool {
        self.demoting.load(Ordering::Acquire)
    }

    /// Turn a write guard on this entry into a read guard, flagging the entry for the duration.
    pub(crate) fn demote(&self, guard: WriteGuard<T>) -> ReadGuard<T> {
        debug_assert!(Arc::ptr_eq(lock_api::ArcRwLockWriteGuard::rwlock(&guard), &self.data));
        self.demoting.store(true, Ordering::Release);
        let read = lock_api::ArcRwLockWriteGuard::downgrade(guard);
        self.demoting.store(false, Ordering::Release);
        read
    }
}
