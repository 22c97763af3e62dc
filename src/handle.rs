//! Handles are how callers hold on to an entry's payload.
//!
//! A [ReadHandle] shares the payload with any number of other readers; a [WriteHandle] is the only handle to its
//! entry.  Dropping a handle (or passing it to [crate::Cache::release]) releases the lock, so a handle can't be
//! released twice or as the wrong kind.  Handles borrow the cache and so never outlive it.
//!
//! Handles are `!Send`: the lock must be released by the thread that took it.
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::entry::{Entry, ReadGuard, WriteGuard};

/// What kind of lock to take on an entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Access {
    Read,
    Write,
}

pub struct ReadHandle<'a, T> {
    entry: Arc<Entry<T>>,
    guard: ReadGuard<T>,
    _cache: PhantomData<&'a ()>,
}

pub struct WriteHandle<'a, T> {
    entry: Arc<Entry<T>>,
    guard: WriteGuard<T>,
    _cache: PhantomData<&'a ()>,
}

/// A handle whose kind is only known at runtime, as returned by [crate::Cache::get].
pub enum Handle<'a, T> {
    Read(ReadHandle<'a, T>),
    Write(WriteHandle<'a, T>),
}

impl<'a, T> ReadHandle<'a, T> {
    pub fn key(&self) -> u32 {
        self.entry.key()
    }

    pub fn cost(&self) -> usize {
        self.entry.cost()
    }
}

impl<'a, T> WriteHandle<'a, T> {
    pub fn key(&self) -> u32 {
        self.entry.key()
    }

    pub fn cost(&self) -> usize {
        self.entry.cost()
    }

    /// Turn this into a read handle without ever letting go of the entry.
    ///
    /// No remover or collector can take the entry in between.
    pub fn downgrade(self) -> ReadHandle<'a, T> {
        let WriteHandle { entry, guard, .. } = self;
        let guard = entry.demote(guard);
        ReadHandle {
            entry,
            guard,
            _cache: PhantomData,
        }
    }
}

impl<'a, T> Handle<'a, T> {
    /// Try to lock an entry found in the cache, without waiting.
    pub(crate) fn try_acquire(entry: &Arc<Entry<T>>, access: Access) -> Option<Handle<'a, T>> {
        Some(match access {
            Access::Read => Handle::Read(ReadHandle {
                guard: entry.try_read()?,
                entry: entry.clone(),
                _cache: PhantomData,
            }),
            Access::Write => Handle::Write(WriteHandle {
                guard: entry.try_write()?,
                entry: entry.clone(),
                _cache: PhantomData,
            }),
        })
    }

    /// Lock an entry which hasn't been published yet.
    pub(crate) fn fresh(entry: Arc<Entry<T>>, access: Access) -> Handle<'a, T> {
        match access {
            Access::Read => Handle::Read(ReadHandle {
                guard: entry.lock_fresh_read(),
                entry,
                _cache: PhantomData,
            }),
            Access::Write => Handle::Write(WriteHandle {
                guard: entry.lock_fresh_write(),
                entry,
                _cache: PhantomData,
            }),
        }
    }

    pub fn access(&self) -> Access {
        match self {
            Handle::Read(_) => Access::Read,
            Handle::Write(_) => Access::Write,
        }
    }

    pub fn key(&self) -> u32 {
        match self {
            Handle::Read(h) => h.key(),
            Handle::Write(h) => h.key(),
        }
    }

    pub fn cost(&self) -> usize {
        match self {
            Handle::Read(h) => h.cost(),
            Handle::Write(h) => h.cost(),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Handle::Write(_))
    }

    /// Get a read handle, downgrading if this is a write handle.
    pub fn into_read(self) -> ReadHandle<'a, T> {
        match self {
            Handle::Read(h) => h,
            Handle::Write(h) => h.downgrade(),
        }
    }

    pub fn into_write(self) -> Result<WriteHandle<'a, T>, ReadHandle<'a, T>> {
        match self {
            Handle::Read(h) => Err(h),
            Handle::Write(h) => Ok(h),
        }
    }

    /// Mutable access to the payload, if this is a write handle.
    pub fn as_mut(&mut self) -> Option<&mut T> {
        match self {
            Handle::Read(_) => None,
            Handle::Write(h) => Some(&mut **h),
        }
    }
}

impl<'a, T> From<ReadHandle<'a, T>> for Handle<'a, T> {
    fn from(h: ReadHandle<'a, T>) -> Handle<'a, T> {
        Handle::Read(h)
    }
}

impl<'a, T> From<WriteHandle<'a, T>> for Handle<'a, T> {
    fn from(h: WriteHandle<'a, T>) -> Handle<'a, T> {
        Handle::Write(h)
    }
}

impl<'a, T> Deref for ReadHandle<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> Deref for WriteHandle<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for WriteHandle<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Deref for Handle<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Handle::Read(h) => &**h,
            Handle::Write(h) => &**h,
        }
    }
}

impl<'a, T> std::fmt::Debug for ReadHandle<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHandle").field("key", &self.key()).finish()
    }
}

impl<'a, T> std::fmt::Debug for WriteHandle<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle").field("key", &self.key()).finish()
    }
}

impl<'a, T> std::fmt::Debug for Handle<'a, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.key())
            .field("access", &self.access())
            .finish()
    }
}
