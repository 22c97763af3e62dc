//! The [Allocate] and [Cleanup] traits let the owner of a cache decide how payloads are produced and torn down.
//!
//! Typically the allocator sizes a buffer from whatever the key refers to (for example an image at some quality
//! level), and the caller decodes into it through the write handle the cache returns.  Any state the callbacks need is
//! captured by the implementing type or closure.
use crate::CacheError;

/// A freshly allocated payload along with what it costs against the quota.
#[derive(Debug)]
pub struct Allocation<T> {
    pub data: T,
    pub cost: usize,
}

impl<T> Allocation<T> {
    pub fn new(data: T, cost: usize) -> Allocation<T> {
        Allocation { data, cost }
    }
}

/// Produce the payload for a key which missed.
///
/// This runs while the cache's structural lock is held, so it should only allocate; filling the payload belongs to
/// the caller holding the write handle.  Once an allocator is installed every miss hands out a write handle.
pub trait Allocate<T>: Send + Sync {
    fn allocate(&self, key: u32, entry_size: usize) -> Result<Allocation<T>, CacheError>;
}

impl<T, F> Allocate<T> for F
where
    F: Fn(u32, usize) -> Result<Allocation<T>, CacheError> + Send + Sync,
{
    fn allocate(&self, key: u32, entry_size: usize) -> Result<Allocation<T>, CacheError> {
        self(key, entry_size)
    }
}

/// Tear down a payload which is leaving the cache.
///
/// Called exactly once per entry, with the entry write-locked by the remover and already unreachable from the cache.
/// The payload itself is dropped right afterwards.
pub trait Cleanup<T>: Send + Sync {
    fn cleanup(&self, key: u32, data: &mut T);
}

impl<T, F> Cleanup<T> for F
where
    F: Fn(u32, &mut T) + Send + Sync,
{
    fn cleanup(&self, key: u32, data: &mut T) {
        self(key, data)
    }
}
