//! Errors which can be returned from the cache.
//!
//! Lock contention and missing keys are not errors: `get` retries through contention, and the non-blocking calls
//! report both as `None`/`false`.  Invalid keys are programmer errors and panic.
use crate::CacheConfigBuilderError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The default aligned buffer could not be allocated.
    #[error("failed to allocate {size} bytes aligned to {align}")]
    Alloc { size: usize, align: usize },
    /// A user-supplied [crate::Allocate] refused to produce a payload.
    #[error("allocator failed: {0}")]
    Allocator(String),
    /// Adding the new entry's cost would overflow the running total.
    #[error("entry {key} costs {cost}, which overflows the cache's total cost")]
    CostOverflow { key: u32, cost: usize },
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl From<CacheConfigBuilderError> for CacheError {
    fn from(e: CacheConfigBuilderError) -> CacheError {
        CacheError::Config(e.to_string())
    }
}
