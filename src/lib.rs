//! A concurrent, cost-bounded LRU cache for things which are expensive to produce, such as decoded image buffers.
//!
//! Entries are keyed by small nonzero integers and each carries a cost, usually its size in bytes.  Many threads may
//! share one [Cache]: a lookup returns a [ReadHandle] or [WriteHandle] holding that entry's own reader/writer lock, so
//! decoding into one entry never blocks traffic to the others.  The cache-wide lock only covers book-keeping.
//!
//! - [Cache::get] finds or creates an entry and waits until it can be locked as requested.  A miss first evicts least
//!   recently used entries if the cache is more than 80% full.
//! - [Cache::testget] is the non-blocking probe: it never creates and never waits.
//! - [Cache::remove] drops an entry once nobody holds it; [Cache::gc] evicts whatever unlocked entries it can, coldest
//!   first, without ever waiting.
//!
//! By default payloads are zeroed [AlignedBuffer]s of a fixed size.  Implement [Allocate] (or pass a closure) to size
//! payloads per key, in which case every miss is handed out write locked for the caller to fill, and [Cleanup] to hook
//! their teardown.
mod buffer;
mod cache;
mod config;
mod entry;
mod error;
mod estimate_cost;
mod handle;
mod index;
mod lru_list;
mod stats;
mod traits;

pub use buffer::*;
pub use cache::*;
pub use config::*;
pub use error::*;
pub use estimate_cost::*;
pub use handle::*;
pub use stats::*;
pub use traits::*;
