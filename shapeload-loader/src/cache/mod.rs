//! Result cache.
//!
//! Each loader key maps to the last result set computed for it (the
//! snapshot) and, separately, to the query definitions that produced it. The
//! definitions are what the live reader re-subscribes to later.
//!
//! Both are written together by one `put`, after every query has resolved,
//! and only when their query names match. Nothing expires; a later load under
//! the same key replaces the entry.

pub mod memory;
pub mod traits;

pub use memory::InMemoryResultStore;
pub use traits::{check_parity, CacheStats, CachedDefinitions, CachedSnapshot, ResultStore};
