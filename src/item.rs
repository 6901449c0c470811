//! Capability trait for cached items.
//!
//! The cache is polymorphic over the payload type; callers supply anything
//! implementing [`CacheItem`]. Items are shared as `Arc<T>`, so `get`
//! returns a handle rather than a copy.

use std::time::SystemTime;

/// Caller-supplied capability set for cached payloads.
///
/// Eviction is purely recency-driven: the cache never inspects
/// [`expires_at`](CacheItem::expires_at) itself, the value is carried for
/// embedders that expire on read.
pub trait CacheItem {
    /// Absolute expiry timestamp of the item.
    fn expires_at(&self) -> SystemTime;

    /// Opaque bytes written per entry by [`debug_dump`].
    ///
    /// [`debug_dump`]: crate::cache::GroupedLruCache::debug_dump
    fn debug_bytes(&self) -> Vec<u8>;

    /// Declared payload size in bytes, used by the size-accounted eviction
    /// mode. Each entry is charged `size_bytes() + ENTRY_OVERHEAD` against
    /// the budget. The default of 1 degrades accounting to an entry count.
    fn size_bytes(&self) -> i64 {
        1
    }
}
