pub use crate::cache::{GroupedLruCache, ENTRY_OVERHEAD};
pub use crate::config::{Configuration, GcCallback, HeapProbe};
pub use crate::ds::{ConcurrentRecencyList, NodeId, RecencyList};
pub use crate::item::CacheItem;
pub use crate::stats::{EvictionLogger, EvictionRecord, StatsSink};
