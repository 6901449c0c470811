//! grouplru: in-process two-level LRU cache with background eviction.
//!
//! Entries are addressed by a (primary, secondary) key pair and point to
//! caller-supplied items. Footprint is bounded by a byte budget enforced by
//! a background collector that prunes the least-recently-used tail in
//! batches; a promotion throttle keeps hot-key reads on shared locks.

pub mod cache;
mod collector;
pub mod config;
pub mod ds;
pub mod item;
pub mod prelude;
pub mod stats;

pub use cache::{GroupedLruCache, ENTRY_OVERHEAD};
pub use config::Configuration;
pub use item::CacheItem;
