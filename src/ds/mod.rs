//! Data structures underpinning the cache core.

pub mod recency_list;

pub use recency_list::{ConcurrentRecencyList, NodeId, RecencyList};
