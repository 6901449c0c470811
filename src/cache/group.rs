//! Per-primary-key container of entries.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use crate::ds::NodeId;

/// One cached record: the shared payload handle plus the bookkeeping the
/// engine and collector need to keep the group map and the recency list in
/// step.
#[derive(Debug)]
pub(crate) struct Entry<T> {
    /// Shared payload handle; `get` clones this.
    pub item: Arc<T>,
    /// The entry's node in the recency list.
    pub node: NodeId,
    /// A `get` only re-orders the list once this instant has passed.
    pub promotable_after: Instant,
    /// Bytes charged against the budget at insert time, credited back on
    /// every removal path.
    pub charge: i64,
}

/// The lock-guarded state of a group.
#[derive(Debug)]
pub(crate) struct GroupNodes<T> {
    pub map: FxHashMap<String, Entry<T>>,
    /// Tombstone set under `Index.write -> Group.write` when the group is
    /// unlinked from the index. A writer that acquired the group through a
    /// stale index read must re-check this and retry.
    pub dead: bool,
}

/// Container of all entries sharing one primary key.
///
/// Owns the secondary-key map behind a per-group reader/writer lock:
/// lookups take the read lock, entry insert/delete and item replacement
/// take the write lock.
#[derive(Debug)]
pub(crate) struct Group<T> {
    pub key: String,
    nodes: RwLock<GroupNodes<T>>,
}

impl<T> Group<T> {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            nodes: RwLock::new(GroupNodes {
                map: FxHashMap::default(),
                dead: false,
            }),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, GroupNodes<T>> {
        self.nodes.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, GroupNodes<T>> {
        self.nodes.write()
    }
}
