//! Two-level LRU cache engine.
//!
//! Entries are addressed by a *primary* (group) key and a *secondary* key
//! and point to caller-supplied items. The engine binds the two-level index
//! to the recency list and enforces the promotion throttle; the background
//! [collector](crate::collector) prunes the list tail when the byte budget
//! is exceeded.
//!
//! ## Architecture
//!
//! ```text
//!   index: RwLock<FxHashMap<primary, Arc<Group>>>
//!       │
//!       ▼
//!   Group { nodes: RwLock<FxHashMap<secondary, Entry>> }   (one lock per group)
//!       │
//!       ▼                              ┌──────────────────────────────┐
//!   Entry { item, node, ... } ────────►│ ConcurrentRecencyList        │
//!                                      │ head = MRU ... tail = LRU    │
//!                                      └──────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! Three scopes, always acquired in this order (never the reverse while a
//! later lock is held):
//!
//! 1. `index` — shared for group lookup, exclusive for group create/delete
//! 2. `Group.nodes` — shared for entry lookup, exclusive for entry
//!    insert/delete and item replacement
//! 3. recency list — exclusive only; every list op is a short write
//!
//! A group is unlinked from the index only while both the index write lock
//! and the group write lock are held, which tombstones the group; `set`
//! re-checks the tombstone after locking a group it found through a shared
//! index read and retries, so it never inserts into an orphan.
//!
//! ## Promotion throttle
//!
//! A hot key must not serialize every reader through the list lock.
//! `promotable_after` throttles re-ordering to once per configured window
//! (10 minutes by default); between promotions a `get` is a pair of
//! shared-lock lookups. LRU order is approximate as a result, which is
//! sufficient for eviction quality.

pub(crate) mod group;

use std::io::{self, Write};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::collector::{Collector, CollectorTiming};
use crate::config::{Configuration, GcCallback, HeapProbe};
use crate::ds::ConcurrentRecencyList;
use crate::item::CacheItem;
use crate::stats::{EvictionLogger, StatsSink};

use group::{Entry, Group};

/// Fixed per-entry byte overhead charged on top of
/// [`size_bytes`](crate::item::CacheItem::size_bytes): keys, map slot,
/// list node, and bookkeeping.
pub const ENTRY_OVERHEAD: i64 = 350;

/// Recency-list payload: locates the owning group and entry so the
/// collector can detach pruned nodes. The group reference is non-owning;
/// groups are owned by the index alone.
#[derive(Debug)]
pub(crate) struct NodeRef<T> {
    pub group: Weak<Group<T>>,
    pub secondary: String,
}

/// State shared between the engine handle and the collector thread.
pub(crate) struct CacheShared<T> {
    pub(crate) index: RwLock<FxHashMap<String, Arc<Group<T>>>>,
    pub(crate) list: ConcurrentRecencyList<NodeRef<T>>,
    pub(crate) promote_interval: Duration,
    pub(crate) total_capacity: AtomicI64,
    pub(crate) capacity: AtomicI64,
    pub(crate) gc_factor_cfg: AtomicU32,
    pub(crate) heap_probe: Option<HeapProbe>,
    pub(crate) callback: Option<GcCallback>,
    pub(crate) stats: StatsSink,
    pub(crate) evictions: EvictionLogger,
}

impl<T: CacheItem> CacheShared<T> {
    pub(crate) fn get(&self, primary: &str, secondary: &str) -> Option<Arc<T>> {
        let group = self.index.read().get(primary).cloned()?;
        let now = Instant::now();
        let (item, due) = {
            let nodes = group.read();
            let entry = nodes.map.get(secondary)?;
            (Arc::clone(&entry.item), entry.promotable_after <= now)
        };
        if due {
            let mut nodes = group.write();
            if let Some(entry) = nodes.map.get_mut(secondary) {
                self.promote(entry);
            }
        }
        Some(item)
    }

    pub(crate) fn set(&self, primary: &str, secondary: &str, mut item: Arc<T>) {
        let charge = item.size_bytes() + ENTRY_OVERHEAD;
        loop {
            let group = self.group_for_insert(primary);
            match self.try_insert(&group, secondary, item, charge) {
                Ok(()) => return,
                // The group was unlinked between the index read and the
                // group lock; look it up again.
                Err(returned) => item = returned,
            }
        }
    }

    fn try_insert(
        &self,
        group: &Arc<Group<T>>,
        secondary: &str,
        item: Arc<T>,
        charge: i64,
    ) -> Result<(), Arc<T>> {
        let mut nodes = group.write();
        if nodes.dead {
            return Err(item);
        }
        if let Some(entry) = nodes.map.get_mut(secondary) {
            self.capacity.fetch_sub(charge - entry.charge, Ordering::AcqRel);
            entry.item = item;
            entry.charge = charge;
            self.promote(entry);
            return Ok(());
        }
        let node = self.list.push_front(NodeRef {
            group: Arc::downgrade(group),
            secondary: secondary.to_string(),
        });
        nodes.map.insert(
            secondary.to_string(),
            Entry {
                item,
                node,
                promotable_after: Instant::now() + self.promote_interval,
                charge,
            },
        );
        self.capacity.fetch_sub(charge, Ordering::AcqRel);
        Ok(())
    }

    // Caller holds the group write lock. A freshly set entry starts with
    // `promotable_after` in the future, so it is not re-promoted here.
    fn promote(&self, entry: &mut Entry<T>) {
        let now = Instant::now();
        if entry.promotable_after <= now && self.list.promote_to_front(entry.node) {
            entry.promotable_after = now + self.promote_interval;
        }
    }

    fn group_for_insert(&self, primary: &str) -> Arc<Group<T>> {
        if let Some(group) = self.index.read().get(primary) {
            return Arc::clone(group);
        }
        let mut index = self.index.write();
        Arc::clone(
            index
                .entry(primary.to_string())
                .or_insert_with(|| Arc::new(Group::new(primary))),
        )
    }

    pub(crate) fn remove(&self, primary: &str) -> bool {
        // Index-delete first: readers never observe an indexed group whose
        // entries are being unlinked.
        let removed = self.index.write().remove(primary);
        let Some(group) = removed else {
            return false;
        };
        let mut credited = 0i64;
        {
            let mut nodes = group.write();
            nodes.dead = true;
            for (_, entry) in nodes.map.drain() {
                self.list.remove(entry.node);
                credited += entry.charge;
            }
        }
        self.capacity.fetch_add(credited, Ordering::AcqRel);
        true
    }

    pub(crate) fn remove_secondary(&self, primary: &str, secondary: &str) -> bool {
        let Some(group) = self.index.read().get(primary).cloned() else {
            return false;
        };
        let now_empty = {
            let mut nodes = group.write();
            let Some(entry) = nodes.map.remove(secondary) else {
                return false;
            };
            self.list.remove(entry.node);
            self.capacity.fetch_add(entry.charge, Ordering::AcqRel);
            !nodes.dead && nodes.map.is_empty()
        };
        if now_empty {
            self.drop_group_if_empty(primary, &group);
        }
        true
    }

    /// Unlinks `group` from the index if it is still the indexed group for
    /// `primary` and still empty. Emptiness is re-checked under the index
    /// write lock: a concurrent `set` may have repopulated the group.
    pub(crate) fn drop_group_if_empty(&self, primary: &str, group: &Arc<Group<T>>) {
        let mut index = self.index.write();
        let same = index
            .get(primary)
            .map_or(false, |current| Arc::ptr_eq(current, group));
        if !same {
            return;
        }
        let mut nodes = group.write();
        if nodes.map.is_empty() && !nodes.dead {
            nodes.dead = true;
            drop(nodes);
            index.remove(primary);
        }
    }

    /// Current usage against the budget: the external probe when one is
    /// configured, the internal byte accounting otherwise.
    pub(crate) fn heap_usage(&self) -> u64 {
        match &self.heap_probe {
            Some(probe) => probe(),
            None => self.used_bytes(),
        }
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        let used = self.total_capacity.load(Ordering::Acquire) - self.capacity.load(Ordering::Acquire);
        used.max(0) as u64
    }

    pub(crate) fn budget(&self) -> u64 {
        self.total_capacity.load(Ordering::Acquire).max(0) as u64
    }

    pub(crate) fn update_capacity(&self, bytes: u64) {
        let new_total = bytes.min(i64::MAX as u64) as i64;
        let old_total = self.total_capacity.swap(new_total, Ordering::AcqRel);
        self.capacity.fetch_add(new_total - old_total, Ordering::AcqRel);
    }

    pub(crate) fn debug_dump(&self, writer: &mut dyn Write) -> io::Result<()> {
        writeln!(writer, "heap used   : {}", self.heap_usage())?;
        writeln!(writer, "budget      : {}", self.budget())?;
        writeln!(writer, "total items : {}", self.list.len())?;
        let index = self.index.read();
        writeln!(writer, "total groups: {}", index.len())?;
        for group in index.values() {
            writeln!(writer, "{}", group.key)?;
            let nodes = group.read();
            for (secondary, entry) in nodes.map.iter() {
                write!(writer, "\t{}\t", secondary)?;
                writer.write_all(&entry.item.debug_bytes())?;
                writeln!(writer)?;
            }
        }
        Ok(())
    }
}

/// In-process two-level LRU cache.
///
/// Thread-safe: all operations take `&self` and are callable from any
/// thread. Construction spawns the background collector, which is stopped
/// and joined when the cache is dropped.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::SystemTime;
/// use grouplru::{CacheItem, Configuration, GroupedLruCache};
///
/// struct Payload(String);
///
/// impl CacheItem for Payload {
///     fn expires_at(&self) -> SystemTime {
///         SystemTime::now()
///     }
///     fn debug_bytes(&self) -> Vec<u8> {
///         self.0.as_bytes().to_vec()
///     }
///     fn size_bytes(&self) -> i64 {
///         self.0.len() as i64
///     }
/// }
///
/// let cache = GroupedLruCache::new(Configuration::new());
/// cache.set("users", "session-1", Payload("hot".into()));
/// let hit: Option<Arc<Payload>> = cache.get("users", "session-1");
/// assert!(hit.is_some());
/// ```
pub struct GroupedLruCache<T: CacheItem + Send + Sync + 'static> {
    shared: Arc<CacheShared<T>>,
    // Stops and joins the worker when the cache is dropped.
    _collector: Collector,
}

impl<T: CacheItem + Send + Sync + 'static> GroupedLruCache<T> {
    /// Creates a cache and starts its collector.
    pub fn new(config: Configuration) -> Self {
        let Configuration {
            size,
            items_to_prune,
            promote_interval,
            warmup,
            poll_interval,
            post_evict_interval,
            callback,
            statsd_address,
            statsd_prefix,
            heap_probe,
            eviction_sink,
        } = config;
        let budget = size.min(i64::MAX as u64) as i64;
        let shared = Arc::new(CacheShared {
            index: RwLock::new(FxHashMap::default()),
            list: ConcurrentRecencyList::new(),
            promote_interval,
            total_capacity: AtomicI64::new(budget),
            capacity: AtomicI64::new(budget),
            gc_factor_cfg: AtomicU32::new(items_to_prune),
            heap_probe,
            callback,
            stats: StatsSink::new(&statsd_address, &statsd_prefix),
            evictions: match eviction_sink {
                Some(writer) => EvictionLogger::with_writer(writer),
                None => EvictionLogger::stdout(),
            },
        });
        let collector = Collector::spawn(
            Arc::downgrade(&shared),
            CollectorTiming {
                warmup,
                poll_interval,
                post_evict_interval,
            },
        );
        Self {
            shared,
            _collector: collector,
        }
    }

    /// Returns the item stored under `(primary, secondary)`, if any.
    ///
    /// Promotes the entry to the head of the recency list at most once per
    /// promotion window; outside the window this is two shared-lock
    /// lookups and never contends with gets for other keys.
    pub fn get(&self, primary: &str, secondary: &str) -> Option<Arc<T>> {
        self.shared.get(primary, secondary)
    }

    /// Stores `item` under `(primary, secondary)`, replacing any existing
    /// entry's payload. Never prunes; eviction is the collector's duty.
    pub fn set(&self, primary: &str, secondary: &str, item: T) {
        self.shared.set(primary, secondary, Arc::new(item));
    }

    /// Like [`set`](Self::set) for an already-shared item.
    pub fn set_arc(&self, primary: &str, secondary: &str, item: Arc<T>) {
        self.shared.set(primary, secondary, item);
    }

    /// Removes the whole group for `primary`. Returns `true` iff the group
    /// existed.
    pub fn remove(&self, primary: &str) -> bool {
        self.shared.remove(primary)
    }

    /// Removes the single entry `(primary, secondary)`, dropping the group
    /// if it becomes empty. Returns `true` iff the entry existed.
    pub fn remove_secondary(&self, primary: &str, secondary: &str) -> bool {
        self.shared.remove_secondary(primary, secondary)
    }

    /// Writes heap statistics and a full textual listing of the cache.
    ///
    /// Holds the index shared lock for the duration and each group's
    /// shared lock in turn; may be slow on a large cache. Diagnostic use
    /// only.
    pub fn debug_dump(&self, writer: &mut dyn Write) -> io::Result<()> {
        self.shared.debug_dump(writer)
    }

    /// Sets the collector's configured prune batch size. Zero is ignored;
    /// the sampling loop alone decides when eviction is active.
    pub fn configure_gc_factor(&self, factor: u32) {
        if factor > 0 {
            self.shared.gc_factor_cfg.store(factor, Ordering::Release);
        }
    }

    /// Moves the byte budget to `bytes`, shifting the remaining capacity
    /// by the same delta.
    pub fn update_capacity(&self, bytes: u64) {
        self.shared.update_capacity(bytes);
    }

    /// Remaining byte capacity (may be negative under pressure).
    pub fn capacity(&self) -> i64 {
        self.shared.capacity.load(Ordering::Acquire)
    }

    /// Configured byte budget.
    pub fn total_capacity(&self) -> i64 {
        self.shared.total_capacity.load(Ordering::Acquire)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.shared.list.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.shared.index.read().len()
    }

    /// Validates every cross-structure invariant. Only meaningful when the
    /// cache is quiescent (no in-flight operations or active collector
    /// batch).
    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.shared.list.debug_validate_invariants();
        let index = self.shared.index.read();
        let mut total = 0usize;
        for (key, group) in index.iter() {
            let nodes = group.read();
            assert!(!nodes.dead, "tombstoned group {:?} still indexed", key);
            assert!(!nodes.map.is_empty(), "empty group {:?} still indexed", key);
            for (secondary, entry) in nodes.map.iter() {
                assert!(
                    self.shared.list.contains(entry.node),
                    "entry {:?}/{:?} not linked",
                    key,
                    secondary
                );
                assert!(entry.charge >= ENTRY_OVERHEAD);
            }
            total += nodes.map.len();
        }
        assert_eq!(total, self.shared.list.len(), "list and index disagree");
    }
}
