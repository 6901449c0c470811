//! Background eviction worker.
//!
//! A single long-running thread samples heap pressure and, while usage sits
//! above the budget, prunes batches of recency-list tail nodes: each pruned
//! node is detached from its group, empty groups are dropped from the index
//! (emptiness re-checked under the index write lock), one structured record
//! is emitted per evicted entry, counters are bumped, and the user callback
//! fires after the batch.
//!
//! The prune batch size is the *gc factor*. The sampling loop toggles the
//! active factor between zero and the configured value with hysteresis:
//! once eviction is active it stays active until usage drops below 90% of
//! the budget. `set` never prunes; eviction is entirely this worker's duty.
//!
//! The worker holds only a `Weak` reference to the cache state, finishes
//! the batch in flight when signalled, and is joined when the owning cache
//! is dropped. Transient failures never abort the loop; it logs and retries
//! on the next tick.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::cache::{CacheShared, NodeRef};
use crate::ds::NodeId;
use crate::item::CacheItem;
use crate::stats::EvictionRecord;

#[derive(Debug, Clone, Copy)]
pub(crate) struct CollectorTiming {
    pub warmup: Duration,
    pub poll_interval: Duration,
    pub post_evict_interval: Duration,
}

#[derive(Debug, Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    signal: Condvar,
}

/// Handle to the collector thread. Stopping finishes the batch in flight
/// and joins the worker; dropping stops.
#[derive(Debug)]
pub(crate) struct Collector {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl Collector {
    pub fn spawn<T>(target: Weak<CacheShared<T>>, timing: CollectorTiming) -> Self
    where
        T: CacheItem + Send + Sync + 'static,
    {
        let shutdown = Arc::new(Shutdown::default());
        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("grouplru-collector".to_string())
            .spawn(move || worker_loop(target, timing, worker_shutdown));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(%err, "failed to spawn collector thread, eviction disabled");
                None
            },
        };
        Self { shutdown, handle }
    }

    pub fn stop(&mut self) {
        {
            let mut stopped = self.shutdown.stopped.lock();
            *stopped = true;
        }
        self.shutdown.signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.stop();
    }
}

// Returns false when shutdown was requested before or during the sleep.
fn sleep_unless_stopped(shutdown: &Shutdown, duration: Duration) -> bool {
    let mut stopped = shutdown.stopped.lock();
    if *stopped {
        return false;
    }
    shutdown.signal.wait_for(&mut stopped, duration);
    !*stopped
}

fn worker_loop<T: CacheItem>(
    target: Weak<CacheShared<T>>,
    timing: CollectorTiming,
    shutdown: Arc<Shutdown>,
) {
    if !sleep_unless_stopped(&shutdown, timing.warmup) {
        return;
    }
    let mut active: u32 = 0;
    loop {
        let Some(cache) = target.upgrade() else { return };
        let usage = cache.heap_usage();
        let budget = cache.budget();
        let configured = cache.gc_factor_cfg.load(Ordering::Acquire);
        let next = next_factor(active, configured, usage, budget);
        if next != active {
            debug!(usage, budget, factor = next, "gc factor changed");
            active = next;
        }

        if active == 0 {
            drop(cache);
            if !sleep_unless_stopped(&shutdown, timing.poll_interval) {
                return;
            }
            continue;
        }

        let evicted = run_eviction_pass(&cache, active as usize);
        trace!(evicted, "eviction batch complete");
        if let Some(callback) = &cache.callback {
            callback();
        }
        drop(cache);
        if !sleep_unless_stopped(&shutdown, timing.post_evict_interval) {
            return;
        }
    }
}

/// The sampling rule: over budget enables the configured factor, and once
/// active it stays active until usage falls below 90% of the budget.
fn next_factor(active: u32, configured: u32, usage: u64, budget: u64) -> u32 {
    if usage >= budget {
        configured
    } else if active != 0 && usage < (budget as f64 * 0.9) as u64 {
        0
    } else {
        active
    }
}

/// Prunes up to `batch_size` tail nodes and detaches each from its group.
/// Returns the number of entries actually evicted.
pub(crate) fn run_eviction_pass<T: CacheItem>(cache: &CacheShared<T>, batch_size: usize) -> u64 {
    let usage_before = cache.heap_usage();
    let batch = cache.list.prune_tail(batch_size);
    if batch.is_empty() {
        return 0;
    }
    let mut evicted = 0u64;
    for (node_id, node) in batch {
        if evict_node(cache, node_id, &node) {
            evicted += 1;
        }
    }
    let usage_after = cache.heap_usage();
    cache.stats.evict(evicted);
    cache
        .stats
        .mem_evicted(usage_before.saturating_sub(usage_after));
    evicted
}

// The node is already detached from the list; deleting the entry from its
// group is the ownership drop. Guards against the pair having been removed
// and re-set since the prune: a fresh entry carries a different node id and
// must survive.
fn evict_node<T: CacheItem>(cache: &CacheShared<T>, node_id: NodeId, node: &NodeRef<T>) -> bool {
    let Some(group) = node.group.upgrade() else {
        return false;
    };
    let usage_prev = cache.heap_usage();
    let mut removed = None;
    let mut now_empty = false;
    {
        let mut nodes = group.write();
        if !nodes.dead {
            let same_entry = nodes.map.get(&node.secondary).map(|e| e.node) == Some(node_id);
            if same_entry {
                removed = nodes.map.remove(&node.secondary);
            }
            now_empty = nodes.map.is_empty();
        }
    }
    let Some(entry) = removed else {
        return false;
    };
    cache.capacity.fetch_add(entry.charge, Ordering::AcqRel);
    drop(entry);
    if now_empty {
        cache.drop_group_if_empty(&group.key, &group);
    }
    let usage_now = cache.heap_usage();
    let delta = usage_prev.abs_diff(usage_now) as f64 / 1000.0;
    cache
        .evictions
        .log(&EvictionRecord::new(&group.key, &node.secondary, delta));
    true
}
