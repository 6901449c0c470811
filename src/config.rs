//! Cache configuration.
//!
//! A plain value object consumed by
//! [`GroupedLruCache::new`](crate::cache::GroupedLruCache::new). Options
//! mirror the deployment knobs of the collector (budget, batch size,
//! intervals), the promotion throttle, and the observability sinks.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Invoked after each eviction batch while the collector is active.
pub type GcCallback = Arc<dyn Fn() + Send + Sync>;

/// External heap-usage probe, read by the collector each tick.
///
/// When absent the collector falls back to the cache's internal byte
/// accounting (`total_capacity - capacity`).
pub type HeapProbe = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Configuration for a [`GroupedLruCache`](crate::cache::GroupedLruCache).
///
/// ```
/// use grouplru::config::Configuration;
///
/// let config = Configuration::new()
///     .with_size(256 * 1024 * 1024)
///     .with_items_to_prune(500);
/// ```
pub struct Configuration {
    pub(crate) size: u64,
    pub(crate) items_to_prune: u32,
    pub(crate) promote_interval: Duration,
    pub(crate) warmup: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) post_evict_interval: Duration,
    pub(crate) callback: Option<GcCallback>,
    pub(crate) statsd_address: String,
    pub(crate) statsd_prefix: String,
    pub(crate) heap_probe: Option<HeapProbe>,
    pub(crate) eviction_sink: Option<Box<dyn Write + Send>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            size: 50 * 1024 * 1024 * 1024,
            items_to_prune: 10_000,
            promote_interval: Duration::from_secs(600),
            warmup: Duration::from_secs(30),
            poll_interval: Duration::from_secs(15),
            post_evict_interval: Duration::from_secs(10),
            callback: None,
            statsd_address: "localhost:8124".to_string(),
            statsd_prefix: String::new(),
            heap_probe: None,
            eviction_sink: None,
        }
    }
}

impl Configuration {
    /// Creates a configuration with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the byte budget above which the collector starts pruning.
    /// Defaults to 50 GiB.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Sets the tail-prune batch size. Zero is ignored. Defaults to 10 000.
    pub fn with_items_to_prune(mut self, items_to_prune: u32) -> Self {
        if items_to_prune > 0 {
            self.items_to_prune = items_to_prune;
        }
        self
    }

    /// Sets the minimum interval between promotions of the same entry.
    /// Defaults to 10 minutes.
    pub fn with_promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }

    /// Sets the collector's initial sleep before it starts sampling
    /// pressure. Defaults to 30 seconds.
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Sets the sleep between pressure checks while under budget.
    /// Defaults to 15 seconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the sleep after an eviction batch. Defaults to 10 seconds.
    pub fn with_post_evict_interval(mut self, interval: Duration) -> Self {
        self.post_evict_interval = interval;
        self
    }

    /// Registers a callback invoked after each eviction batch.
    pub fn with_callback(mut self, callback: GcCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Sets the statsd destination and metric prefix.
    /// Defaults to `localhost:8124` with an empty prefix.
    pub fn with_statsd(mut self, address: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.statsd_address = address.into();
        self.statsd_prefix = prefix.into();
        self
    }

    /// Supplies an external heap-usage probe for the collector.
    pub fn with_heap_probe(mut self, probe: HeapProbe) -> Self {
        self.heap_probe = Some(probe);
        self
    }

    /// Redirects the per-eviction JSON records away from stdout.
    pub fn with_eviction_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.eviction_sink = Some(sink);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Configuration::new();
        assert_eq!(config.size, 50 * 1024 * 1024 * 1024);
        assert_eq!(config.items_to_prune, 10_000);
        assert_eq!(config.promote_interval, Duration::from_secs(600));
        assert_eq!(config.warmup, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.post_evict_interval, Duration::from_secs(10));
        assert_eq!(config.statsd_address, "localhost:8124");
        assert_eq!(config.statsd_prefix, "");
        assert!(config.callback.is_none());
        assert!(config.heap_probe.is_none());
    }

    #[test]
    fn builder_overrides_settings() {
        let config = Configuration::new()
            .with_size(1024)
            .with_items_to_prune(7)
            .with_promote_interval(Duration::from_secs(1))
            .with_statsd("127.0.0.1:9999", "cache.");
        assert_eq!(config.size, 1024);
        assert_eq!(config.items_to_prune, 7);
        assert_eq!(config.promote_interval, Duration::from_secs(1));
        assert_eq!(config.statsd_address, "127.0.0.1:9999");
        assert_eq!(config.statsd_prefix, "cache.");
    }

    #[test]
    fn zero_batch_size_is_ignored() {
        let config = Configuration::new().with_items_to_prune(0);
        assert_eq!(config.items_to_prune, 10_000);
    }
}
