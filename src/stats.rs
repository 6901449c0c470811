//! Observability shim: statsd emission and structured eviction records.
//!
//! Both sinks sit outside the core locking discipline; the collector calls
//! them only after its pruning critical sections. A statsd socket that
//! cannot be created degrades the sink to a no-op so the cache itself never
//! fails on observability problems.

use std::io::{self, Write};
use std::net::UdpSocket;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

/// statsd sink for the collector's counters and gauges.
///
/// Emits the plain statsd line protocol over UDP: the `evict` counter
/// (+1 per evicted entry) and the `memEvicted` gauge (byte delta per
/// batch), each prefixed with the configured metric prefix.
#[derive(Debug)]
pub struct StatsSink {
    socket: Option<UdpSocket>,
    prefix: String,
}

impl StatsSink {
    /// Creates a sink sending to `address` (host:port).
    ///
    /// If the socket cannot be created or the address does not resolve,
    /// the failure is logged once and the sink becomes a no-op.
    pub fn new(address: &str, prefix: &str) -> Self {
        let socket = UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
            socket.connect(address)?;
            Ok(socket)
        });
        let socket = match socket {
            Ok(socket) => Some(socket),
            Err(err) => {
                warn!(%err, address, "statsd socket unavailable, metrics disabled");
                None
            },
        };
        Self {
            socket,
            prefix: prefix.to_string(),
        }
    }

    /// Creates a disabled sink.
    pub fn disabled() -> Self {
        Self {
            socket: None,
            prefix: String::new(),
        }
    }

    /// Increments the `evict` counter by `count`.
    pub fn evict(&self, count: u64) {
        if count > 0 {
            self.send(&format!("{}evict:{}|c", self.prefix, count));
        }
    }

    /// Records the `memEvicted` gauge in bytes.
    pub fn mem_evicted(&self, bytes: u64) {
        self.send(&format!("{}memEvicted:{}|g", self.prefix, bytes));
    }

    fn send(&self, payload: &str) {
        // Transient send failures are dropped; metrics are best-effort.
        if let Some(socket) = &self.socket {
            let _ = socket.send(payload.as_bytes());
        }
    }
}

/// One structured record per evicted entry.
#[derive(Debug, Serialize)]
pub struct EvictionRecord {
    pub event: String,
    pub source: String,
    pub timestamp: String,
    pub node: String,
    pub group: String,
    pub memory_evicted: f64,
}

impl EvictionRecord {
    /// Builds a record stamped with the current time.
    pub fn new(group: &str, node: &str, memory_evicted: f64) -> Self {
        Self {
            event: "cacheEvicted".to_string(),
            source: "lrucache".to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            node: node.to_string(),
            group: group.to_string(),
            memory_evicted,
        }
    }
}

/// Writes eviction records as one JSON object per line.
pub struct EvictionLogger {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl EvictionLogger {
    /// Logger writing to stdout.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Logger writing to an arbitrary sink.
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Serializes and writes one record. Write failures are dropped;
    /// eviction logging is best-effort.
    pub fn log(&self, record: &EvictionRecord) {
        if let Ok(json) = serde_json::to_string(record) {
            let line = unescape_ampersands(&json);
            let mut writer = self.writer.lock();
            let _ = writeln!(writer, "{}", line);
        }
    }
}

// Downstream log consumers expect a literal `&` in key material, not the
// JSON unicode escape.
fn unescape_ampersands(s: &str) -> String {
    s.replace("\\u0026", "&")
}
