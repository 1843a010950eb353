//! Counter collection for queue operations.
//!
//! Queues report what they do through the [`MetricsCollector`] trait. The
//! trait is implemented by the infrastructure layer (Prometheus, StatsD, ...)
//! so the queue engines stay free of any particular metrics backend.
//!
//! # Counters Emitted
//!
//! - `queue.<name>.sent_messages`: message appended to a queue
//! - `queue.<name>.received_messages`: message leased by a consumer
//! - `queue.<name>.dead_messages`: message moved to dead letter
//!
//! # Examples
//!
//! ```rust
//! use messaging_runtime::monitoring::{InMemoryMetricsCollector, MetricsCollector};
//!
//! let metrics = InMemoryMetricsCollector::new();
//! metrics.increment_one("queue.orders.sent_messages");
//! assert_eq!(metrics.count("queue.orders.sent_messages"), 1);
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;

/// Counter sink used by queue implementations.
///
/// Implementations must never fail: recording is best-effort and must not
/// affect the queue operation that triggered it. All methods take `&self` so
/// a collector can be shared as `Arc<dyn MetricsCollector>`.
pub trait MetricsCollector: Send + Sync {
    /// Add `value` to the named counter
    fn increment(&self, name: &str, value: i64);

    /// Add one to the named counter
    fn increment_one(&self, name: &str) {
        self.increment(name, 1);
    }
}

/// Collector that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn increment(&self, _name: &str, _value: i64) {
        // No-op
    }
}

/// Collector that keeps counters in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    counters: RwLock<HashMap<String, i64>>,
}

impl InMemoryMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero when never incremented
    pub fn count(&self, name: &str) -> i64 {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).copied().unwrap_or(0)
    }

    /// Snapshot of all counters
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reset all counters
    pub fn clear(&self) {
        self.counters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn increment(&self, name: &str, value: i64) {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        *counters.entry(name.to_string()).or_insert(0) += value;
    }
}

/// Collector that writes every increment as a debug log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetricsCollector;

impl MetricsCollector for LogMetricsCollector {
    fn increment(&self, name: &str, value: i64) {
        debug!(counter = %name, value = value, "Counter incremented");
    }
}
