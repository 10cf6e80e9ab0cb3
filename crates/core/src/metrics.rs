//! Metrics reporting interface.
//!
//! The manager and handles report counters and gauges through an injected
//! [`MetricsScope`]; the crate does not own any metrics storage. Series names
//! are dotted strings prefixed per database, e.g. `kvdb.agents.handles` or
//! `kvdb.agents.get.calls`.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Sink for counters and gauges reported by the manager and handles.
///
/// Object-safe so embedders can hand the manager an `Arc<dyn MetricsScope>`
/// wired to whatever metrics system the host process runs.
pub trait MetricsScope: Send + Sync {
    /// Add `delta` to the monotonic counter `name`.
    fn increment(&self, name: &str, delta: u64);

    /// Set gauge `name` to `value`.
    fn set_gauge(&self, name: &str, value: u64);
}

/// A metrics scope that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricsScope;

impl MetricsScope for NullMetricsScope {
    fn increment(&self, _name: &str, _delta: u64) {}

    fn set_gauge(&self, _name: &str, _value: u64) {}
}

/// An in-memory metrics scope backed by lock-protected maps.
///
/// Used by the test suites and by embedders that poll metrics instead of
/// pushing them.
#[derive(Debug, Default)]
pub struct MemoryMetricsScope {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, u64>>,
}

impl MemoryMetricsScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, 0 if it was never incremented.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Last value set on a gauge, `None` if it was never set.
    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.lock().get(name).copied()
    }

    /// Snapshot of all counters.
    pub fn counters_snapshot(&self) -> HashMap<String, u64> {
        self.counters.lock().clone()
    }

    /// Snapshot of all gauges.
    pub fn gauges_snapshot(&self) -> HashMap<String, u64> {
        self.gauges.lock().clone()
    }
}

impl MetricsScope for MemoryMetricsScope {
    fn increment(&self, name: &str, delta: u64) {
        let mut counters = self.counters.lock();
        let entry = counters.entry(name.to_string()).or_insert(0);
        *entry = entry.saturating_add(delta);
    }

    fn set_gauge(&self, name: &str, value: u64) {
        self.gauges.lock().insert(name.to_string(), value);
    }
}
