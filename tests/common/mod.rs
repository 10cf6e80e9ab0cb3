//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from any test's top-level file.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use vigil::{KvdbManager, MemoryMetricsScope};

/// Route tracing output through the test harness. Safe to call from every
/// test; only the first call in a binary installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Manager rooted in a fresh temp dir, initialized and ready.
pub struct TestVigil {
    pub dir: TempDir,
    pub manager: KvdbManager,
}

impl TestVigil {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let manager = KvdbManager::new(dir.path());
        manager.initialize().expect("failed to initialize manager");
        TestVigil { dir, manager }
    }

    /// Same, with an in-memory metrics scope wired in for assertions.
    pub fn with_metrics() -> (Self, Arc<MemoryMetricsScope>) {
        init_tracing();
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let metrics = Arc::new(MemoryMetricsScope::new());
        let manager = KvdbManager::with_metrics(dir.path(), metrics.clone());
        manager.initialize().expect("failed to initialize manager");
        (TestVigil { dir, manager }, metrics)
    }

    /// Create a database and load it with key/value pairs.
    pub fn seed_db(&self, name: &str, pairs: &[(&[u8], &[u8])]) {
        self.manager.create_db(name).expect("create_db failed");
        let handle = self
            .manager
            .get_handler(name, "seeder")
            .expect("get_handler failed");
        for (key, value) in pairs {
            handle.set(key, value).expect("set failed");
        }
        handle.close().expect("close failed");
    }
}
