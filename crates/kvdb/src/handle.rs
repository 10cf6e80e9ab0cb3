//! Scoped reference-counted database handles.
//!
//! A [`KvdbHandle`] is the capability one consumer (a "scope") holds on one
//! database. Key operations go straight to the storage engine; the manager
//! is only involved again when the handle is released, which must happen
//! exactly once — explicitly through [`close`](KvdbHandle::close) or
//! implicitly at drop.

use crate::manager::ManagerInner;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use vigil_core::{Error, MetricsScope, Result};
use vigil_storage::{PrefixScan, StorageEngine};

/// Capability granting key-level access to one database for one scope.
///
/// Exclusively owned by its requester. Every operation after a release fails
/// with `InvalidHandle`; a second release fails the same way without
/// touching the reference count. All operations report per-database call,
/// error, and latency counters through the manager's metrics scope.
pub struct KvdbHandle {
    name: String,
    scope: String,
    engine: Arc<StorageEngine>,
    manager: Arc<ManagerInner>,
    metrics: Arc<dyn MetricsScope>,
    released: AtomicBool,
}

impl KvdbHandle {
    pub(crate) fn issue(
        manager: Arc<ManagerInner>,
        metrics: Arc<dyn MetricsScope>,
        engine: Arc<StorageEngine>,
        name: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        KvdbHandle {
            name: name.into(),
            scope: scope.into(),
            engine,
            manager,
            metrics,
            released: AtomicBool::new(false),
        }
    }

    /// Database this handle is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumer scope this handle was issued for.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// True once the handle has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Read the value stored under `key`.
    ///
    /// Fails with `KeyNotFound` when absent.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let started = Instant::now();
        let result = self.get_inner(key);
        self.observe("get", started, result)
    }

    fn get_inner(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_live()?;
        self.engine
            .get(key)?
            .ok_or_else(|| Error::key_not_found(key))
    }

    /// Upsert `key` to `value`, overwriting any existing value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let started = Instant::now();
        let result = self.ensure_live().and_then(|()| self.engine.put(key, value));
        self.observe("set", started, result)
    }

    /// Remove `key`.
    ///
    /// Fails with `KeyNotFound` when absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let started = Instant::now();
        let result = self.delete_inner(key);
        self.observe("delete", started, result)
    }

    fn delete_inner(&self, key: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if self.engine.delete(key)? {
            Ok(())
        } else {
            Err(Error::key_not_found(key))
        }
    }

    /// True if `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let started = Instant::now();
        let result = self.ensure_live().and_then(|()| self.engine.contains(key));
        self.observe("contains", started, result)
    }

    /// Ordered lazy scan of every pair whose key starts with `prefix`.
    ///
    /// An empty prefix walks the whole database (the administrative dump
    /// path). The scan stays valid for the lifetime of the handle borrow.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Result<PrefixScan<'_>> {
        let started = Instant::now();
        let result = self
            .ensure_live()
            .map(|()| self.engine.scan_prefix(prefix));
        self.observe("scan", started, result)
    }

    /// Release the handle, decrementing the database's holder count.
    ///
    /// The first call releases; every later call fails with `InvalidHandle`
    /// and leaves the count untouched. If this release brings a
    /// pending-delete database to zero holders, the physical removal
    /// completes before `close` returns.
    pub fn close(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidHandle {
                name: self.name.clone(),
                scope: self.scope.clone(),
            });
        }
        self.manager.release_scoped(&self.name, &self.scope)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::InvalidHandle {
                name: self.name.clone(),
                scope: self.scope.clone(),
            });
        }
        Ok(())
    }

    fn observe<T>(&self, op: &str, started: Instant, result: Result<T>) -> Result<T> {
        let series = format!("kvdb.{}.{op}", self.name);
        self.metrics.increment(&format!("{series}.calls"), 1);
        self.metrics.increment(
            &format!("{series}.micros"),
            started.elapsed().as_micros() as u64,
        );
        if result.is_err() {
            self.metrics.increment(&format!("{series}.errors"), 1);
        }
        result
    }
}

impl Drop for KvdbHandle {
    fn drop(&mut self) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.close() {
            warn!(
                target: "vigil::kvdb",
                db = %self.name,
                scope = %self.scope,
                error = %e,
                "implicit handle release at drop failed"
            );
        }
    }
}

impl fmt::Debug for KvdbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvdbHandle")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::KvdbManager;
    use std::sync::Arc;
    use tempfile::TempDir;
    use vigil_core::MemoryMetricsScope;

    fn setup() -> (TempDir, KvdbManager, KvdbHandle) {
        let tmp = TempDir::new().unwrap();
        let manager = KvdbManager::new(tmp.path().join("kvdb"));
        manager.initialize().unwrap();
        manager.create_db("agents").unwrap();
        let handle = manager.get_handler("agents", "test").unwrap();
        (tmp, manager, handle)
    }

    #[test]
    fn test_set_get_roundtrip() {
        let (_tmp, _manager, handle) = setup();
        handle.set(b"agent-007", b"{\"os\":\"linux\"}").unwrap();
        assert_eq!(
            handle.get(b"agent-007").unwrap(),
            b"{\"os\":\"linux\"}".to_vec()
        );
    }

    #[test]
    fn test_get_missing_key_fails() {
        let (_tmp, _manager, handle) = setup();
        let err = handle.get(b"missing").unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }));
    }

    #[test]
    fn test_set_overwrites() {
        let (_tmp, _manager, handle) = setup();
        handle.set(b"k", b"old").unwrap();
        handle.set(b"k", b"new").unwrap();
        assert_eq!(handle.get(b"k").unwrap(), b"new".to_vec());
    }

    #[test]
    fn test_read_your_writes_within_handle() {
        let (_tmp, _manager, handle) = setup();
        for i in 0..50u32 {
            let key = format!("k{i}");
            handle.set(key.as_bytes(), &i.to_be_bytes()).unwrap();
            assert_eq!(handle.get(key.as_bytes()).unwrap(), i.to_be_bytes());
        }
    }

    #[test]
    fn test_delete_present_and_absent() {
        let (_tmp, _manager, handle) = setup();
        handle.set(b"k", b"v").unwrap();
        handle.delete(b"k").unwrap();
        assert!(matches!(
            handle.delete(b"k"),
            Err(Error::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_contains() {
        let (_tmp, _manager, handle) = setup();
        handle.set(b"k", b"v").unwrap();
        assert!(handle.contains(b"k").unwrap());
        assert!(!handle.contains(b"other").unwrap());
    }

    #[test]
    fn test_iter_prefix_through_handle() {
        let (_tmp, _manager, handle) = setup();
        handle.set(b"ip-10.0.0.1", b"allow").unwrap();
        handle.set(b"ip-10.0.0.2", b"deny").unwrap();
        handle.set(b"host-a", b"x").unwrap();

        let pairs: Vec<_> = handle
            .iter_prefix(b"ip-")
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|(k, _)| k.starts_with(b"ip-")));
    }

    #[test]
    fn test_empty_prefix_dumps_everything() {
        let (_tmp, _manager, handle) = setup();
        handle.set(b"a", b"1").unwrap();
        handle.set(b"b", b"2").unwrap();
        let pairs: Vec<_> = handle
            .iter_prefix(b"")
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (_tmp, _manager, handle) = setup();
        handle.set(b"k", b"v").unwrap();
        handle.close().unwrap();

        assert!(matches!(handle.get(b"k"), Err(Error::InvalidHandle { .. })));
        assert!(matches!(
            handle.set(b"k", b"v2"),
            Err(Error::InvalidHandle { .. })
        ));
        assert!(matches!(
            handle.contains(b"k"),
            Err(Error::InvalidHandle { .. })
        ));
        assert!(matches!(
            handle.iter_prefix(b""),
            Err(Error::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_double_close_fails_without_underflow() {
        let (_tmp, manager, handle) = setup();
        handle.close().unwrap();
        let err = handle.close().unwrap_err();
        assert!(matches!(err, Error::InvalidHandle { .. }));

        // The count was released exactly once: a fresh handle still works
        // and brings the count back to one.
        let fresh = manager.get_handler("agents", "test").unwrap();
        fresh.close().unwrap();
    }

    #[test]
    fn test_release_through_manager() {
        let (_tmp, manager, handle) = setup();
        manager.release_handle(&handle).unwrap();
        assert!(handle.is_released());
        assert!(matches!(
            manager.release_handle(&handle),
            Err(Error::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_metrics_count_calls_and_errors() {
        let tmp = TempDir::new().unwrap();
        let metrics = Arc::new(MemoryMetricsScope::new());
        let manager = KvdbManager::with_metrics(tmp.path().join("kvdb"), metrics.clone());
        manager.initialize().unwrap();
        manager.create_db("agents").unwrap();
        let handle = manager.get_handler("agents", "test").unwrap();

        handle.set(b"k", b"v").unwrap();
        handle.get(b"k").unwrap();
        let _ = handle.get(b"missing");
        let _ = handle.iter_prefix(b"");

        assert_eq!(metrics.counter("kvdb.agents.set.calls"), 1);
        assert_eq!(metrics.counter("kvdb.agents.get.calls"), 2);
        assert_eq!(metrics.counter("kvdb.agents.get.errors"), 1);
        assert_eq!(metrics.counter("kvdb.agents.scan.calls"), 1);
        assert_eq!(metrics.counter("kvdb.agents.set.errors"), 0);
    }

    #[test]
    fn test_handles_are_independent() {
        let (_tmp, manager, first) = setup();
        let second = manager.get_handler("agents", "other").unwrap();

        first.set(b"k", b"from-first").unwrap();
        assert_eq!(second.get(b"k").unwrap(), b"from-first".to_vec());

        first.close().unwrap();
        // Releasing one handle never invalidates another.
        assert_eq!(second.get(b"k").unwrap(), b"from-first".to_vec());
        second.close().unwrap();
    }

    #[test]
    fn test_debug_does_not_leak_engine_details() {
        let (_tmp, _manager, handle) = setup();
        let text = format!("{handle:?}");
        assert!(text.contains("agents"));
        assert!(text.contains("test"));
    }
}
