//! Per-database registry bookkeeping.
//!
//! Each registered database is one [`RegistryEntry`]: the storage engine it
//! owns plus the reference count, lifecycle state, and per-scope handle
//! census, all guarded by one per-entry lock. Structural transitions are
//! explicit functions returning an outcome the manager acts on, so the state
//! machine is testable without touching the filesystem paths that follow it.
//!
//! Uses `parking_lot::Mutex` so a panicking holder cannot poison the entry
//! for every later caller.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use vigil_core::{Error, Result};
use vigil_storage::StorageEngine;

/// Lifecycle state of a registered database.
///
/// Transitions: `Open -> PendingDelete -> Removed`, or `Open -> Removed`
/// directly when a delete finds no holders. `Removed` is terminal; it covers
/// the interval where the directory is being destroyed with no lock held and
/// the name must stay reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    /// Accepting new handles.
    Open,
    /// Marked for deletion: existing handles keep working, new ones are
    /// refused, physical removal happens at the last release.
    PendingDelete,
    /// Mid-destruction: nothing is issued, the entry only awaits erasure.
    Removed,
}

/// What a release did to the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Handle returned; the database stays registered.
    Released {
        /// Holders left after this release.
        remaining: u32,
    },
    /// This release brought a pending-delete database to zero holders. The
    /// entry is now `Removed`; the caller must destroy the directory and
    /// erase the entry.
    DestroyNow,
}

/// What marking an entry for deletion found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No holders; the entry is now `Removed` and the caller destroys it
    /// immediately.
    DestroyNow,
    /// Holders remain; the entry is now `PendingDelete`.
    Deferred {
        /// Holders blocking physical removal.
        refcount: u32,
        /// Which scopes hold them, for the deferral log line.
        scopes: HashMap<String, u32>,
    },
    /// The entry was already `PendingDelete`; the mark is in place.
    AlreadyPending,
    /// The entry is mid-removal on another thread.
    Gone,
}

#[derive(Debug)]
struct EntryState {
    refcount: u32,
    state: DbState,
    scopes: HashMap<String, u32>,
}

/// One registered database: engine plus lifecycle bookkeeping.
#[derive(Debug)]
pub struct RegistryEntry {
    name: String,
    engine: Arc<StorageEngine>,
    state: Mutex<EntryState>,
}

impl RegistryEntry {
    /// Register a freshly opened engine: no holders, state `Open`.
    pub fn new(name: impl Into<String>, engine: StorageEngine) -> Self {
        RegistryEntry {
            name: name.into(),
            engine: Arc::new(engine),
            state: Mutex::new(EntryState {
                refcount: 0,
                state: DbState::Open,
                scopes: HashMap::new(),
            }),
        }
    }

    /// Database name this entry is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared engine backing this database.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Account for a new handle issued to `scope`.
    ///
    /// Fails with `PendingDeletion` unless the entry is `Open`. On success
    /// returns the new reference count.
    pub fn acquire(&self, scope: &str) -> Result<u32> {
        let mut state = self.state.lock();
        if state.state != DbState::Open {
            return Err(Error::PendingDeletion {
                name: self.name.clone(),
            });
        }
        state.refcount += 1;
        *state.scopes.entry(scope.to_string()).or_insert(0) += 1;
        Ok(state.refcount)
    }

    /// Account for a handle returned by `scope`.
    ///
    /// Saturates at zero rather than underflowing; the handle layer already
    /// refuses double releases, this keeps the count sane even if it did not.
    pub fn release(&self, scope: &str) -> ReleaseOutcome {
        let mut state = self.state.lock();
        state.refcount = state.refcount.saturating_sub(1);
        if let Some(count) = state.scopes.get_mut(scope) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.scopes.remove(scope);
            }
        }
        if state.refcount == 0 && state.state == DbState::PendingDelete {
            state.state = DbState::Removed;
            ReleaseOutcome::DestroyNow
        } else {
            ReleaseOutcome::Released {
                remaining: state.refcount,
            }
        }
    }

    /// Mark the entry for deletion.
    pub fn begin_delete(&self) -> DeleteOutcome {
        let mut state = self.state.lock();
        match state.state {
            DbState::Open if state.refcount == 0 => {
                state.state = DbState::Removed;
                DeleteOutcome::DestroyNow
            }
            DbState::Open => {
                state.state = DbState::PendingDelete;
                DeleteOutcome::Deferred {
                    refcount: state.refcount,
                    scopes: state.scopes.clone(),
                }
            }
            DbState::PendingDelete => DeleteOutcome::AlreadyPending,
            DbState::Removed => DeleteOutcome::Gone,
        }
    }

    /// Current holder count.
    pub fn refcount(&self) -> u32 {
        self.state.lock().refcount
    }

    /// Current lifecycle state.
    pub fn db_state(&self) -> DbState {
        self.state.lock().state
    }

    /// Snapshot of the per-scope handle census, for leak diagnostics.
    pub fn scope_census(&self) -> HashMap<String, u32> {
        self.state.lock().scopes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;
    use vigil_storage::SyncMode;

    fn setup() -> (TempDir, RegistryEntry) {
        let tmp = TempDir::new().unwrap();
        let engine = StorageEngine::open(&tmp.path().join("db"), SyncMode::Buffered).unwrap();
        (tmp, RegistryEntry::new("agents", engine))
    }

    #[test]
    fn test_new_entry_is_open_with_no_holders() {
        let (_tmp, entry) = setup();
        assert_eq!(entry.db_state(), DbState::Open);
        assert_eq!(entry.refcount(), 0);
        assert!(entry.scope_census().is_empty());
    }

    #[test]
    fn test_acquire_counts_per_scope() {
        let (_tmp, entry) = setup();
        assert_eq!(entry.acquire("enrich").unwrap(), 1);
        assert_eq!(entry.acquire("enrich").unwrap(), 2);
        assert_eq!(entry.acquire("dump").unwrap(), 3);

        let census = entry.scope_census();
        assert_eq!(census.get("enrich"), Some(&2));
        assert_eq!(census.get("dump"), Some(&1));
    }

    #[test]
    fn test_release_drops_scope_entry_at_zero() {
        let (_tmp, entry) = setup();
        entry.acquire("enrich").unwrap();
        entry.acquire("enrich").unwrap();

        assert_eq!(
            entry.release("enrich"),
            ReleaseOutcome::Released { remaining: 1 }
        );
        assert_eq!(entry.scope_census().get("enrich"), Some(&1));

        assert_eq!(
            entry.release("enrich"),
            ReleaseOutcome::Released { remaining: 0 }
        );
        assert!(entry.scope_census().is_empty());
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let (_tmp, entry) = setup();
        assert_eq!(
            entry.release("phantom"),
            ReleaseOutcome::Released { remaining: 0 }
        );
        assert_eq!(entry.refcount(), 0);
    }

    #[test]
    fn test_begin_delete_idle_entry_destroys_now() {
        let (_tmp, entry) = setup();
        assert_eq!(entry.begin_delete(), DeleteOutcome::DestroyNow);
        assert_eq!(entry.db_state(), DbState::Removed);
    }

    #[test]
    fn test_begin_delete_with_holders_defers() {
        let (_tmp, entry) = setup();
        entry.acquire("enrich").unwrap();
        entry.acquire("dump").unwrap();

        match entry.begin_delete() {
            DeleteOutcome::Deferred { refcount, scopes } => {
                assert_eq!(refcount, 2);
                assert_eq!(scopes.len(), 2);
            }
            other => panic!("expected Deferred, got {other:?}"),
        }
        assert_eq!(entry.db_state(), DbState::PendingDelete);
    }

    #[test]
    fn test_begin_delete_twice_is_already_pending() {
        let (_tmp, entry) = setup();
        entry.acquire("enrich").unwrap();
        assert!(matches!(
            entry.begin_delete(),
            DeleteOutcome::Deferred { .. }
        ));
        assert_eq!(entry.begin_delete(), DeleteOutcome::AlreadyPending);
    }

    #[test]
    fn test_begin_delete_on_removed_entry_is_gone() {
        let (_tmp, entry) = setup();
        entry.begin_delete();
        assert_eq!(entry.begin_delete(), DeleteOutcome::Gone);
    }

    #[test]
    fn test_acquire_refused_while_pending_delete() {
        let (_tmp, entry) = setup();
        entry.acquire("enrich").unwrap();
        entry.begin_delete();

        let err = entry.acquire("late").unwrap_err();
        assert!(matches!(err, Error::PendingDeletion { .. }));
        assert_eq!(entry.refcount(), 1);
    }

    #[test]
    fn test_acquire_refused_while_removed() {
        let (_tmp, entry) = setup();
        entry.begin_delete();
        assert!(matches!(
            entry.acquire("late"),
            Err(Error::PendingDeletion { .. })
        ));
    }

    #[test]
    fn test_last_release_of_pending_delete_destroys() {
        let (_tmp, entry) = setup();
        entry.acquire("enrich").unwrap();
        entry.acquire("enrich").unwrap();
        entry.begin_delete();

        assert_eq!(
            entry.release("enrich"),
            ReleaseOutcome::Released { remaining: 1 }
        );
        assert_eq!(entry.release("enrich"), ReleaseOutcome::DestroyNow);
        assert_eq!(entry.db_state(), DbState::Removed);
    }

    #[test]
    fn test_release_while_open_never_destroys() {
        let (_tmp, entry) = setup();
        entry.acquire("enrich").unwrap();
        assert_eq!(
            entry.release("enrich"),
            ReleaseOutcome::Released { remaining: 0 }
        );
        assert_eq!(entry.db_state(), DbState::Open);
    }

    #[test]
    fn test_refcount_accurate_under_concurrent_acquires() {
        let (_tmp, entry) = setup();
        let entry = Arc::new(entry);
        let barrier = Arc::new(Barrier::new(10));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let entry = Arc::clone(&entry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    entry.acquire(&format!("worker-{i}")).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(entry.refcount(), 10);
        assert_eq!(entry.scope_census().len(), 10);
    }

    #[test]
    fn test_exactly_one_thread_wins_the_destroy_transition() {
        // Ten racing releases on a pending-delete entry with ten holders:
        // exactly one must observe DestroyNow.
        let (_tmp, entry) = setup();
        for _ in 0..10 {
            entry.acquire("worker").unwrap();
        }
        entry.begin_delete();

        let entry = Arc::new(entry);
        let barrier = Arc::new(Barrier::new(10));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let entry = Arc::clone(&entry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    entry.release("worker")
                })
            })
            .collect();

        let destroys = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome == ReleaseOutcome::DestroyNow)
            .count();
        assert_eq!(destroys, 1);
        assert_eq!(entry.db_state(), DbState::Removed);
    }
}
