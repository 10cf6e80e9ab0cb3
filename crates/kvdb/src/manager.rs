//! KVDB manager: the shared registry of named databases.
//!
//! The manager owns the name-to-entry map behind one structural lock and
//! brokers all access through scoped handles. Locking follows a fixed order:
//! registry lock first, then the per-entry lock; filesystem work (engine
//! open, directory destruction) runs with the registry lock released.
//!
//! Destruction is staged through the entry's `Removed` state: the deciding
//! thread flips the state under both locks, drops them, removes the
//! directory, then re-acquires the registry lock to erase the name. While
//! `Removed`, the name stays registered, so a concurrent `create_db` fails
//! with `AlreadyExists` instead of racing the removal. Creation is staged
//! the same way with a reserved slot, so the engine open never runs under
//! the registry lock either.

use crate::config::ManagerConfig;
use crate::handle::KvdbHandle;
use crate::registry::{DeleteOutcome, RegistryEntry, ReleaseOutcome};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vigil_core::{validate_db_name, Error, MetricsScope, NullMetricsScope, Result};
use vigil_storage::{StorageEngine, SyncMode};

// =============================================================================
// Registry state
// =============================================================================

/// A slot in the name map.
enum EntrySlot {
    /// Name reserved by an in-flight `create_db` while the engine opens with
    /// no lock held. Not listed, not acquirable, not deletable.
    Reserved,
    /// A registered database.
    Ready(Arc<RegistryEntry>),
}

struct RegistryState {
    sync: SyncMode,
    entries: HashMap<String, EntrySlot>,
}

impl RegistryState {
    fn ready(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        match self.entries.get(name) {
            Some(EntrySlot::Ready(entry)) => Some(Arc::clone(entry)),
            _ => None,
        }
    }

    fn registered_count(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, EntrySlot::Ready(_)))
            .count()
    }
}

// =============================================================================
// Manager internals shared with handles
// =============================================================================

/// State shared between the manager facade and every issued handle.
///
/// `registry` is `None` outside the initialize..finalize window; every
/// operation checks it and fails with `NotInitialized` when absent.
pub(crate) struct ManagerInner {
    root: PathBuf,
    registry: Mutex<Option<RegistryState>>,
    metrics: Arc<dyn MetricsScope>,
}

impl ManagerInner {
    fn handles_gauge(&self, name: &str, value: u32) {
        self.metrics
            .set_gauge(&format!("kvdb.{name}.handles"), u64::from(value));
    }

    fn databases_gauge(&self, count: usize) {
        self.metrics.set_gauge("kvdb.databases", count as u64);
    }

    /// Return one handle's reference on (`name`, `scope`).
    ///
    /// Called exactly once per handle, from `close` or drop. When the
    /// release brings a pending-delete database to zero holders, this thread
    /// performs the deferred destruction before returning.
    pub(crate) fn release_scoped(&self, name: &str, scope: &str) -> Result<()> {
        let (entry, outcome) = {
            let guard = self.registry.lock();
            let state = guard.as_ref().ok_or(Error::NotInitialized)?;
            let entry = state.ready(name).ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })?;
            let outcome = entry.release(scope);
            (entry, outcome)
        };

        match outcome {
            ReleaseOutcome::Released { remaining } => {
                debug!(target: "vigil::kvdb", db = %name, scope = %scope, remaining, "handle released");
                self.handles_gauge(name, remaining);
                Ok(())
            }
            ReleaseOutcome::DestroyNow => {
                debug!(target: "vigil::kvdb", db = %name, scope = %scope, remaining = 0u32, "handle released");
                self.handles_gauge(name, 0);

                let dir = entry.engine().path().to_path_buf();
                let destroy_result = StorageEngine::destroy(&dir);
                let count = {
                    let mut guard = self.registry.lock();
                    guard.as_mut().map(|state| {
                        state.entries.remove(name);
                        state.registered_count()
                    })
                };
                destroy_result?;
                warn!(target: "vigil::kvdb", db = %name, "deferred deletion completed");
                if let Some(count) = count {
                    self.databases_gauge(count);
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Broker for named on-disk key-value databases.
///
/// Cheap to clone; clones share the same registry. The manager must be
/// [`initialize`](KvdbManager::initialize)d before use and should be
/// [`finalize`](KvdbManager::finalize)d at shutdown so leaked handles are
/// reported.
///
/// # Examples
///
/// ```no_run
/// use vigil_kvdb::KvdbManager;
///
/// # fn main() -> vigil_core::Result<()> {
/// let manager = KvdbManager::new("/var/lib/vigil/kvdb");
/// manager.initialize()?;
///
/// manager.create_db("agents")?;
/// let handle = manager.get_handler("agents", "enrichment")?;
/// handle.set(b"agent-007", b"{\"os\":\"linux\"}")?;
///
/// handle.close()?;
/// manager.finalize()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct KvdbManager {
    inner: Arc<ManagerInner>,
}

impl KvdbManager {
    /// Create a manager rooted at `root`, reporting metrics nowhere.
    ///
    /// Nothing touches the filesystem until [`initialize`](Self::initialize).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_metrics(root, Arc::new(NullMetricsScope))
    }

    /// Create a manager that reports counters and gauges to `metrics`.
    pub fn with_metrics(root: impl Into<PathBuf>, metrics: Arc<dyn MetricsScope>) -> Self {
        KvdbManager {
            inner: Arc::new(ManagerInner {
                root: root.into(),
                registry: Mutex::new(None),
                metrics,
            }),
        }
    }

    /// Storage root this manager was built for.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// True between a successful `initialize` and the next `finalize`.
    pub fn is_initialized(&self) -> bool {
        self.inner.registry.lock().is_some()
    }

    /// Open the storage root and bring the registry up.
    ///
    /// Creates the root directory, loads `vigil.toml` (writing a commented
    /// default when missing), and re-registers every database a previous run
    /// left on disk, each with no holders. Directory names that break the
    /// naming rules are skipped with a warning. Calling `initialize` on an
    /// initialized manager is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut guard = self.inner.registry.lock();
        if guard.is_some() {
            debug!(target: "vigil::kvdb", "initialize called on an initialized manager");
            return Ok(());
        }

        let root = &self.inner.root;
        fs::create_dir_all(root)
            .map_err(|e| Error::storage(format!("create root {}: {e}", root.display())))?;
        let config = ManagerConfig::load_or_init(root)?;
        let sync = config.sync_mode()?;

        let entries = rescan(root, sync)?;
        let count = entries.len();
        *guard = Some(RegistryState { sync, entries });
        drop(guard);

        info!(target: "vigil::kvdb", root = ?root, databases = count, ?sync, "kvdb manager initialized");
        self.inner.databases_gauge(count);
        Ok(())
    }

    /// Create and register a new database.
    ///
    /// Fails with `InvalidName` for names that are not filesystem-safe and
    /// `AlreadyExists` when the name is registered, including names pending
    /// deletion or still being created.
    pub fn create_db(&self, name: &str) -> Result<()> {
        validate_db_name(name)?;

        let (dir, sync) = {
            let mut guard = self.inner.registry.lock();
            let state = guard.as_mut().ok_or(Error::NotInitialized)?;
            if state.entries.contains_key(name) {
                return Err(Error::AlreadyExists {
                    name: name.to_string(),
                });
            }
            state.entries.insert(name.to_string(), EntrySlot::Reserved);
            (self.inner.root.join(name), state.sync)
        };

        // The name is reserved, so the engine open runs without the lock.
        let engine = match StorageEngine::open(&dir, sync) {
            Ok(engine) => engine,
            Err(e) => {
                let mut guard = self.inner.registry.lock();
                if let Some(state) = guard.as_mut() {
                    if matches!(state.entries.get(name), Some(EntrySlot::Reserved)) {
                        state.entries.remove(name);
                    }
                }
                return Err(e);
            }
        };

        let count = {
            let mut guard = self.inner.registry.lock();
            let Some(state) = guard.as_mut() else {
                // Finalized while the engine was opening; the fresh
                // directory is an orphan nobody will ever register.
                drop(guard);
                let _ = StorageEngine::destroy(&dir);
                return Err(Error::NotInitialized);
            };
            state.entries.insert(
                name.to_string(),
                EntrySlot::Ready(Arc::new(RegistryEntry::new(name, engine))),
            );
            state.registered_count()
        };

        info!(target: "vigil::kvdb", db = %name, "database created");
        self.inner.databases_gauge(count);
        Ok(())
    }

    /// Delete a database, deferring physical removal while handles are out.
    ///
    /// With no holders the directory is destroyed before this returns and
    /// the name is free again. With holders the entry is marked
    /// `PendingDelete`: existing handles keep working, new ones are refused,
    /// and whichever release drops the count to zero destroys the database.
    /// Repeating `delete_db` on a pending database is an idempotent success.
    pub fn delete_db(&self, name: &str) -> Result<()> {
        let (entry, outcome) = {
            let guard = self.inner.registry.lock();
            let state = guard.as_ref().ok_or(Error::NotInitialized)?;
            let entry = state.ready(name).ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })?;
            let outcome = entry.begin_delete();
            (entry, outcome)
        };

        match outcome {
            DeleteOutcome::Gone => Err(Error::NotFound {
                name: name.to_string(),
            }),
            DeleteOutcome::AlreadyPending => {
                debug!(target: "vigil::kvdb", db = %name, "delete requested again while pending");
                Ok(())
            }
            DeleteOutcome::Deferred { refcount, scopes } => {
                warn!(
                    target: "vigil::kvdb",
                    db = %name,
                    refcount,
                    holders = ?scopes,
                    "deletion deferred until all handles release"
                );
                Ok(())
            }
            DeleteOutcome::DestroyNow => {
                let dir = entry.engine().path().to_path_buf();
                let destroy_result = StorageEngine::destroy(&dir);
                let count = {
                    let mut guard = self.inner.registry.lock();
                    guard.as_mut().map(|state| {
                        state.entries.remove(name);
                        state.registered_count()
                    })
                };
                destroy_result?;
                info!(target: "vigil::kvdb", db = %name, "database deleted");
                if let Some(count) = count {
                    self.inner.databases_gauge(count);
                }
                Ok(())
            }
        }
    }

    /// Issue a handle on (`name`, `scope`), incrementing the holder count.
    ///
    /// Fails with `NotFound` for unregistered names and `PendingDeletion`
    /// for databases marked for removal.
    pub fn get_handler(&self, name: &str, scope: &str) -> Result<KvdbHandle> {
        let (entry, refcount) = {
            let guard = self.inner.registry.lock();
            let state = guard.as_ref().ok_or(Error::NotInitialized)?;
            let entry = state.ready(name).ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })?;
            let refcount = entry.acquire(scope)?;
            (entry, refcount)
        };

        debug!(target: "vigil::kvdb", db = %name, scope = %scope, refcount, "handle issued");
        self.inner.handles_gauge(name, refcount);
        Ok(KvdbHandle::issue(
            Arc::clone(&self.inner),
            Arc::clone(&self.inner.metrics),
            Arc::clone(entry.engine()),
            name,
            scope,
        ))
    }

    /// Names of all registered databases, pending-delete ones included,
    /// sorted lexicographically.
    pub fn list_dbs(&self) -> Result<Vec<String>> {
        let guard = self.inner.registry.lock();
        let state = guard.as_ref().ok_or(Error::NotInitialized)?;
        let mut names: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, slot)| matches!(slot, EntrySlot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Release `handle`. Equivalent to [`KvdbHandle::close`].
    pub fn release_handle(&self, handle: &KvdbHandle) -> Result<()> {
        handle.close()
    }

    /// Tear the registry down, reporting handles that were never released.
    ///
    /// Every leaked (database, scope, count) triple is logged at warn level;
    /// if any exist the call returns `HandlesOutstanding` — but the registry
    /// is dropped either way, and every later operation fails with
    /// `NotInitialized` until the manager is initialized again.
    pub fn finalize(&self) -> Result<()> {
        let state = {
            let mut guard = self.inner.registry.lock();
            guard.take().ok_or(Error::NotInitialized)?
        };

        let mut leaked: u32 = 0;
        for (name, slot) in &state.entries {
            let EntrySlot::Ready(entry) = slot else {
                continue;
            };
            let refcount = entry.refcount();
            if refcount == 0 {
                continue;
            }
            leaked += refcount;
            for (scope, count) in entry.scope_census() {
                warn!(
                    target: "vigil::kvdb",
                    db = %name,
                    scope = %scope,
                    count,
                    "handle still outstanding at finalize"
                );
            }
        }
        drop(state);

        self.inner.databases_gauge(0);
        if leaked > 0 {
            warn!(target: "vigil::kvdb", leaked, "kvdb manager finalized with outstanding handles");
            Err(Error::HandlesOutstanding { count: leaked })
        } else {
            info!(target: "vigil::kvdb", "kvdb manager finalized");
            Ok(())
        }
    }
}

/// Re-register every database directory a previous run left under `root`.
fn rescan(root: &Path, sync: SyncMode) -> Result<HashMap<String, EntrySlot>> {
    let mut entries = HashMap::new();
    let read_dir = fs::read_dir(root)
        .map_err(|e| Error::storage(format!("scan root {}: {e}", root.display())))?;
    for dir_entry in read_dir {
        let dir_entry = dir_entry.map_err(Error::storage)?;
        let path = dir_entry.path();
        if !path.is_dir() {
            // The root also holds vigil.toml; only directories are databases.
            continue;
        }
        let Some(name) = dir_entry.file_name().to_str().map(str::to_owned) else {
            warn!(target: "vigil::kvdb", path = ?path, "skipping database directory with non-UTF-8 name");
            continue;
        };
        if let Err(e) = validate_db_name(&name) {
            warn!(target: "vigil::kvdb", db = %name, error = %e, "skipping database directory with invalid name");
            continue;
        }
        let engine = StorageEngine::open(&path, sync)?;
        debug!(target: "vigil::kvdb", db = %name, "re-registered database from disk");
        entries.insert(
            name.clone(),
            EntrySlot::Ready(Arc::new(RegistryEntry::new(name, engine))),
        );
    }
    Ok(entries)
}
