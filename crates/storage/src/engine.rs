//! redb-backed storage engine adapter.
//!
//! One [`StorageEngine`] wraps one physical `redb` database file holding a
//! single byte-to-byte table. The adapter keeps the surface to what the
//! handles need: point get/put/delete/contains plus a chunked prefix scan.
//!
//! # Transactions
//!
//! Every write commits its own transaction, so concurrent writers get
//! last-write-wins per key and readers always observe a committed value
//! (redb MVCC snapshots). Durability per commit follows the configured
//! [`SyncMode`].

use redb::{Database, Durability, ReadableTable, TableDefinition};
use std::collections::VecDeque;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::info;
use vigil_core::{Error, Result};

/// File name of the redb database inside a database directory.
pub const DATA_FILE_NAME: &str = "data.redb";

/// Maximum pairs pulled per read snapshot during a prefix scan.
pub const SCAN_CHUNK_SIZE: usize = 256;

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// Write durability applied to every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Commits become durable eventually (periodic fsync). Fast path.
    #[default]
    Buffered,
    /// Every commit fsyncs before returning.
    Immediate,
}

impl SyncMode {
    fn durability(self) -> Durability {
        match self {
            SyncMode::Buffered => Durability::Eventual,
            SyncMode::Immediate => Durability::Immediate,
        }
    }
}

/// One physical key-value store rooted at a database directory.
///
/// Cheap to share behind an `Arc`; all operations take `&self` and rely on
/// redb's own locking. Dropping the last reference closes the file.
#[derive(Debug)]
pub struct StorageEngine {
    path: PathBuf,
    db: Database,
    sync: SyncMode,
}

impl StorageEngine {
    /// Open (creating if needed) the store rooted at `dir`.
    ///
    /// Creates the directory, opens `data.redb` inside it, and makes sure the
    /// table exists so later readers never race table creation.
    pub fn open(dir: &Path, sync: SyncMode) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::storage(format!("create {}: {e}", dir.display())))?;

        let data_path = dir.join(DATA_FILE_NAME);
        let db = Database::create(&data_path)
            .map_err(|e| Error::storage(format!("open {}: {e}", data_path.display())))?;

        // First write transaction creates the table; read transactions on a
        // fresh file would otherwise fail with TableDoesNotExist.
        let write_txn = db.begin_write().map_err(Error::storage)?;
        write_txn.open_table(TABLE).map_err(Error::storage)?;
        write_txn.commit().map_err(Error::storage)?;

        info!(target: "vigil::storage", path = ?data_path, ?sync, "opened storage engine");

        Ok(StorageEngine {
            path: dir.to_path_buf(),
            db,
            sync,
        })
    }

    /// Directory this store lives in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured write durability.
    pub fn sync_mode(&self) -> SyncMode {
        self.sync
    }

    /// Read the value stored under `key`, `None` if absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(Error::storage)?;
        let table = read_txn.open_table(TABLE).map_err(Error::storage)?;
        let value = table
            .get(key)
            .map_err(Error::storage)?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    /// Upsert `key` to `value`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut write_txn = self.db.begin_write().map_err(Error::storage)?;
        write_txn.set_durability(self.sync.durability());
        {
            let mut table = write_txn.open_table(TABLE).map_err(Error::storage)?;
            table.insert(key, value).map_err(Error::storage)?;
        }
        write_txn.commit().map_err(Error::storage)?;
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut write_txn = self.db.begin_write().map_err(Error::storage)?;
        write_txn.set_durability(self.sync.durability());
        let was_present;
        {
            let mut table = write_txn.open_table(TABLE).map_err(Error::storage)?;
            was_present = table.remove(key).map_err(Error::storage)?.is_some();
        }
        write_txn.commit().map_err(Error::storage)?;
        Ok(was_present)
    }

    /// True if `key` is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let read_txn = self.db.begin_read().map_err(Error::storage)?;
        let table = read_txn.open_table(TABLE).map_err(Error::storage)?;
        Ok(table.get(key).map_err(Error::storage)?.is_some())
    }

    /// Lazy scan over all pairs whose key starts with `prefix`, in key order.
    ///
    /// The scan pulls at most [`SCAN_CHUNK_SIZE`] pairs per read snapshot and
    /// resumes after the last yielded key, so it holds no transaction between
    /// pulls. Writes that land behind the resume point during the scan are
    /// not revisited; a fresh scan restarts from the beginning.
    pub fn scan_prefix(&self, prefix: &[u8]) -> PrefixScan<'_> {
        PrefixScan {
            engine: self,
            prefix: prefix.to_vec(),
            resume_after: None,
            buffered: VecDeque::new(),
            done: false,
        }
    }

    /// Remove the database directory rooted at `dir`.
    ///
    /// Callers drop their own engine reference first; a late `Arc` holder
    /// keeps the unlinked file alive until it drops, which is safe on the
    /// POSIX targets this runs on.
    pub fn destroy(dir: &Path) -> Result<()> {
        fs::remove_dir_all(dir)
            .map_err(|e| Error::storage(format!("remove {}: {e}", dir.display())))?;
        info!(target: "vigil::storage", path = ?dir, "destroyed storage directory");
        Ok(())
    }
}

/// Chunked iterator over `(key, value)` pairs sharing a prefix.
///
/// Yields pairs in key order; each item is a `Result` because every chunk
/// boundary touches the engine again.
#[derive(Debug)]
pub struct PrefixScan<'a> {
    engine: &'a StorageEngine,
    prefix: Vec<u8>,
    resume_after: Option<Vec<u8>>,
    buffered: VecDeque<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl PrefixScan<'_> {
    fn refill(&mut self) -> Result<()> {
        let read_txn = self.engine.db.begin_read().map_err(Error::storage)?;
        let table = read_txn.open_table(TABLE).map_err(Error::storage)?;

        let start = match &self.resume_after {
            Some(last) => Bound::Excluded(last.as_slice()),
            None => Bound::Included(self.prefix.as_slice()),
        };
        let range = table
            .range::<&[u8]>((start, Bound::Unbounded))
            .map_err(Error::storage)?;

        let mut pulled = 0usize;
        for item in range {
            let (key_guard, value_guard) = item.map_err(Error::storage)?;
            let key = key_guard.value().to_vec();
            if !key.starts_with(&self.prefix) {
                self.done = true;
                break;
            }
            self.buffered.push_back((key, value_guard.value().to_vec()));
            pulled += 1;
            if pulled == SCAN_CHUNK_SIZE {
                break;
            }
        }
        if pulled < SCAN_CHUNK_SIZE {
            // Prefix exhausted or end of table.
            self.done = true;
        }
        if let Some((key, _)) = self.buffered.back() {
            self.resume_after = Some(key.clone());
        }
        Ok(())
    }
}

impl Iterator for PrefixScan<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffered.is_empty() {
            if self.done {
                return None;
            }
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffered.pop_front().map(Ok)
    }
}
