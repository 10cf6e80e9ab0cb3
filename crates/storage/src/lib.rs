//! Storage engine adapter for the vigil KVDB manager
//!
//! Thin wrapper around an embedded ordered key-value store (`redb`): one
//! physical store per named database, byte-string keys and values, point
//! operations plus an ordered prefix scan. Everything above this crate talks
//! in terms of [`StorageEngine`] and never sees redb types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine; // redb adapter + prefix scans

pub use engine::{PrefixScan, StorageEngine, SyncMode, DATA_FILE_NAME, SCAN_CHUNK_SIZE};
