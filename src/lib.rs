//! Vigil - KVDB storage layer for a security-event processing engine
//!
//! Vigil manages named, independent, on-disk key-value databases that are
//! queried and mutated synchronously while an event pipeline is running:
//! attacker indicators, allow-lists, and enrichment records, looked up per
//! event by rule operators.
//!
//! # Quick Start
//!
//! ```ignore
//! use vigil::{Event, KvdbManager, KvdbOperator, OperatorKind};
//!
//! // One manager per process, rooted at the storage directory.
//! let manager = KvdbManager::new("/var/lib/vigil");
//! manager.initialize()?;
//! manager.create_db("indicators")?;
//!
//! // Scoped handles carry the key-level API.
//! let handle = manager.get_handler("indicators", "loader")?;
//! handle.set(b"198.51.100.7", br#"{"reputation": "bad"}"#)?;
//! handle.close()?;
//!
//! // Rule operators acquire their own handle at build time and keep it.
//! let params = vec!["indicators".to_string()];
//! let op = KvdbOperator::build(&manager, "rule-7", OperatorKind::Match, "/source/ip", &params)?;
//! let mut event: Event = r#"{"source": {"ip": "198.51.100.7"}}"#.parse()?;
//! op.eval(&mut event)?;
//! ```
//!
//! # Architecture
//!
//! The [`KvdbManager`] owns the registry of databases and brokers all access
//! through reference-counted [`KvdbHandle`]s; a database with outstanding
//! handles is never destroyed, deletion defers to the last release. Handles
//! talk straight to the per-database [`StorageEngine`] so key operations on
//! different databases never contend. [`KvdbOperator`] packages the four
//! lookup operators (get, get-merge, match, not-match) the pipeline
//! evaluates per event.

// Shared types: errors, events, metrics, name rules
pub use vigil_core::{
    validate_db_name, Error, Event, MemoryMetricsScope, MetricsScope, NullMetricsScope, Result,
    MAX_DB_NAME_LEN,
};

// Manager, handles, configuration
pub use vigil_kvdb::{DbState, KvdbHandle, KvdbManager, ManagerConfig, CONFIG_FILE_NAME};

// Lookup operators
pub use vigil_operators::{KeySource, KvdbOperator, OperatorKind, REFERENCE_SIGIL};

// Storage engine adapter (exposed for tooling; handles cover normal use)
pub use vigil_storage::{PrefixScan, StorageEngine, SyncMode};
