//! KVDB manager: named on-disk key-value databases behind scoped handles
//!
//! This crate is the brokered middle of the storage layer:
//! - [`KvdbManager`]: owns the registry of named databases, serializes
//!   structural changes, issues and tracks handles
//! - [`KvdbHandle`]: scoped, reference-counted capability for key-level
//!   access to one database
//! - [`ManagerConfig`]: `vigil.toml` in the storage root
//! - registry entries: the per-database Open/PendingDelete/Removed state
//!   machine that makes deferred deletion safe
//!
//! A database with outstanding handles is never destroyed: deletion marks it
//! pending and the last release performs the physical removal.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
pub mod config; // vigil.toml load/init
pub mod handle; // scoped reference-counted handles
pub mod manager; // registry map + lifecycle operations
pub mod registry; // per-database entry state machine

// Re-export commonly used types
pub use config::{ManagerConfig, CONFIG_FILE_NAME};
pub use handle::KvdbHandle;
pub use manager::KvdbManager;
pub use registry::{DbState, DeleteOutcome, RegistryEntry, ReleaseOutcome};
