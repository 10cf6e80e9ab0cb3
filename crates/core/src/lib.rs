//! Core types for the vigil KVDB manager
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: single error enum shared by manager, handles, and operators
//! - Event: JSON event tree with slash-separated field paths
//! - MetricsScope: injected counter/gauge sink (plus null and in-memory impls)
//! - Database-name validation: filesystem-safe name rules

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
pub mod error; // Error enum + Result alias
pub mod event; // JSON event tree + field paths
pub mod metrics; // MetricsScope trait + implementations
pub mod name; // Database-name validation

// Re-export commonly used types and traits
pub use error::{Error, Result};
pub use event::Event;
pub use metrics::{MemoryMetricsScope, MetricsScope, NullMetricsScope};
pub use name::{validate_db_name, MAX_DB_NAME_LEN};
