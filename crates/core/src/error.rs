//! Error types for the KVDB manager.
//!
//! All errors from the manager, handles, and lookup operators are represented
//! by the [`Error`] enum. These errors are:
//! - **Structured**: Each variant has typed fields for error details
//! - **Serializable**: Can be converted to/from JSON for administrative replies
//! - **Stable**: Display strings are the messages operators and admin commands
//!   show to users

use serde::{Deserialize, Serialize};

/// Result type alias for KVDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// KVDB manager errors.
///
/// All errors that can occur in the manager, in handles, and in operator
/// construction are represented here. Errors are structured to preserve
/// details for the administrative layer.
///
/// # Categories
///
/// | Category | Variants | Description |
/// |----------|----------|-------------|
/// | Lifecycle | `NotInitialized`, `HandlesOutstanding` | Manager start/stop state |
/// | Registry | `AlreadyExists`, `NotFound`, `PendingDeletion`, `InvalidName` | Database bookkeeping |
/// | Handle | `InvalidHandle`, `KeyNotFound` | Key-level access |
/// | Storage | `StorageUnavailable` | Engine or filesystem failure |
/// | Operator | `MalformedValue`, `KeyFound`, `Build` | Lookup operator contract |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    // ==================== Lifecycle ====================
    /// Operation attempted before `initialize` (or after `finalize`)
    #[error("kvdb manager is not initialized")]
    NotInitialized,

    /// Finalize found handles that were never released
    #[error("{count} handle(s) still outstanding at finalize")]
    HandlesOutstanding {
        /// Total outstanding handles across all databases
        count: u32,
    },

    // ==================== Registry ====================
    /// Database name already registered (possibly pending deletion)
    #[error("database already exists: {name}")]
    AlreadyExists {
        /// Database name
        name: String,
    },

    /// Database name not registered
    #[error("database not found: {name}")]
    NotFound {
        /// Database name
        name: String,
    },

    /// Database is marked for deletion; no new handles
    #[error("database is pending deletion: {name}")]
    PendingDeletion {
        /// Database name
        name: String,
    },

    /// Database name is not filesystem-safe
    #[error("invalid database name {name:?}: {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Which rule it broke
        reason: String,
    },

    // ==================== Handle ====================
    /// Use of a handle that was already released
    #[error("handle already released: {name} (scope {scope})")]
    InvalidHandle {
        /// Database name the handle was bound to
        name: String,
        /// Scope the handle was issued for
        scope: String,
    },

    /// Key absent from the database
    #[error("key not found: {key}")]
    KeyNotFound {
        /// Missing key, lossily decoded for display
        key: String,
    },

    // ==================== Storage ====================
    /// Engine or filesystem failure
    #[error("storage unavailable: {reason}")]
    StorageUnavailable {
        /// Underlying failure description
        reason: String,
    },

    // ==================== Operator ====================
    /// Stored bytes do not decode as the shape an operator expects
    #[error("malformed stored value: {reason}")]
    MalformedValue {
        /// What failed to decode
        reason: String,
    },

    /// A key an operator asserts absent is present
    #[error("key unexpectedly present: {key}")]
    KeyFound {
        /// Offending key, lossily decoded for display
        key: String,
    },

    /// Bad operator parameters at configuration time
    #[error("operator build failed: {reason}")]
    Build {
        /// What was wrong with the parameter list
        reason: String,
    },
}

impl Error {
    /// Build a `StorageUnavailable` from any displayable cause.
    pub fn storage(reason: impl std::fmt::Display) -> Self {
        Error::StorageUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Build a `MalformedValue` from any displayable cause.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Error::MalformedValue {
            reason: reason.to_string(),
        }
    }

    /// Build a `Build` error from any displayable cause.
    pub fn build(reason: impl std::fmt::Display) -> Self {
        Error::Build {
            reason: reason.to_string(),
        }
    }

    /// Build a `KeyNotFound`, decoding the key lossily for display.
    pub fn key_not_found(key: &[u8]) -> Self {
        Error::KeyNotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Build a `KeyFound`, decoding the key lossily for display.
    pub fn key_found(key: &[u8]) -> Self {
        Error::KeyFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_initialized() {
        let err = Error::NotInitialized;
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn test_error_display_already_exists() {
        let err = Error::AlreadyExists {
            name: "agents".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("already exists"));
        assert!(msg.contains("agents"));
    }

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound {
            name: "missing_db".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("missing_db"));
    }

    #[test]
    fn test_error_display_pending_deletion() {
        let err = Error::PendingDeletion {
            name: "doomed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("pending deletion"));
        assert!(msg.contains("doomed"));
    }

    #[test]
    fn test_error_display_invalid_handle() {
        let err = Error::InvalidHandle {
            name: "agents".to_string(),
            scope: "builder_test".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("already released"));
        assert!(msg.contains("agents"));
        assert!(msg.contains("builder_test"));
    }

    #[test]
    fn test_error_display_key_not_found() {
        let err = Error::key_not_found(b"ip-192.168.0.1");
        let msg = err.to_string();
        assert!(msg.contains("key not found"));
        assert!(msg.contains("ip-192.168.0.1"));
    }

    #[test]
    fn test_error_display_key_found() {
        let err = Error::key_found(b"blocked-host");
        let msg = err.to_string();
        assert!(msg.contains("unexpectedly present"));
        assert!(msg.contains("blocked-host"));
    }

    #[test]
    fn test_error_display_handles_outstanding() {
        let err = Error::HandlesOutstanding { count: 3 };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("outstanding"));
    }

    #[test]
    fn test_error_storage_helper() {
        let err = Error::storage("disk full");
        assert!(matches!(err, Error::StorageUnavailable { .. }));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_error_build_helper() {
        let err = Error::build("expected 2 parameters, got 3");
        assert!(matches!(err, Error::Build { .. }));
        assert!(err.to_string().contains("expected 2 parameters"));
    }

    #[test]
    fn test_error_malformed_helper() {
        let err = Error::malformed("stored value is not a JSON object or array");
        assert!(matches!(err, Error::MalformedValue { .. }));
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[test]
    fn test_key_not_found_non_utf8_key() {
        // Lossy decoding keeps the display path panic-free for binary keys.
        let err = Error::key_not_found(&[0xFF, 0xFE, b'k']);
        assert!(err.to_string().contains("key not found"));
    }

    #[test]
    fn test_error_round_trips_through_json() {
        let err = Error::PendingDeletion {
            name: "agents".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(7)
        }

        fn returns_error() -> Result<i32> {
            Err(Error::NotInitialized)
        }

        assert_eq!(returns_result().unwrap(), 7);
        assert!(returns_error().is_err());
    }
}
