//! Database-name validation.
//!
//! Database names double as on-disk directory names, so they are restricted
//! to a filesystem-safe alphabet and rejected outright when they fall outside
//! it. Names are never mangled or escaped: what the caller registers is what
//! appears under the storage root.

use crate::error::{Error, Result};

/// Maximum database name length in bytes
///
/// Keeps directory names comfortably inside every filesystem's component
/// limit (255 on the usual targets).
pub const MAX_DB_NAME_LEN: usize = 128;

/// Validate a database name for registration.
///
/// Accepted names are 1 to [`MAX_DB_NAME_LEN`] bytes of ASCII alphanumerics,
/// `_`, `-`, and `.`, excluding the reserved path components `.` and `..`.
///
/// # Examples
///
/// ```
/// use vigil_core::validate_db_name;
///
/// assert!(validate_db_name("agents").is_ok());
/// assert!(validate_db_name("geo.v2").is_ok());
/// assert!(validate_db_name("../escape").is_err());
/// assert!(validate_db_name("").is_err());
/// ```
pub fn validate_db_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(name, "name is empty"));
    }
    if name.len() > MAX_DB_NAME_LEN {
        return Err(invalid(
            name,
            format!("name is longer than {MAX_DB_NAME_LEN} bytes"),
        ));
    }
    if name == "." || name == ".." {
        return Err(invalid(name, "reserved path component"));
    }
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && !matches!(ch, '_' | '-' | '.') {
            return Err(invalid(name, format!("illegal character {ch:?}")));
        }
    }
    Ok(())
}

fn invalid(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}
