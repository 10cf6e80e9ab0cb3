//! Lookup operators: the storage-layer contracts the rule pipeline evaluates
//!
//! Four operators over named key-value databases, built from declarative
//! positional parameters and evaluated once per event:
//! - `get` / `get-merge`: fetch a stored JSON value by literal or referenced
//!   key and write or merge it into a target event field
//! - `match` / `not-match`: assert the target field's value is a key
//!   present in / absent from a database
//!
//! Building an operator acquires a scoped [`vigil_kvdb::KvdbHandle`] and
//! keeps it for the operator's lifetime, so a database in use by a rule can
//! never be destroyed out from under it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod key; // literal vs `$`-referenced lookup keys
pub mod ops; // the four operators, build + eval

pub use key::{KeySource, REFERENCE_SIGIL};
pub use ops::{KvdbOperator, OperatorKind};
