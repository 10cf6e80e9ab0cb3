//! Lookup operators over KVDB handles
//!
//! The four enrichment operators the rule pipeline builds against named
//! databases: `get`, `get-merge`, `match`, `not-match`. Each is built once,
//! validating its positional parameters and acquiring a scoped handle, and
//! is then evaluated once per event. A failed evaluation leaves the event
//! untouched so the pipeline's own error routing can annotate it.

use serde_json::Value;

use vigil_core::{Error, Event, Result};
use vigil_kvdb::{KvdbHandle, KvdbManager};

use crate::key::KeySource;

/// Which lookup operator to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// Fetch a stored JSON value into the target field.
    Get,
    /// Merge a stored object or array into the target field.
    GetMerge,
    /// Assert the target field's value is a key present in the database.
    Match,
    /// Assert the target field's value is a key absent from the database.
    NotMatch,
}

impl OperatorKind {
    /// Pipeline-facing name, as it appears in rule definitions.
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Get => "get",
            OperatorKind::GetMerge => "get-merge",
            OperatorKind::Match => "match",
            OperatorKind::NotMatch => "not-match",
        }
    }

    /// Number of positional parameters the builder requires.
    fn arity(&self) -> usize {
        match self {
            // database + key-or-reference
            OperatorKind::Get | OperatorKind::GetMerge => 2,
            // database only; the key is the target field's value
            OperatorKind::Match | OperatorKind::NotMatch => 1,
        }
    }
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A built lookup operator: parameters validated, handle acquired.
///
/// The operator owns its handle for its whole lifetime, which keeps the
/// database alive: a concurrent delete defers until the operator is closed
/// or dropped.
#[derive(Debug)]
pub enum KvdbOperator {
    /// `get(target, key-or-reference)`: write the stored value to `target`.
    Get {
        /// Event field the stored value is written to.
        target: String,
        /// Lookup key, literal or event-field reference.
        key: KeySource,
        /// Scoped handle acquired at build time.
        handle: KvdbHandle,
    },
    /// `get-merge(target, key-or-reference)`: merge the stored value into
    /// `target`.
    GetMerge {
        /// Event field the stored value is merged into.
        target: String,
        /// Lookup key, literal or event-field reference.
        key: KeySource,
        /// Scoped handle acquired at build time.
        handle: KvdbHandle,
    },
    /// `match(database)`: succeed iff the target field's value is a key
    /// present in the database.
    Match {
        /// Event field holding the probe key.
        target: String,
        /// Scoped handle acquired at build time.
        handle: KvdbHandle,
    },
    /// `not-match(database)`: succeed iff the target field's value is a key
    /// absent from the database.
    NotMatch {
        /// Event field holding the probe key.
        target: String,
        /// Scoped handle acquired at build time.
        handle: KvdbHandle,
    },
}

impl KvdbOperator {
    /// Build an operator from its declarative parameters.
    ///
    /// `params` is the positional list a rule definition supplies:
    /// `[database, key-or-reference]` for get and get-merge, `[database]`
    /// for match and not-match. Wrong arity, an unknown database, and a
    /// database pending deletion all fail here with [`Error::Build`],
    /// before any event is processed.
    pub fn build(
        manager: &KvdbManager,
        scope: &str,
        kind: OperatorKind,
        target: &str,
        params: &[String],
    ) -> Result<Self> {
        let expected = kind.arity();
        if params.len() != expected {
            return Err(Error::build(format!(
                "{kind} expects {expected} parameter(s), got {}",
                params.len()
            )));
        }
        let db = params[0].as_str();
        let handle = manager
            .get_handler(db, scope)
            .map_err(|err| Error::build(format!("cannot open database '{db}': {err}")))?;
        let target = target.to_string();
        Ok(match kind {
            OperatorKind::Get => KvdbOperator::Get {
                target,
                key: KeySource::parse(&params[1]),
                handle,
            },
            OperatorKind::GetMerge => KvdbOperator::GetMerge {
                target,
                key: KeySource::parse(&params[1]),
                handle,
            },
            OperatorKind::Match => KvdbOperator::Match { target, handle },
            OperatorKind::NotMatch => KvdbOperator::NotMatch { target, handle },
        })
    }

    /// Kind of this operator.
    pub fn kind(&self) -> OperatorKind {
        match self {
            KvdbOperator::Get { .. } => OperatorKind::Get,
            KvdbOperator::GetMerge { .. } => OperatorKind::GetMerge,
            KvdbOperator::Match { .. } => OperatorKind::Match,
            KvdbOperator::NotMatch { .. } => OperatorKind::NotMatch,
        }
    }

    /// Event field path the operator reads or writes.
    pub fn target(&self) -> &str {
        match self {
            KvdbOperator::Get { target, .. }
            | KvdbOperator::GetMerge { target, .. }
            | KvdbOperator::Match { target, .. }
            | KvdbOperator::NotMatch { target, .. } => target,
        }
    }

    /// Database the operator's handle is bound to.
    pub fn db_name(&self) -> &str {
        self.handle().name()
    }

    fn handle(&self) -> &KvdbHandle {
        match self {
            KvdbOperator::Get { handle, .. }
            | KvdbOperator::GetMerge { handle, .. }
            | KvdbOperator::Match { handle, .. }
            | KvdbOperator::NotMatch { handle, .. } => handle,
        }
    }

    /// Evaluate the operator against one event.
    ///
    /// On success the event is transformed (get, get-merge) or confirmed
    /// unchanged (match, not-match). On failure the event is always left
    /// exactly as it was.
    pub fn eval(&self, event: &mut Event) -> Result<()> {
        match self {
            KvdbOperator::Get {
                target,
                key,
                handle,
            } => eval_get(handle, target, key, event),
            KvdbOperator::GetMerge {
                target,
                key,
                handle,
            } => eval_get_merge(handle, target, key, event),
            KvdbOperator::Match { target, handle } => {
                eval_presence(handle, target, event, true)
            }
            KvdbOperator::NotMatch { target, handle } => {
                eval_presence(handle, target, event, false)
            }
        }
    }

    /// Release the operator's handle.
    ///
    /// Dropping releases too, but a pipeline tears its operators down
    /// through `close` so release failures surface instead of being logged
    /// and swallowed.
    pub fn close(self) -> Result<()> {
        self.handle().close()
    }
}

/// Fetch, decode, and write the stored value into the target field.
fn eval_get(
    handle: &KvdbHandle,
    target: &str,
    key: &KeySource,
    event: &mut Event,
) -> Result<()> {
    let key = key.resolve(event)?;
    let stored = handle.get(key.as_bytes())?;
    let value = decode_stored(&key, &stored)?;
    event.set(target, value);
    Ok(())
}

/// Fetch, decode, and merge the stored object/array into the target field.
fn eval_get_merge(
    handle: &KvdbHandle,
    target: &str,
    key: &KeySource,
    event: &mut Event,
) -> Result<()> {
    let key = key.resolve(event)?;
    let stored = handle.get(key.as_bytes())?;
    let stored = decode_stored(&key, &stored)?;
    if !stored.is_object() && !stored.is_array() {
        return Err(Error::malformed(format!(
            "stored value for key '{key}' is not a JSON object or array"
        )));
    }
    let slot = event
        .get_mut(target)
        .ok_or_else(|| Error::malformed(format!("target field '{target}' is missing")))?;
    match (slot, stored) {
        (Value::Object(existing), Value::Object(incoming)) => {
            // Stored keys win on conflict.
            for (k, v) in incoming {
                existing.insert(k, v);
            }
            Ok(())
        }
        (Value::Array(existing), Value::Array(mut incoming)) => {
            existing.append(&mut incoming);
            Ok(())
        }
        _ => Err(Error::malformed(format!(
            "target field '{target}' does not match the stored value's shape"
        ))),
    }
}

/// Probe the database with the target field's string value.
fn eval_presence(
    handle: &KvdbHandle,
    target: &str,
    event: &Event,
    expect_present: bool,
) -> Result<()> {
    let key = event.get_str(target).ok_or_else(|| {
        Error::malformed(format!("target field '{target}' is missing or not a string"))
    })?;
    let present = handle.contains(key.as_bytes())?;
    match (present, expect_present) {
        (true, true) | (false, false) => Ok(()),
        (false, true) => Err(Error::key_not_found(key.as_bytes())),
        (true, false) => Err(Error::key_found(key.as_bytes())),
    }
}

fn decode_stored(key: &str, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|err| {
        Error::malformed(format!("stored value for key '{key}' is not JSON: {err}"))
    })
}
