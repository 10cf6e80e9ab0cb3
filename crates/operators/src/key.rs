//! Key-or-reference resolution for lookup operators
//!
//! Operator parameters name the lookup key either literally or, with a `$`
//! sigil, by referencing an event field whose string value is the key.
//! References are written with dotted field paths (`$agent.ip`) and
//! rewritten to the slash form the event tree uses.

use vigil_core::{Error, Event, Result};

/// Sigil marking an operator parameter as an event-field reference.
pub const REFERENCE_SIGIL: char = '$';

/// Where a lookup key comes from: the parameter itself, or an event field
/// named by the parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// The parameter string is the key.
    Literal(String),
    /// The parameter names an event field (slash path) holding the key.
    Reference(String),
}

impl KeySource {
    /// Parse a raw positional parameter. A leading `$` makes it a
    /// reference; everything else is taken literally.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(REFERENCE_SIGIL) {
            Some(field) => KeySource::Reference(field.replace('.', "/")),
            None => KeySource::Literal(raw.to_string()),
        }
    }

    /// Resolve the key against an event.
    ///
    /// Literals resolve to themselves. References read the named field,
    /// which must exist and hold a string.
    pub fn resolve(&self, event: &Event) -> Result<String> {
        match self {
            KeySource::Literal(key) => Ok(key.clone()),
            KeySource::Reference(path) => match event.get_str(path) {
                Some(key) => Ok(key.to_string()),
                None => Err(Error::malformed(format!(
                    "reference field '{path}' is missing or not a string"
                ))),
            },
        }
    }
}
