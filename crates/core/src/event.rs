//! Event tree passed through the pipeline.
//!
//! This module defines [`Event`], the unit of work the lookup operators act
//! on: a JSON tree addressed by slash-separated field paths.
//!
//! # Field paths
//!
//! Paths look like `/agent/ip` or `agent/ip` (the leading slash is optional).
//! Each segment names an object key; a segment that parses as an integer also
//! indexes into arrays. The empty path names the whole tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// A security event as a JSON tree.
///
/// Newtype around `serde_json::Value` providing:
/// - Direct access to the underlying value via Deref/DerefMut
/// - Slash-separated field-path lookup and mutation
/// - Serialization/deserialization support
///
/// # Examples
///
/// ```
/// use vigil_core::Event;
///
/// let mut event: Event = r#"{"agent": {"ip": "10.0.0.7"}}"#.parse().unwrap();
/// assert_eq!(event.get_str("/agent/ip"), Some("10.0.0.7"));
///
/// event.set("/agent/label", serde_json::json!("edge"));
/// assert_eq!(event.get_str("/agent/label"), Some("edge"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Event(serde_json::Value);

impl Event {
    /// Create an empty event (an empty JSON object).
    pub fn new() -> Self {
        Event(Value::Object(Map::new()))
    }

    /// Create from a serde_json::Value
    pub fn from_value(value: Value) -> Self {
        Event(value)
    }

    /// Get the underlying serde_json::Value
    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Get a reference to the underlying serde_json::Value
    pub fn as_inner(&self) -> &Value {
        &self.0
    }

    /// Get a mutable reference to the underlying serde_json::Value
    pub fn as_inner_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    /// Get a reference to the value at a field path.
    ///
    /// Returns `None` if any path segment is absent or traverses a scalar.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for seg in segments(path) {
            current = match current {
                Value::Object(map) => map.get(seg)?,
                Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Get a mutable reference to the value at a field path.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut current = &mut self.0;
        for seg in segments(path) {
            current = match current {
                Value::Object(map) => map.get_mut(seg)?,
                Value::Array(items) => items.get_mut(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Get the string at a field path, or `None` if absent or not a string.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    /// True if a value exists at the field path.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set the value at a field path, creating intermediate objects as needed.
    ///
    /// Replaces whatever is already there. An intermediate segment that holds
    /// a scalar or array is overwritten with an object on the way down. The
    /// empty path replaces the whole tree.
    pub fn set(&mut self, path: &str, value: Value) {
        let segs: Vec<&str> = segments(path).collect();
        let Some((&last, parents)) = segs.split_last() else {
            self.0 = value;
            return;
        };

        let mut current = &mut self.0;
        for &seg in parents {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let map = current.as_object_mut().unwrap();
            current = map.entry(seg.to_string()).or_insert(Value::Null);
        }
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().unwrap();
        map.insert(last.to_string(), value);
    }

    /// Serialize to compact JSON string
    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }
}

/// Split a field path into its segments. Leading slash and empty segments are
/// ignored, so `""` yields no segments (the root) and `"/a/b"` yields `a, b`.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|seg| !seg.is_empty())
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

impl Deref for Event {
    type Target = Value;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Event {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Event(value)
    }
}

impl From<Event> for Value {
    fn from(event: Event) -> Self {
        event.0
    }
}

impl FromStr for Event {
    type Err = serde_json::Error;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Event(serde_json::from_str(text)?))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
