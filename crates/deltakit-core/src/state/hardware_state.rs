//! Canonical device telemetry tree

use super::path::{PathSegment, StatePath};
use crate::error::StateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device-reported telemetry, keyed by top-level variable name
///
/// Only the state store mutates this; everything else sees it through
/// immutable snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HardwareState {
    root: Map<String, Value>,
}

impl HardwareState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from a JSON object
    pub fn from_value(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(StateError::InvalidPayload {
                reason: format!("state must be a JSON object, got {}", type_name(&other)),
            }),
        }
    }

    /// Value at a parsed path
    pub fn get(&self, path: &StatePath) -> Option<&Value> {
        let mut segments = path.segments().iter();
        let mut current = match segments.next() {
            Some(PathSegment::Key(key)) => self.root.get(key)?,
            _ => return None,
        };
        for segment in segments {
            current = match segment {
                PathSegment::Key(key) => current.as_object()?.get(key)?,
                PathSegment::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        Some(current)
    }

    /// Value at a textual path; unparseable paths read as absent
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let path = StatePath::parse(path).ok()?;
        self.get(&path)
    }

    /// Value of a top-level variable
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    /// Names of all top-level variables
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }

    /// Number of top-level variables
    pub fn len(&self) -> usize {
        self.root.len()
    }

    /// Whether no telemetry has been received
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The raw top-level map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Write a value at `path`
    ///
    /// Objects merge recursively into existing objects; arrays and scalars
    /// replace. Missing intermediate containers are created. On error the
    /// state may be partially written, so callers work on a copy.
    pub(crate) fn write(&mut self, path: &StatePath, value: Value) -> Result<(), StateError> {
        let slot = self.root.entry(path.root().to_string()).or_insert(Value::Null);
        write_at(slot, path, 1, value)
    }
}

fn write_at(slot: &mut Value, path: &StatePath, depth: usize, value: Value) -> Result<(), StateError> {
    let segments = path.segments();
    if depth == segments.len() {
        merge_value(slot, value);
        return Ok(());
    }

    match &segments[depth] {
        PathSegment::Key(key) => {
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            let map = slot
                .as_object_mut()
                .ok_or_else(|| conflict(path, depth))?;
            let child = map.entry(key.clone()).or_insert(Value::Null);
            write_at(child, path, depth + 1, value)
        }
        PathSegment::Index(index) => {
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            let items = slot
                .as_array_mut()
                .ok_or_else(|| conflict(path, depth))?;
            let len = items.len();
            if *index == len {
                items.push(Value::Null);
            }
            let child = items
                .get_mut(*index)
                .ok_or_else(|| StateError::IndexOutOfRange {
                    path: path.to_string(),
                    index: *index,
                    len,
                })?;
            write_at(child, path, depth + 1, value)
        }
    }
}

/// Recursive merge: objects into objects, everything else replaces.
fn merge_value(slot: &mut Value, value: Value) {
    match (slot, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, child) in incoming {
                merge_value(existing.entry(key).or_insert(Value::Null), child);
            }
        }
        (slot, value) => *slot = value,
    }
}

fn conflict(path: &StatePath, depth: usize) -> StateError {
    StateError::PathConflict {
        path: path.to_string(),
        prefix: path.prefix(depth),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
