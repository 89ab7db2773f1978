//! Inbound state patches

use crate::error::StateError;
use serde_json::{Map, Value};

/// A partial telemetry update, applied atomically by the state store
///
/// Keys are telemetry paths in textual form. They are validated when the
/// patch is applied, so a malformed key rejects the whole patch there.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    writes: Vec<(String, Value)>,
}

impl StatePatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a write and return the patch, for chained construction
    pub fn with(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }

    /// Add a write
    pub fn set(&mut self, path: impl Into<String>, value: impl Into<Value>) {
        self.writes.push((path.into(), value.into()));
    }

    /// Build a patch from a JSON object whose keys are telemetry paths
    pub fn from_json(value: Value) -> Result<Self, StateError> {
        match value {
            Value::Object(map) => Ok(Self::from(map)),
            other => Err(StateError::InvalidPayload {
                reason: format!("patch must be a JSON object, got {}", other),
            }),
        }
    }

    /// Writes in application order
    pub fn writes(&self) -> &[(String, Value)] {
        &self.writes
    }

    /// Number of writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether the patch carries no writes
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl From<Map<String, Value>> for StatePatch {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            writes: map.into_iter().collect(),
        }
    }
}

impl TryFrom<Value> for StatePatch {
    type Error = StateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_keeps_order() {
        let patch = StatePatch::new()
            .with("super.supervisor", "ARMED")
            .with("moStat.pathing_state", 1);
        assert_eq!(patch.len(), 2);
        assert_eq!(patch.writes()[0].0, "super.supervisor");
        assert_eq!(patch.writes()[1].1, json!(1));
    }

    #[test]
    fn test_from_json_object() {
        let patch = StatePatch::from_json(json!({"cpos": [1, 2, 3]})).unwrap();
        assert_eq!(patch.writes(), &[("cpos".to_string(), json!([1, 2, 3]))]);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(matches!(
            StatePatch::from_json(json!(42)),
            Err(StateError::InvalidPayload { .. })
        ));
    }
}
