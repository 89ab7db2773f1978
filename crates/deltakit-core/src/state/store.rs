//! Versioned telemetry store
//!
//! Holds the canonical [`HardwareState`] behind a copy-on-write snapshot.
//! Each accepted patch produces a brand-new snapshot with the next version,
//! so readers holding an older `Arc<StateSnapshot>` keep a consistent view
//! while a patch is being applied.

use super::hardware_state::HardwareState;
use super::patch::StatePatch;
use super::path::StatePath;
use crate::error::StateError;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// An immutable view of the telemetry at one version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    version: u64,
    state: HardwareState,
}

impl StateSnapshot {
    /// Version this snapshot was produced at
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The telemetry tree
    pub fn state(&self) -> &HardwareState {
        &self.state
    }
}

/// Outcome of an accepted patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    /// Version produced by the patch
    pub version: u64,
    /// Top-level variables whose value actually changed
    pub changed: BTreeSet<String>,
}

/// Owner of the canonical telemetry snapshot
#[derive(Debug)]
pub struct StateStore {
    current: RwLock<Arc<StateSnapshot>>,
    /// Serializes writers so applies never interleave
    writer: Mutex<()>,
}

impl StateStore {
    /// Create an empty store at version 0
    pub fn new() -> Self {
        Self::with_state(HardwareState::new())
    }

    /// Create a store seeded with an initial state at version 0
    pub fn with_state(state: HardwareState) -> Self {
        Self {
            current: RwLock::new(Arc::new(StateSnapshot { version: 0, state })),
            writer: Mutex::new(()),
        }
    }

    /// Merge a patch into the snapshot
    ///
    /// The patch is applied to a copy; if any key is malformed the copy is
    /// discarded and the previous snapshot and version stay in place.
    pub fn apply(&self, patch: &StatePatch) -> Result<AppliedPatch, StateError> {
        let _writer = self.writer.lock();
        let previous = self.snapshot();

        let mut next = previous.state.clone();
        let mut touched = BTreeSet::new();
        for (key, value) in patch.writes() {
            let result = StatePath::parse(key).and_then(|path| {
                touched.insert(path.root().to_string());
                next.write(&path, value.clone())
            });
            if let Err(e) = result {
                tracing::warn!(
                    "Rejected state patch at version {}: {}",
                    previous.version,
                    e
                );
                return Err(e);
            }
        }

        let changed: BTreeSet<String> = touched
            .into_iter()
            .filter(|name| previous.state.variable(name) != next.variable(name))
            .collect();

        let version = previous.version + 1;
        *self.current.write() = Arc::new(StateSnapshot {
            version,
            state: next,
        });

        tracing::debug!(
            "Applied state patch v{} ({} writes, changed: {:?})",
            version,
            patch.len(),
            changed
        );

        Ok(AppliedPatch { version, changed })
    }

    /// Current value at `path`, or `None` if absent or unparseable
    pub fn get(&self, path: &str) -> Option<Value> {
        self.snapshot().state.lookup(path).cloned()
    }

    /// Current value at a parsed path
    pub fn get_path(&self, path: &StatePath) -> Option<Value> {
        self.snapshot().state.get(path).cloned()
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.current.read().clone()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
