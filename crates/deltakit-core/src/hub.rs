//! Hardware hub
//!
//! Owns the state store and the selector engine for one process and is the
//! single entry point for inbound telemetry. Applying a patch and notifying
//! subscribers happen under one gate, so every notification pass sees exactly
//! the state produced by its patch.

use crate::error::{SelectorError, StateError};
use crate::selector::{select_path, NotifyReport, SelectorEngine, SubscriptionId};
use crate::state::{AppliedPatch, HardwareState, StatePatch, StatePath, StateSnapshot, StateStore};
use parking_lot::ReentrantMutex;
use serde_json::Value;
use std::sync::Arc;

/// Canonical telemetry plus its observers
pub struct HardwareHub {
    store: StateStore,
    engine: SelectorEngine,
    /// Serializes apply+notify and subscribe. Reentrant so a change handler
    /// may apply a patch or subscribe from inside a notification pass.
    gate: ReentrantMutex<()>,
}

impl HardwareHub {
    /// Create a hub with empty telemetry
    pub fn new() -> Self {
        Self::with_state(HardwareState::new())
    }

    /// Create a hub seeded with telemetry at version 0
    pub fn with_state(state: HardwareState) -> Self {
        Self {
            store: StateStore::with_state(state),
            engine: SelectorEngine::new(),
            gate: ReentrantMutex::new(()),
        }
    }

    /// Apply an inbound patch and notify subscribers
    ///
    /// A malformed patch is rejected without touching the snapshot and no
    /// subscriber is notified.
    pub fn apply_patch(&self, patch: &StatePatch) -> Result<AppliedPatch, StateError> {
        let _gate = self.gate.lock();
        let applied = self.store.apply(patch)?;
        let snapshot = self.store.snapshot();
        let report = self.engine.notify(&snapshot);
        log_report(&applied, &report);
        Ok(applied)
    }

    /// Register a selector; the handler is called once with the initial value
    pub fn subscribe<T, S, F>(&self, selector: S, on_change: F) -> SubscriptionId
    where
        T: PartialEq + Clone + Send + 'static,
        S: Fn(&HardwareState) -> Result<T, SelectorError> + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let _gate = self.gate.lock();
        let snapshot = self.store.snapshot();
        self.engine.subscribe(&snapshot, selector, on_change)
    }

    /// Subscribe to the value at a telemetry path
    pub fn subscribe_path<F>(&self, path: &str, on_change: F) -> Result<SubscriptionId, StateError>
    where
        F: Fn(&Option<Value>) + Send + Sync + 'static,
    {
        let path = StatePath::parse(path)?;
        Ok(self.subscribe(select_path(path), on_change))
    }

    /// Remove a subscription; idempotent
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.engine.unsubscribe(id)
    }

    /// Current value at `path`
    pub fn get(&self, path: &str) -> Option<Value> {
        self.store.get(path)
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.store.snapshot()
    }

    /// Get the number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.engine.subscription_count()
    }

    /// Drop all subscriptions
    ///
    /// Telemetry is kept and later patches still apply; they just notify
    /// nobody until new subscriptions are registered.
    pub fn shutdown(&self) {
        let _gate = self.gate.lock();
        self.engine.clear();
        tracing::debug!("Hardware hub shut down at version {}", self.store.version());
    }
}

fn log_report(applied: &AppliedPatch, report: &NotifyReport) {
    if report.failed > 0 {
        tracing::warn!(
            "v{}: {} of {} selectors failed",
            applied.version,
            report.failed,
            report.evaluated
        );
    }
    tracing::trace!(
        "v{}: {} evaluated, {} changed",
        applied.version,
        report.evaluated,
        report.changed
    );
}

impl Default for HardwareHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HardwareHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareHub")
            .field("version", &self.version())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::derive_supervisor_label;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_apply_notifies_path_subscribers() {
        let hub = HardwareHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.subscribe_path("super.supervisor", move |v| sink.lock().push(v.clone()))
            .unwrap();

        hub.apply_patch(&StatePatch::new().with("super.supervisor", "IDLE"))
            .unwrap();
        hub.apply_patch(&StatePatch::new().with("cpos", json!([0, 0, 0])))
            .unwrap();
        hub.apply_patch(&StatePatch::new().with("super.supervisor", "ARMED"))
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![None, Some(json!("IDLE")), Some(json!("ARMED"))]
        );
    }

    #[test]
    fn test_malformed_patch_notifies_nobody() {
        let hub = HardwareHub::new();
        hub.apply_patch(&StatePatch::new().with("super", 1)).unwrap();
        let calls = Arc::new(Mutex::new(0));
        let c = calls.clone();
        hub.subscribe(|s: &HardwareState| Ok(s.clone()), move |_| *c.lock() += 1);

        assert!(hub
            .apply_patch(&StatePatch::new().with("super.mode", "TRACK"))
            .is_err());
        assert_eq!(*calls.lock(), 1);
        assert_eq!(hub.version(), 1);
    }

    #[test]
    fn test_derived_label_subscription() {
        let hub = HardwareHub::new();
        let labels = Arc::new(Mutex::new(Vec::new()));
        let sink = labels.clone();
        hub.subscribe(
            |s: &HardwareState| Ok(derive_supervisor_label(s)),
            move |label: &String| sink.lock().push(label.clone()),
        );

        hub.apply_patch(&StatePatch::new().with("super.supervisor", "ARMED"))
            .unwrap();
        hub.apply_patch(&StatePatch::new().with("moStat.pathing_state", 1))
            .unwrap();
        hub.apply_patch(&StatePatch::new().with("moStat.pathing_state", 1))
            .unwrap();
        hub.apply_patch(&StatePatch::new().with("moStat.pathing_state", 0))
            .unwrap();

        assert_eq!(*labels.lock(), vec!["UNKNOWN", "ARMED", "MOVING", "ARMED"]);
    }

    #[test]
    fn test_handler_may_apply_patch_reentrantly() {
        let hub = Arc::new(HardwareHub::new());
        let inner = hub.clone();
        hub.subscribe_path("request", move |v| {
            if v.is_some() {
                let _ = inner.apply_patch(&StatePatch::new().with("ack", true));
            }
        })
        .unwrap();
        let acks = Arc::new(Mutex::new(Vec::new()));
        let sink = acks.clone();
        hub.subscribe_path("ack", move |v| sink.lock().push(v.clone()))
            .unwrap();

        hub.apply_patch(&StatePatch::new().with("request", 1)).unwrap();

        assert_eq!(hub.version(), 2);
        assert_eq!(*acks.lock(), vec![None, Some(json!(true))]);
    }

    #[test]
    fn test_subscribe_unsubscribe_churn_leaves_nothing() {
        let hub = HardwareHub::new();
        for i in 0..1000 {
            let id = hub
                .subscribe_path("cpos[0]", |_| {})
                .unwrap();
            assert!(hub.unsubscribe(id));
            if i % 100 == 0 {
                hub.apply_patch(&StatePatch::new().with("cpos", json!([i, 0, 0])))
                    .unwrap();
            }
        }
        assert_eq!(hub.subscription_count(), 0);
    }

    #[test]
    fn test_shutdown_clears_subscriptions_but_keeps_state() {
        let hub = HardwareHub::new();
        hub.subscribe_path("cpos", |_| {}).unwrap();
        hub.apply_patch(&StatePatch::new().with("cpos", json!([1, 2, 3])))
            .unwrap();
        hub.shutdown();
        assert_eq!(hub.subscription_count(), 0);
        assert_eq!(hub.get("cpos[2]"), Some(json!(3)));
        hub.apply_patch(&StatePatch::new().with("cpos", json!([4, 5, 6])))
            .unwrap();
        assert_eq!(hub.version(), 2);
    }
}
