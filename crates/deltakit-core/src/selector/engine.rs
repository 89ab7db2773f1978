//! Selector subscription engine.
//!
//! Observers register a pure projection over the telemetry snapshot and a
//! change handler. After every accepted patch the engine re-evaluates each
//! live projection and calls the handler only when the projected value
//! differs from the previous one.

use crate::error::SelectorError;
use crate::state::{HardwareState, StateSnapshot};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Subscription handle for unsubscribing from a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Result of evaluating one subscription against one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evaluation {
    /// Value differed; handler was called
    Changed,
    /// Value equal to the previous one
    Unchanged,
    /// Selector failed; previous value kept
    Failed,
    /// Already evaluated at this version or newer, or released
    Skipped,
}

/// Counters from one notification pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Subscriptions whose selector ran
    pub evaluated: usize,
    /// Subscriptions whose handler fired
    pub changed: usize,
    /// Subscriptions whose selector failed
    pub failed: usize,
}

/// Type-erased view of a subscription, so selectors of different output
/// types share one registry
trait LiveSubscription: Send + Sync {
    fn id(&self) -> SubscriptionId;
    fn evaluate(&self, snapshot: &StateSnapshot) -> Evaluation;
    fn deactivate(&self);
}

type Selector<T> = Box<dyn Fn(&HardwareState) -> Result<T, SelectorError> + Send + Sync>;
type ChangeHandler<T> = Box<dyn Fn(&T) + Send + Sync>;

struct LastSeen<T> {
    value: Option<T>,
    version: Option<u64>,
}

struct TypedSubscription<T> {
    id: SubscriptionId,
    selector: Selector<T>,
    on_change: ChangeHandler<T>,
    last: Mutex<LastSeen<T>>,
    active: AtomicBool,
}

impl<T> TypedSubscription<T>
where
    T: PartialEq + Clone + Send + 'static,
{
    fn select(&self, state: &HardwareState) -> Result<T, SelectorError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.selector)(state))) {
            Ok(result) => result,
            Err(payload) => Err(SelectorError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    fn fire(&self, value: &T) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.on_change)(value))) {
            tracing::error!(
                "Change handler for {} panicked: {}",
                self.id,
                panic_message(payload.as_ref())
            );
        }
    }
}

impl<T> LiveSubscription for TypedSubscription<T>
where
    T: PartialEq + Clone + Send + 'static,
{
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn evaluate(&self, snapshot: &StateSnapshot) -> Evaluation {
        if !self.active.load(Ordering::Acquire) {
            return Evaluation::Skipped;
        }

        let changed = {
            let mut last = self.last.lock();
            if last.version.is_some_and(|seen| seen >= snapshot.version()) {
                return Evaluation::Skipped;
            }
            last.version = Some(snapshot.version());

            match self.select(snapshot.state()) {
                Ok(value) => {
                    let differs = last.value.as_ref() != Some(&value);
                    last.value = Some(value.clone());
                    differs.then_some(value)
                }
                Err(e) => {
                    tracing::warn!(
                        "Selector for {} failed at version {}: {}",
                        self.id,
                        snapshot.version(),
                        e
                    );
                    return Evaluation::Failed;
                }
            }
        };

        // Handlers run without the lock held so they may unsubscribe or
        // apply further patches.
        match changed {
            Some(value) => {
                self.fire(&value);
                Evaluation::Changed
            }
            None => Evaluation::Unchanged,
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Registry of selector subscriptions
///
/// The engine does not own the state; callers pass the snapshot to evaluate
/// against and must serialize `subscribe` with `notify` (the hardware hub
/// does this) so no subscription sees versions out of order.
#[derive(Default)]
pub struct SelectorEngine {
    /// Live subscriptions in registration order
    subscriptions: RwLock<Vec<Arc<dyn LiveSubscription>>>,
}

impl SelectorEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a selector and its change handler
    ///
    /// The selector is evaluated immediately against `snapshot` and the
    /// handler is called once with that initial value, so observers have a
    /// single code path for first and later values. If the initial
    /// evaluation fails the handler is not called; the first successful
    /// evaluation after a patch will notify instead.
    pub fn subscribe<T, S, F>(&self, snapshot: &StateSnapshot, selector: S, on_change: F) -> SubscriptionId
    where
        T: PartialEq + Clone + Send + 'static,
        S: Fn(&HardwareState) -> Result<T, SelectorError> + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let subscription = Arc::new(TypedSubscription {
            id,
            selector: Box::new(selector),
            on_change: Box::new(on_change),
            last: Mutex::new(LastSeen {
                value: None,
                version: None,
            }),
            active: AtomicBool::new(true),
        });

        self.subscriptions.write().push(subscription.clone());
        tracing::debug!("Subscription {} added", id);

        subscription.evaluate(snapshot);
        id
    }

    /// Remove a subscription
    ///
    /// Idempotent, and safe to call from inside a change handler. Returns
    /// true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.write();
            subscriptions
                .iter()
                .position(|s| s.id() == id)
                .map(|index| subscriptions.remove(index))
        };
        match removed {
            Some(subscription) => {
                subscription.deactivate();
                tracing::debug!("Subscription {} removed", id);
                true
            }
            None => false,
        }
    }

    /// Re-evaluate every live subscription against `snapshot`
    ///
    /// Iterates over a copy of the registry, so handlers that subscribe or
    /// unsubscribe never cause entries to be skipped or visited twice.
    /// Entries released mid-pass are not evaluated.
    pub fn notify(&self, snapshot: &StateSnapshot) -> NotifyReport {
        let live: Vec<Arc<dyn LiveSubscription>> = self.subscriptions.read().clone();
        let mut report = NotifyReport::default();

        for subscription in live {
            match subscription.evaluate(snapshot) {
                Evaluation::Changed => {
                    report.evaluated += 1;
                    report.changed += 1;
                }
                Evaluation::Unchanged => report.evaluated += 1,
                Evaluation::Failed => {
                    report.evaluated += 1;
                    report.failed += 1;
                }
                Evaluation::Skipped => {}
            }
        }

        report
    }

    /// Get the number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Drop every subscription
    pub fn clear(&self) {
        let drained: Vec<_> = self.subscriptions.write().drain(..).collect();
        for subscription in &drained {
            subscription.deactivate();
        }
        if !drained.is_empty() {
            tracing::debug!("Cleared {} subscriptions", drained.len());
        }
    }
}

impl std::fmt::Debug for SelectorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorEngine")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StatePatch, StateStore};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    fn supervisor(state: &HardwareState) -> Result<Option<Value>, SelectorError> {
        Ok(state.lookup("super.supervisor").cloned())
    }

    #[test]
    fn test_initial_value_is_delivered_once() {
        let store = StateStore::new();
        store.apply(&StatePatch::new().with("super.supervisor", "IDLE")).unwrap();
        let engine = SelectorEngine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        engine.subscribe(&store.snapshot(), supervisor, move |v| sink.lock().push(v.clone()));

        assert_eq!(*seen.lock(), vec![Some(json!("IDLE"))]);
        assert_eq!(engine.subscription_count(), 1);
    }

    #[test]
    fn test_fires_only_on_change() {
        let store = StateStore::new();
        let engine = SelectorEngine::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        engine.subscribe(&store.snapshot(), supervisor, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Unrelated variable: selector result unchanged
        store.apply(&StatePatch::new().with("cpos", json!([1, 2, 3]))).unwrap();
        let report = engine.notify(&store.snapshot());
        assert_eq!(report.changed, 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        store.apply(&StatePatch::new().with("super.supervisor", "ARMED")).unwrap();
        engine.notify(&store.snapshot());
        assert_eq!(count.load(Ordering::SeqCst), 2);

        store.apply(&StatePatch::new().with("super.supervisor", "ARMED")).unwrap();
        engine.notify(&store.snapshot());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_same_version_is_not_evaluated_twice() {
        let store = StateStore::new();
        let engine = SelectorEngine::new();
        let evaluations = Arc::new(AtomicUsize::new(0));

        let e = evaluations.clone();
        engine.subscribe(
            &store.snapshot(),
            move |_: &HardwareState| {
                e.fetch_add(1, Ordering::SeqCst);
                Ok(0u8)
            },
            |_| {},
        );
        let report = engine.notify(&store.snapshot());
        assert_eq!(report.evaluated, 0);
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_selector_is_isolated() {
        let store = StateStore::new();
        let engine = SelectorEngine::new();
        let healthy = Arc::new(AtomicUsize::new(0));

        engine.subscribe(
            &store.snapshot(),
            |_: &HardwareState| -> Result<u8, SelectorError> { panic!("broken selector") },
            |_| {},
        );
        engine.subscribe(
            &store.snapshot(),
            |_: &HardwareState| -> Result<u8, SelectorError> {
                Err(SelectorError::Other {
                    message: "always fails".to_string(),
                })
            },
            |_| {},
        );
        let h = healthy.clone();
        engine.subscribe(&store.snapshot(), supervisor, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        store.apply(&StatePatch::new().with("super.supervisor", "IDLE")).unwrap();
        let report = engine.notify(&store.snapshot());
        assert_eq!(report.failed, 2);
        assert_eq!(report.changed, 1);
        assert_eq!(healthy.load(Ordering::SeqCst), 2);
        assert_eq!(engine.subscription_count(), 3);
    }

    #[test]
    fn test_failure_keeps_previous_value() {
        let store = StateStore::new();
        store.apply(&StatePatch::new().with("mode", "A")).unwrap();
        let engine = SelectorEngine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        engine.subscribe(
            &store.snapshot(),
            |state: &HardwareState| {
                state
                    .lookup("mode")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or(SelectorError::Missing {
                        path: "mode".to_string(),
                    })
            },
            move |v: &String| sink.lock().push(v.clone()),
        );

        store.apply(&StatePatch::new().with("mode", 7)).unwrap();
        engine.notify(&store.snapshot());
        store.apply(&StatePatch::new().with("mode", "A")).unwrap();
        engine.notify(&store.snapshot());
        store.apply(&StatePatch::new().with("mode", "B")).unwrap();
        engine.notify(&store.snapshot());

        // "A" again after the failure is not a change
        assert_eq!(*seen.lock(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let engine = SelectorEngine::new();
        let id = engine.subscribe(&StateSnapshot::default(), supervisor, |_| {});
        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
        assert_eq!(engine.subscription_count(), 0);
    }

    #[test]
    fn test_unsubscribe_inside_handler_does_not_skip_others() {
        let store = StateStore::new();
        let engine = Arc::new(SelectorEngine::new());
        let victim: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(Mutex::new(Vec::new()));

        let (h, eng, v) = (hits.clone(), engine.clone(), victim.clone());
        engine.subscribe(&store.snapshot(), supervisor, move |_| {
            h.lock().push("first");
            if let Some(id) = *v.lock() {
                eng.unsubscribe(id);
            }
        });
        let h = hits.clone();
        let second = engine.subscribe(&store.snapshot(), supervisor, move |_| h.lock().push("second"));
        let h = hits.clone();
        engine.subscribe(&store.snapshot(), supervisor, move |_| h.lock().push("third"));
        *victim.lock() = Some(second);
        hits.lock().clear();

        store.apply(&StatePatch::new().with("super.supervisor", "ARMED")).unwrap();
        engine.notify(&store.snapshot());

        assert_eq!(*hits.lock(), vec!["first", "third"]);
        assert_eq!(engine.subscription_count(), 2);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let store = StateStore::new();
        let engine = SelectorEngine::new();
        let after = Arc::new(AtomicUsize::new(0));

        engine.subscribe(&store.snapshot(), supervisor, |v| {
            if v.is_some() {
                panic!("handler blew up");
            }
        });
        let a = after.clone();
        engine.subscribe(&store.snapshot(), supervisor, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        store.apply(&StatePatch::new().with("super.supervisor", "IDLE")).unwrap();
        engine.notify(&store.snapshot());
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_drops_everything() {
        let engine = SelectorEngine::new();
        for _ in 0..5 {
            engine.subscribe(&StateSnapshot::default(), supervisor, |_| {});
        }
        engine.clear();
        assert_eq!(engine.subscription_count(), 0);
    }
}
