//! Integration tests for the telemetry store and selector engine

use deltakit_core::{HardwareHub, HardwareState, SelectorError, StatePatch, SubscriptionId};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_version_is_strictly_increasing_across_rejections() {
    let hub = HardwareHub::new();
    let mut last = hub.version();

    let patches = vec![
        StatePatch::new().with("super", json!({"supervisor": "IDLE", "mode": "NONE"})),
        StatePatch::new().with("super.supervisor[0]", 1),
        StatePatch::new().with("cpos", json!([0, 0, 0])),
        StatePatch::new().with("cpos[9]", 1),
        StatePatch::new().with("cpos[1]", 500),
    ];

    for patch in &patches {
        match hub.apply_patch(patch) {
            Ok(applied) => {
                assert!(applied.version > last);
                last = applied.version;
            }
            Err(_) => assert_eq!(hub.version(), last),
        }
    }

    assert_eq!(hub.version(), 3);
    assert_eq!(hub.get("cpos"), Some(json!([0, 500, 0])));
}

#[test]
fn test_position_observers_see_versions_in_order() {
    let hub = HardwareHub::new();
    let versions = Arc::new(Mutex::new(Vec::new()));
    let sink = versions.clone();

    hub.subscribe(
        |state: &HardwareState| Ok(state.variable("cpos").cloned()),
        move |_: &Option<Value>| sink.lock().push(()),
    );

    for i in 0..50 {
        hub.apply_patch(&StatePatch::new().with("cpos", json!([i, i, i])))
            .unwrap();
    }

    // initial + one per distinct position
    assert_eq!(versions.lock().len(), 51);
}

#[test]
fn test_unsubscribe_self_from_handler() {
    let hub = Arc::new(HardwareHub::new());
    let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));

    let (h, id_slot, c) = (hub.clone(), own_id.clone(), calls.clone());
    let id = hub
        .subscribe_path("super.supervisor", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_slot.lock() {
                h.unsubscribe(id);
            }
        })
        .unwrap();
    *own_id.lock() = Some(id);

    hub.apply_patch(&StatePatch::new().with("super.supervisor", "IDLE"))
        .unwrap();
    hub.apply_patch(&StatePatch::new().with("super.supervisor", "ARMED"))
        .unwrap();

    // initial call, then the first change which unsubscribes
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(hub.subscription_count(), 0);
}

#[test]
fn test_concurrent_readers_see_consistent_snapshots() {
    let hub = Arc::new(HardwareHub::new());
    hub.apply_patch(&StatePatch::new().with("cpos", json!([0, 0, 0])))
        .unwrap();

    let writer = {
        let hub = hub.clone();
        std::thread::spawn(move || {
            for i in 1..=200 {
                hub.apply_patch(&StatePatch::new().with("cpos", json!([i, i, i])))
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let hub = hub.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = hub.snapshot();
                    let cpos = snapshot.state().variable("cpos").cloned().unwrap();
                    let axes = cpos.as_array().unwrap();
                    // All three axes come from the same patch
                    assert_eq!(axes[0], axes[1]);
                    assert_eq!(axes[1], axes[2]);
                    assert_eq!(axes[0], json!(snapshot.version() - 1));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(hub.version(), 201);
}

fn mode_selector(state: &HardwareState) -> Result<Option<String>, SelectorError> {
    Ok(state
        .lookup("super.mode")
        .and_then(Value::as_str)
        .map(str::to_string))
}

proptest! {
    #[test]
    fn prop_handler_fires_iff_value_changes(modes in proptest::collection::vec(0u8..3, 1..40)) {
        let hub = HardwareHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.subscribe(mode_selector, move |v: &Option<String>| sink.lock().push(v.clone()));

        let mut expected = vec![None];
        for m in &modes {
            let name = format!("MODE{}", m);
            hub.apply_patch(&StatePatch::new().with("super.mode", name.clone())).unwrap();
            if expected.last() != Some(&Some(name.clone())) {
                expected.push(Some(name));
            }
        }

        let seen = seen.lock().clone();
        prop_assert_eq!(&seen, &expected);
        for pair in seen.windows(2) {
            prop_assert_ne!(&pair[0], &pair[1]);
        }
    }

    #[test]
    fn prop_version_never_repeats(ops in proptest::collection::vec((0usize..6, 0i64..5), 1..60)) {
        let hub = HardwareHub::new();
        let keys = ["cpos", "cpos[1]", "super.mode", "super", "moStat.pathing_state", "bad[key"];
        let mut versions = vec![hub.version()];

        for (k, v) in ops {
            let _ = hub.apply_patch(&StatePatch::new().with(keys[k], v));
            versions.push(hub.version());
        }

        for pair in versions.windows(2) {
            prop_assert!(pair[1] == pair[0] || pair[1] == pair[0] + 1);
        }
    }
}
