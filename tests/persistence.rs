//! Integration tests for preserve/restore
//!
//! Documents are taken at every tick and restored into fresh machines built
//! from a registry, the way a host recovers after a crash.

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use wfvm::vm::activities::{Assign, Breakpoint, Code, Delay, Sequence, Workflow};
use wfvm::vm::{
    ActivityRef, ActivityRegistry, ManualClock, PersistedDocument, Scope, StateError, Value, Vm,
    VmConfig, VmError,
};

type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, label: &'static str) -> ActivityRef {
    let events = events.clone();
    Code::new(label, move |_| {
        events.lock().push(label.to_string());
        Ok(())
    })
}

/// Restorable tree: setup breakpoint wrapping a body with a delay in it.
fn registry(events: &Events) -> ActivityRegistry {
    let events = events.clone();
    let mut registry = ActivityRegistry::new();
    registry
        .register("onboarding", move |options| {
            let start = options.get("start").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(Workflow::new(
                "onboarding",
                options.clone(),
                Breakpoint::wrap(
                    "SETUP",
                    "seed",
                    Sequence::new(vec![
                        Assign::inherit("age", start),
                        record(&events, "a"),
                        Delay::millis(50),
                        record(&events, "b"),
                    ]),
                ),
            ))
        })
        .unwrap();
    registry
}

#[tokio::test]
async fn test_preserve_restore_preserve_is_identical() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(&events);
    let clock = ManualClock::default();
    let root = registry.construct("onboarding", &json!({"start": 40})).unwrap();
    let mut vm = Vm::create(root).unwrap().with_clock(Arc::new(clock.clone()));
    let cancel = CancellationToken::new();

    let mut documents = Vec::new();
    for _ in 0..64 {
        documents.push(vm.preserve());
        if vm.is_paused() {
            vm.variables().define("name", "Maks", Scope::Inherit).unwrap();
            vm.resume("SETUP").unwrap();
        }
        if vm.tick(&cancel).await.unwrap() && vm.is_terminated() {
            break;
        }
        clock.advance(ChronoDuration::milliseconds(20));
    }
    assert!(vm.is_terminated());

    for document in documents {
        let text = document.to_json().unwrap();
        let restored = Vm::restore_json(&text, &registry, VmConfig::default()).unwrap();
        assert_eq!(restored.preserve(), document);
        assert_eq!(
            PersistedDocument::from_json(&restored.preserve().to_json().unwrap()).unwrap(),
            document
        );
    }
}

#[tokio::test]
async fn test_restore_mid_child_does_not_rerun_child() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(&events);
    let root = registry.construct("onboarding", &json!({"start": 7})).unwrap();
    let mut vm = Vm::create(root).unwrap();
    let cancel = CancellationToken::new();

    while !vm.tick(&cancel).await.unwrap() {}
    vm.resume("SETUP").unwrap();
    while events.lock().is_empty() {
        vm.tick(&cancel).await.unwrap();
    }
    let document = vm.preserve();
    drop(vm);

    let mut restored = Vm::restore(&document, &registry, VmConfig::default()).unwrap();
    assert!(!restored.is_paused());
    assert_eq!(restored.variables().get_int("age").unwrap(), 7);

    loop {
        if restored.tick(&cancel).await.unwrap() {
            if restored.is_terminated() {
                break;
            }
            tokio::time::sleep(restored.tick_countdown()).await;
        }
    }
    assert_eq!(*events.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_pending_wake_survives_restore() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(&events);
    let clock = ManualClock::default();
    let root = registry.construct("onboarding", &json!(null)).unwrap();
    let mut vm = Vm::create(root).unwrap().with_clock(Arc::new(clock.clone()));
    let cancel = CancellationToken::new();

    while !vm.tick(&cancel).await.unwrap() {}
    vm.resume("SETUP").unwrap();
    while !vm.tick(&cancel).await.unwrap() {}
    assert!(!vm.is_paused());
    assert_eq!(vm.stack().top().unwrap().activity().activity_type(), "Delay");

    let document = vm.preserve();
    let wake = document.pending_wake_time.expect("delay armed a wake time");
    assert!(document.root_options.is_none());

    let mut restored = Vm::restore(&document, &registry, VmConfig::default())
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    assert_eq!(restored.pending_wake(), Some(wake));
    assert!(restored.tick(&cancel).await.unwrap());
    assert_eq!(events.lock().len(), 1);

    clock.advance(ChronoDuration::milliseconds(50));
    while !restored.tick(&cancel).await.unwrap() {}
    assert!(restored.is_terminated());
    assert_eq!(*events.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_non_finite_floats_never_reach_the_document() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(&events);
    let root = registry.construct("onboarding", &json!(null)).unwrap();
    let mut vm = Vm::create(root).unwrap();
    let cancel = CancellationToken::new();

    while !vm.tick(&cancel).await.unwrap() {}
    assert!(vm.is_paused());

    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert!(matches!(
            vm.variables().define("ratio", bad, Scope::Inherit),
            Err(VmError::State(StateError::NotPersistable(_)))
        ));
    }
    vm.variables().define("ratio", 0.25, Scope::Inherit).unwrap();
    assert!(matches!(
        vm.variables().set("ratio", f64::NAN),
        Err(VmError::State(StateError::NotPersistable(_)))
    ));

    let text = vm.preserve().to_json().unwrap();
    assert!(text.contains("0.25"));
    let mut restored = Vm::restore_json(&text, &registry, VmConfig::default()).unwrap();
    assert_eq!(restored.variables().get_float("ratio").unwrap(), 0.25);
    assert_eq!(restored.preserve(), vm.preserve());
}

#[test]
fn test_document_decodes_hand_written_json() {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let text = r#"{
        "rootTypeId": "onboarding",
        "rootOptions": {"start": 1},
        "pendingWakeTime": "2030-01-01T00:00:00Z",
        "frames": [
            {"childIndex": 0, "invocationCount": 1, "variables": []},
            {"childIndex": 0, "invocationCount": 1, "variables": [
                {"name": "name", "scope": "INHERIT", "value": "Maks"},
                {"name": "profile", "scope": "LOCAL", "value": {"tags": ["a"]}},
                {"name": "ratio", "scope": "INHERIT", "value": 0.5}
            ]}
        ]
    }"#;

    let mut vm = Vm::restore_json(text, &registry(&events), VmConfig::default()).unwrap();
    assert_eq!(vm.stack().depth(), 2);
    assert!(vm.is_paused());
    assert_eq!(vm.variables().get_string("name").unwrap(), "Maks");
    assert_eq!(vm.variables().get_float("ratio").unwrap(), 0.5);
    assert_eq!(
        vm.variables().get::<Value>("profile").unwrap(),
        Value::Object(json!({"tags": ["a"]}))
    );
}
