use serde::{Deserialize, Serialize};

use super::*;
use crate::record::EventRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Counter {
    id: String,
    value: i64,
}

impl Aggregate for Counter {
    const KIND: &'static str = "counter";

    fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            value: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Incremented {
    by: i64,
}

impl Event<Counter> for Incremented {
    const NAME: &'static str = "COUNTER_INCREMENTED";

    fn apply_to(&self, state: &mut Counter) {
        state.value += self.by;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Reset;

impl Event<Counter> for Reset {
    const NAME: &'static str = "COUNTER_RESET";

    fn apply_to(&self, state: &mut Counter) {
        state.value = 0;
    }
}

// Second aggregate claiming an already-owned event name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Gauge {
    id: String,
}

impl Aggregate for Gauge {
    const KIND: &'static str = "gauge";

    fn empty(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GaugeIncremented;

impl Event<Gauge> for GaugeIncremented {
    const NAME: &'static str = "COUNTER_INCREMENTED";

    fn apply_to(&self, _state: &mut Gauge) {}
}

fn counter_registry() -> AggregateRegistry {
    let mut registry = AggregateRegistry::new();
    registry
        .register::<Counter, _>(|reg| {
            reg.event::<Incremented>()?.event::<Reset>()?;
            Ok(())
        })
        .expect("registration");
    registry
}

#[test]
fn lookup_after_register_succeeds() {
    let registry = counter_registry();
    let entry = registry.lookup::<Counter>().expect("registered");
    assert!(entry.has_event("COUNTER_INCREMENTED"));
    assert!(entry.has_event("COUNTER_RESET"));
}

#[test]
fn lookup_unregistered_fails() {
    let registry = counter_registry();
    let err = registry.lookup::<Gauge>().unwrap_err();
    assert!(matches!(err, RegistryError::NotRegistered { kind } if kind == "gauge"));
}

#[test]
fn entry_debug_names_kind_and_events() {
    let registry = counter_registry();
    let entry = registry.lookup::<Counter>().unwrap();
    let rendered = format!("{entry:?}");
    assert!(rendered.contains("counter"));
    assert!(rendered.contains("COUNTER_INCREMENTED"));
}

#[test]
fn empty_state_uses_factory() {
    let registry = counter_registry();
    let entry = registry.lookup::<Counter>().unwrap();
    let state = entry.empty_state("c-1");
    assert_eq!(state, Counter { id: "c-1".into(), value: 0 });
}

#[test]
fn re_register_merges_additional_events() {
    let mut registry = AggregateRegistry::new();
    registry
        .register::<Counter, _>(|reg| {
            reg.event::<Incremented>()?;
            Ok(())
        })
        .unwrap();
    registry
        .register::<Counter, _>(|reg| {
            reg.event::<Reset>()?;
            Ok(())
        })
        .unwrap();
    let entry = registry.lookup::<Counter>().unwrap();
    assert!(entry.has_event("COUNTER_INCREMENTED"));
    assert!(entry.has_event("COUNTER_RESET"));
}

#[test]
fn same_event_type_registered_twice_is_a_noop() {
    let mut registry = counter_registry();
    registry
        .register::<Counter, _>(|reg| {
            reg.event::<Incremented>()?;
            Ok(())
        })
        .expect("merge of identical binding");
}

#[test]
fn same_name_different_type_is_rejected() {
    let mut registry = counter_registry();
    let err = registry
        .register::<Gauge, _>(|reg| {
            reg.event::<GaugeIncremented>()?;
            Ok(())
        })
        .unwrap_err();
    match err {
        RegistryError::DuplicateRegistration { name, owner } => {
            assert_eq!(name, "COUNTER_INCREMENTED");
            assert_eq!(owner, "counter");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn apply_record_folds_payload_into_state() {
    let registry = counter_registry();
    let entry = registry.lookup::<Counter>().unwrap();
    let mut state = entry.empty_state("c-1");

    let record = EventRecord::new(
        "c-1",
        1,
        "COUNTER_INCREMENTED",
        serde_json::to_string(&Incremented { by: 5 }).unwrap(),
    );
    entry.apply_record(&mut state, &record).unwrap();
    assert_eq!(state.value, 5);
}

#[test]
fn apply_record_with_unknown_title_fails() {
    let registry = counter_registry();
    let entry = registry.lookup::<Counter>().unwrap();
    let mut state = entry.empty_state("c-1");

    let record = EventRecord::new("c-1", 1, "UNKNOWN", "{}".to_string());
    let err = entry.apply_record(&mut state, &record).unwrap_err();
    assert!(matches!(err, RegistryError::UnknownEventTitle { .. }));
}

#[test]
fn apply_record_with_malformed_payload_fails() {
    let registry = counter_registry();
    let entry = registry.lookup::<Counter>().unwrap();
    let mut state = entry.empty_state("c-1");

    let record = EventRecord::new("c-1", 1, "COUNTER_INCREMENTED", "not json".to_string());
    let err = entry.apply_record(&mut state, &record).unwrap_err();
    assert!(matches!(err, RegistryError::Codec(_)));
}
