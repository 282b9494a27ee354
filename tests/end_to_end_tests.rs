//! End-to-end scenarios through the engine and the in-memory processor.

use serde_json::json;

use strata_core::config::EngineConfig;
use strata_core::value::{event_from_json, Event, Value};
use strata_engine::{Engine, QueryState};

fn event(v: serde_json::Value) -> Event {
    event_from_json(&v).expect("valid event")
}

#[test]
fn test_single_target_query_activates_on_traffic() {
    let engine = Engine::in_memory(EngineConfig::default());
    engine.open("t", None, true).unwrap();
    engine.register("q1", None, "select a from t").unwrap();

    engine.send("t", &[event(json!({"a": 1, "b": "x"}))]).unwrap();

    let catalog = engine.catalog();
    assert_eq!(catalog.query("q1").unwrap().state, QueryState::Active);
    let fields = engine.fields("t").unwrap();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert!(fields[0].data_type.is_numeric());
}

#[test]
fn test_sub_query_targets_and_release() {
    let engine = Engine::in_memory(EngineConfig::default());
    engine
        .register("q", None, "select * from t1 where x in (select y from t2)")
        .unwrap();

    let info = engine.catalog().query("q").cloned().unwrap();
    assert_eq!(info.targets, vec!["t1".to_string(), "t2".to_string()]);
    assert_eq!(info.state, QueryState::Waiting);

    engine.send("t1", &[event(json!({"x": 1}))]).unwrap();
    engine.send("t2", &[event(json!({"y": 1}))]).unwrap();
    let catalog = engine.catalog();
    assert_eq!(catalog.query("q").unwrap().state, QueryState::Active);
    assert_eq!(catalog.target("t1").unwrap().query_fieldsets, 1);
    assert_eq!(catalog.target("t2").unwrap().query_fieldsets, 1);

    assert!(engine.deregister("q").unwrap());
    let catalog = engine.catalog();
    assert_eq!(catalog.target("t1").unwrap().query_fieldsets, 0);
    assert_eq!(catalog.target("t2").unwrap().query_fieldsets, 0);
    // Data fieldsets outlive the query.
    assert_eq!(catalog.target("t1").unwrap().data_fieldsets, 1);
}

#[test]
fn test_query_activated_mid_batch_sees_the_triggering_event() {
    let engine = Engine::in_memory(EngineConfig::default());
    engine.register("q", None, "select a from t").unwrap();

    let outcome = engine
        .send(
            "t",
            &[
                event(json!({"b": 1})),
                event(json!({"a": 2})),
                event(json!({"a": 3, "b": 4})),
            ],
        )
        .unwrap();
    assert_eq!(outcome.accepted, 3);

    let values: Vec<Value> = engine
        .output()
        .pop("q")
        .into_iter()
        .filter_map(|o| o.record.get("a").cloned())
        .collect();
    assert_eq!(values, vec![Value::Long(2), Value::Long(3)]);
}

#[test]
fn test_filtered_query_over_declared_target() {
    let engine = Engine::in_memory(EngineConfig::default());
    engine
        .register(
            "errors",
            Some("alerts"),
            "select path, status from access where status >= 500",
        )
        .unwrap();
    engine
        .send(
            "access",
            &[
                event(json!({"status": 503, "path": "/a"})),
                event(json!({"status": 200, "path": "/b"})),
                event(json!({"status": 500, "path": "/c", "ua": "curl"})),
            ],
        )
        .unwrap();

    let swept = engine.output().sweep(Some("alerts"));
    let paths: Vec<String> = swept["errors"]
        .iter()
        .map(|o| o.record.to_json()["path"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(paths, vec!["/a", "/c"]);
}

#[test]
fn test_engine_is_shared_across_threads() {
    use std::sync::Arc;
    use std::thread;

    let engine = Arc::new(Engine::in_memory(EngineConfig::default()));
    engine.register("q", None, "select n from t").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for j in 0..25 {
                    let e = event(json!({"n": i * 100 + j, "shape": i}));
                    engine.send("t", &[e]).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(engine.stats().events_accepted, 100);
    assert_eq!(engine.output().pop("q").len(), 100);
}
