//! Edge case tests for cirrus-engine
//!
//! These tests drive the public API end to end: mutate objects, build and
//! settle save requests, rehydrate documents and compile queries.

use cirrus_engine::{
    build_deep_requests, build_requests, build_shallow_requests, ClassSchema, Constraint, Error,
    FieldDef, GeoPoint, Operation, Query, Request, SaveOutcome, Schema, Store, Value, ValueKind,
};
use serde_json::json;

fn create_test_schema() -> Schema {
    Schema::new().with_class(ClassSchema::new(
        "Item",
        vec![
            FieldDef::required("name", ValueKind::String),
            FieldDef::optional("count", ValueKind::Number),
            FieldDef::optional("tags", ValueKind::Array),
            FieldDef::any("data"),
        ],
    ))
}

fn settle(store: &Store, request: &Request, object_id: &str) {
    store
        .commit(
            request.object(),
            request.generation(),
            SaveOutcome {
                object_id: Some(object_id.to_string()),
                created_at: None,
                updated_at: None,
            },
        )
        .unwrap();
}

// ============================================================================
// Value Edge Cases
// ============================================================================

#[test]
fn unicode_strings_survive_the_wire() {
    let names = [
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "",
    ];
    for name in names {
        let value = Value::from(name);
        assert_eq!(Value::from_json(&value.to_json()).unwrap(), value);
    }
}

#[test]
fn nested_values_keep_their_tags() {
    let mut map = std::collections::BTreeMap::new();
    map.insert("when".to_string(), Value::from(chrono::DateTime::UNIX_EPOCH));
    map.insert("blob".to_string(), Value::bytes(vec![0u8, 1, 2, 255]));
    let value = Value::from(vec![Value::Map(map), Value::Null]);

    let json = value.to_json();
    assert_eq!(json[0]["when"]["__type"], "Date");
    assert_eq!(json[0]["blob"]["__type"], "Bytes");
    assert_eq!(Value::from_json(&json).unwrap(), value);
}

#[test]
fn unknown_type_tag_is_rejected() {
    let result = Value::from_json(&json!({"__type": "Mystery", "x": 1}));
    assert!(matches!(result, Err(Error::UnsupportedNativeType(_))));
}

#[test]
fn large_integers_stay_integers() {
    let value = Value::from(9_007_199_254_740_991i64);
    assert_eq!(value.to_json(), json!(9_007_199_254_740_991i64));
}

// ============================================================================
// Object and Ledger Edge Cases
// ============================================================================

#[test]
fn set_then_delete_leaves_a_delete() {
    let store = Store::default();
    let object = store
        .rehydrate("Item", &json!({"objectId": "i1", "name": "x"}))
        .unwrap();
    object.set("name", "y").unwrap();
    object.unset("name").unwrap();

    assert_eq!(object.pending()["name"], Operation::delete("name"));
    assert_eq!(object.get("name"), None);
    assert_eq!(object.stable("name"), Some(Value::from("x")));
}

#[test]
fn set_then_increment_is_absorbed() {
    let store = Store::default();
    let object = store.create("Item");
    object.set("count", 10).unwrap();
    object.increment("count", 5.0).unwrap();

    assert_eq!(object.pending()["count"], Operation::set("count", 15));
}

#[test]
fn array_operations_merge() {
    let store = Store::default();
    let object = store.create("Item");
    object.append("tags", vec!["a".into()]).unwrap();
    object.append("tags", vec!["b".into()]).unwrap();

    assert_eq!(
        object.pending()["tags"],
        Operation::add("tags", vec!["a".into(), "b".into()])
    );

    object.remove("tags", vec!["a".into()]).unwrap();
    assert_eq!(
        object.pending()["tags"],
        Operation::set("tags", vec![Value::from("b")])
    );
}

#[test]
fn required_fields_are_checked_before_sending() {
    let store = Store::new(create_test_schema());
    let item = store.create("Item");
    item.set("count", 1).unwrap();

    assert_eq!(
        build_shallow_requests(&store, &item).unwrap_err(),
        Error::MissingRequiredField("name".into())
    );
    assert_eq!(item.pending().len(), 1);

    item.set("name", "widget").unwrap();
    assert_eq!(build_shallow_requests(&store, &item).unwrap().len(), 1);
}

#[test]
fn changes_made_while_in_flight_survive_commit() {
    let store = Store::default();
    let item = store
        .rehydrate("Item", &json!({"objectId": "i1", "count": 0}))
        .unwrap();
    item.increment("count", 1.0).unwrap();

    let requests = build_shallow_requests(&store, &item).unwrap();
    item.increment("count", 2.0).unwrap();
    settle(&store, &requests[0], "i1");

    assert_eq!(item.pending()["count"], Operation::increment("count", 2.0));
    assert_eq!(item.stable("count"), Some(Value::from(1)));
    assert_eq!(item.get("count"), Some(Value::from(3)));
}

#[test]
fn rolled_back_generation_is_resent() {
    let store = Store::default();
    let item = store.create("Item");
    item.set("name", "a").unwrap();

    let first = build_shallow_requests(&store, &item).unwrap();
    item.rollback(first[0].generation()).unwrap();

    let second = build_shallow_requests(&store, &item).unwrap();
    assert_eq!(first[0].table(), second[0].table());
    assert_ne!(first[0].generation(), second[0].generation());
}

#[test]
fn committing_twice_fails() {
    let store = Store::default();
    let item = store.create("Item");
    let requests = build_shallow_requests(&store, &item).unwrap();
    settle(&store, &requests[0], "i1");

    let again = store.commit(&item, requests[0].generation(), SaveOutcome::default());
    assert!(matches!(again, Err(Error::UnknownGeneration(_))));
}

// ============================================================================
// Graph Edge Cases
// ============================================================================

#[test]
fn depth_zero_only_contains_root() {
    let store = Store::default();
    let root = store.create("Item");
    let child = store.create("Item");
    root.set("data", vec![Value::from(&child)]).unwrap();

    let requests = build_requests(&store, &root, 0).unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].object(), &root);
}

#[test]
fn shared_child_is_saved_once() {
    let store = Store::default();
    let root = store.create("Item");
    let left = store.create("Item");
    let right = store.create("Item");
    let shared = store.create("Item");
    root.set("left", &left).unwrap();
    root.set("right", &right).unwrap();
    left.set("child", &shared).unwrap();
    right.set("child", &shared).unwrap();

    let requests = build_deep_requests(&store, &root).unwrap();
    let order: Vec<_> = requests.iter().map(|r| r.object().clone()).collect();
    assert_eq!(order.len(), 4);
    assert_eq!(order.iter().filter(|o| **o == shared).count(), 1);

    let position = |o: &cirrus_engine::Object| order.iter().position(|x| x == o).unwrap();
    assert!(position(&shared) < position(&left));
    assert!(position(&shared) < position(&right));
    assert!(position(&left) < position(&root));
    assert!(position(&right) < position(&root));
}

#[test]
fn full_save_round() {
    let store = Store::default();
    let parent = store.create("Item");
    let child = store.create("Item");
    parent.set("name", "parent").unwrap();
    parent.set("child", &child).unwrap();
    child.set("name", "child").unwrap();

    let requests = build_deep_requests(&store, &parent).unwrap();
    assert!(requests.iter().all(Request::is_create));
    for (i, request) in requests.iter().enumerate() {
        request.payload(&store).unwrap();
        settle(&store, request, &format!("id{i}"));
    }

    assert!(!parent.is_new() && !child.is_new());
    assert!(!parent.has_pending() && !child.has_pending());
    assert!(build_deep_requests(&store, &parent).unwrap().is_empty());
    assert_eq!(store.find("Item", "id0"), Some(child));
}

#[test]
fn long_unsaved_cycle_reports_every_class() {
    let store = Store::default();
    let a = store.create("A");
    let b = store.create("B");
    let c = store.create("C");
    a.set("next", &b).unwrap();
    b.set("next", &c).unwrap();
    c.set("next", &a).unwrap();

    match build_deep_requests(&store, &a) {
        Err(Error::CyclicUnsavedReference(mut classes)) => {
            classes.sort();
            assert_eq!(classes, vec!["A", "B", "C"]);
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

// ============================================================================
// Query Edge Cases
// ============================================================================

#[test]
fn empty_query_has_no_parameters() {
    assert!(Query::new("Item").compile().to_params().is_empty());
}

#[test]
fn nested_combinators() {
    let mut a = Query::new("Item");
    a.where_key("count", Constraint::GreaterThan(1.into()));
    let mut b = Query::new("Item");
    b.where_key("count", Constraint::LessThan(0.into()));
    let mut c = Query::new("Item");
    c.where_key("name", Constraint::Existed);

    let query = a.or(b).unwrap().and(c).unwrap();
    assert_eq!(
        serde_json::Value::Object(query.compile().where_),
        json!({"$and": [
            {"$or": [{"count": {"$gt": 1}}, {"count": {"$lt": 0}}]},
            {"name": {"$exists": true}},
        ]})
    );
}

#[test]
fn geo_point_operand() {
    let mut query = Query::new("Item");
    query.where_key(
        "location",
        Constraint::NearbyPoint(GeoPoint::new(-90.0, 180.0).unwrap()),
    );
    let where_ = query.compile().where_;
    assert_eq!(where_["location"]["$nearSphere"]["latitude"], json!(-90.0));
}
