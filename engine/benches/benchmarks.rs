//! Performance benchmarks for cirrus-engine

use cirrus_engine::{
    build_deep_requests, merge, Constraint, Operation, Query, Store, Value,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    group.bench_function("increment_increment", |b| {
        b.iter(|| {
            merge(
                black_box(Some(Operation::increment("n", 1.0))),
                black_box(Operation::increment("n", 2.0)),
                None,
            )
        })
    });

    group.bench_function("add_unique_union", |b| {
        let existing = Operation::add_unique("tags", (0..50).map(Value::from).collect());
        let incoming = Operation::add_unique("tags", (25..75).map(Value::from).collect());
        b.iter(|| merge(black_box(Some(existing.clone())), black_box(incoming.clone()), None))
    });

    group.finish();
}

fn bench_build_requests(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_requests");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("chain", size), size, |b, &size| {
            let store = Store::default();
            let nodes: Vec<_> = (0..size).map(|_| store.create("Node")).collect();
            for pair in nodes.windows(2) {
                pair[0].set("next", &pair[1]).unwrap();
            }

            b.iter(|| {
                let requests = build_deep_requests(&store, black_box(&nodes[0])).unwrap();
                for request in &requests {
                    request.object().rollback(request.generation()).unwrap();
                }
                requests.len()
            })
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    group.bench_function("compile", |b| {
        let mut inner = Query::new("Person");
        inner.where_key("name", Constraint::PrefixedBy("A".into()));

        let mut query = Query::new("Person");
        query
            .where_key("age", Constraint::GreaterThan(17.into()))
            .where_key("age", Constraint::LessThan(30.into()))
            .where_key("tags", Constraint::ContainedIn(vec!["a".into(), "b".into()]))
            .where_key("friend", Constraint::MatchedQuery(Box::new(inner)))
            .where_key("createdAt", Constraint::Descending);

        b.iter(|| black_box(&query).compile().to_params())
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let document = json!({
        "name": "Alice",
        "age": 30,
        "when": {"__type": "Date", "iso": "2016-04-20T08:00:00.000Z"},
        "where": {"__type": "GeoPoint", "latitude": 45.0, "longitude": -45.0},
        "tags": ["a", "b", {"__type": "Pointer", "className": "Person", "objectId": "p1"}],
    });

    group.bench_function("from_json", |b| {
        b.iter(|| Value::from_json(black_box(&document)))
    });

    let value = Value::from_json(&document).unwrap();
    group.bench_function("to_json", |b| b.iter(|| black_box(&value).to_json()));

    group.finish();
}

criterion_group!(
    benches,
    bench_merge,
    bench_build_requests,
    bench_query,
    bench_serialization
);
criterion_main!(benches);
