//! End-to-end tests of the HTTP transport against a local mock backend.

mod common;

use axum::{
    extract::{Path, Query as Params, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use cirrus_client::{Client, ClientError, Config};
use cirrus_engine::{Constraint, Query, Store, Value};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
struct Backend {
    bodies: Arc<Mutex<Vec<JsonValue>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("X-LC-Id").and_then(|v| v.to_str().ok()) == Some("app")
        && headers.get("X-LC-Key").and_then(|v| v.to_str().ok()) == Some("key")
}

fn unauthorized() -> (StatusCode, Json<JsonValue>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": 401, "error": "Unauthorized."})),
    )
}

async fn create(
    State(backend): State<Backend>,
    Path(class): Path<String>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> (StatusCode, Json<JsonValue>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut bodies = backend.bodies.lock();
    bodies.push(body);
    (
        StatusCode::CREATED,
        Json(json!({
            "objectId": format!("{}{}", class.to_lowercase(), bodies.len()),
            "createdAt": "2016-04-20T08:00:00.000Z",
        })),
    )
}

async fn list(
    Path(class): Path<String>,
    Params(params): Params<HashMap<String, String>>,
) -> (StatusCode, Json<JsonValue>) {
    let filter: JsonValue = params
        .get("where")
        .and_then(|w| serde_json::from_str(w).ok())
        .unwrap_or(JsonValue::Null);
    let results = if filter == json!({"name": "Alice"}) {
        json!([{"objectId": format!("{}1", class.to_lowercase()), "name": "Alice"}])
    } else {
        json!([])
    };
    (StatusCode::OK, Json(json!({ "results": results })))
}

async fn fetch(Path((_class, _id)): Path<(String, String)>) -> (StatusCode, Json<JsonValue>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"code": 101, "error": "Object not found."})),
    )
}

async fn start_backend() -> (String, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/1.1/classes/{class}", post(create).get(list))
        .route("/1.1/classes/{class}/{id}", get(fetch))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), backend)
}

#[tokio::test]
async fn save_and_find_over_http() {
    common::init_tracing();
    let (url, backend) = start_backend().await;
    let client = Client::new(Config::new("app", "key", url), Arc::new(Store::default())).unwrap();

    let person = client.store().create("Person");
    let pet = client.store().create("Pet");
    person.set("name", "Alice").unwrap();
    person.set("pet", &pet).unwrap();
    client.save(&person).await.unwrap();

    assert_eq!(pet.object_id().as_deref(), Some("pet1"));
    assert_eq!(person.object_id().as_deref(), Some("person2"));
    assert_eq!(
        backend.bodies.lock()[1],
        json!({
            "name": "Alice",
            "pet": {"__type": "Pointer", "className": "Pet", "objectId": "pet1"},
        })
    );

    let mut query = Query::new("Person");
    query.where_key("name", Constraint::EqualTo("Alice".into()));
    let found = client.find(&query).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name"), Some(Value::from("Alice")));
}

#[tokio::test]
async fn backend_errors_are_decoded() {
    let (url, _backend) = start_backend().await;
    let client = Client::new(Config::new("app", "key", url.clone()), Arc::new(Store::default())).unwrap();

    let err = client.get("Person", "missing").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Backend { status: 404, code: 101, ref message } if message == "Object not found."
    ));

    let stranger = Client::new(Config::new("app", "wrong", url), Arc::new(Store::default())).unwrap();
    let object = stranger.store().create("Person");
    let err = stranger.save(&object).await.unwrap_err();
    assert!(matches!(err, ClientError::Backend { status: 401, .. }));
    assert!(object.is_new());
}

#[tokio::test]
async fn unreachable_server_is_an_http_error() {
    let client = Client::new(
        Config::new("app", "key", "http://127.0.0.1:9"),
        Arc::new(Store::default()),
    )
    .unwrap();
    let err = client.find(&Query::new("Person")).await.unwrap_err();
    assert!(matches!(err, ClientError::Http(_)));
}
