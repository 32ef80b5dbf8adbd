//! Shared helpers for client integration tests.

#![allow(dead_code)]

use cirrus_client::{Client, ClientError, Config, HttpRequest, Method, Result, Transport};
use cirrus_engine::Store;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;

type Handler = Box<dyn Fn(&HttpRequest) -> Result<JsonValue> + Send + Sync>;

/// In-memory transport: records every request and answers through a handler.
pub struct MockTransport {
    requests: Mutex<Vec<HttpRequest>>,
    handler: Handler,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&HttpRequest) -> Result<JsonValue> + Send + Sync + 'static) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            handler: Box::new(handler),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<JsonValue>> {
        let result = (self.handler)(&request);
        self.requests.lock().push(request);
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }
}

/// Backend that accepts every save, numbering new objects `id1`, `id2`, ...
/// Creates of a class listed in `failing` are rejected.
pub fn saving_backend(failing: &'static [&'static str]) -> impl Fn(&HttpRequest) -> Result<JsonValue> {
    let counter = Mutex::new(0u32);
    move |request: &HttpRequest| {
        let class = request.endpoint.split('/').nth(1).unwrap_or_default();
        match request.method {
            Method::Post if failing.contains(&class) => Err(ClientError::Backend {
                status: 400,
                code: 142,
                message: format!("{class} rejected"),
            }),
            Method::Post => {
                let n = {
                    let mut n = counter.lock();
                    *n += 1;
                    *n
                };
                Ok(json!({
                    "objectId": format!("id{n}"),
                    "createdAt": "2016-04-20T08:00:00.000Z",
                }))
            }
            Method::Put => Ok(json!({"updatedAt": "2016-04-21T08:00:00.000Z"})),
            _ => Ok(json!({})),
        }
    }
}

pub fn test_config() -> Config {
    Config::new("app", "key", "https://api.example.com")
}

pub fn client_with(transport: Arc<MockTransport>) -> Client {
    Client::with_transport(test_config(), Arc::new(Store::default()), transport).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
