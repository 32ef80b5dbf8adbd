//! Transport to the backend's REST API.
//!
//! The client hands fully described [`HttpRequest`]s to a [`Transport`].
//! [`HttpTransport`] sends them with reqwest; tests substitute their own.

use crate::{config::Config, error::Result, ClientError};
use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// HTTP verbs the API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One call to the API.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path below the versioned base URL, e.g. `classes/Person`
    pub endpoint: String,
    pub params: Vec<(String, String)>,
    pub body: Option<JsonValue>,
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            params: Vec::new(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Value of query parameter `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Executes requests and returns the decoded JSON response body.
pub trait Transport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<JsonValue>>;
}

/// Endpoint of a class. Built-in classes have their own paths.
pub fn class_endpoint(class_name: &str) -> String {
    match class_name {
        "_User" => "users".to_string(),
        "_Role" => "roles".to_string(),
        other => format!("classes/{other}"),
    }
}

/// Endpoint of one stored object.
pub fn object_endpoint(class_name: &str, object_id: &str) -> String {
    format!("{}/{object_id}", class_endpoint(class_name))
}

/// Turn an error body into a [`ClientError::Backend`].
pub fn backend_error(status: u16, body: &JsonValue) -> ClientError {
    ClientError::Backend {
        status,
        code: body.get("code").and_then(JsonValue::as_i64).unwrap_or(-1),
        message: body
            .get("error")
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    }
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    config: Config,
}

impl HttpTransport {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    async fn send(&self, request: HttpRequest) -> Result<JsonValue> {
        let url = self.config.url(&request.endpoint);
        let mut builder = self
            .http
            .request(request.method.into(), &url)
            .query(&request.params);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = request.method.as_str(), url = %url, "Sending request");
        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let body: Option<JsonValue> = if bytes.is_empty() {
            Some(JsonValue::Null)
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        if status.is_success() {
            body.ok_or_else(|| ClientError::InvalidResponse(format!("{url} did not return JSON")))
        } else {
            let body = body.unwrap_or(JsonValue::Null);
            tracing::warn!(status = status.as_u16(), url = %url, "Backend rejected request");
            Err(backend_error(status.as_u16(), &body))
        }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Result<JsonValue>> {
        Box::pin(self.send(request))
    }
}
