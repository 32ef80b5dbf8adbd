//! The client: saving object graphs and running queries.
//!
//! Every call exists in three forms: an `async fn`, a `*_with_callback`
//! submission returning a cancellable [`RequestHandle`], and a `*_blocking`
//! wrapper for synchronous callers.

use crate::{
    config::Config,
    error::Result,
    executor::{Executor, RequestHandle},
    session::Session,
    transport::{class_endpoint, object_endpoint, HttpRequest, HttpTransport, Method, Transport},
    ClientError,
};
use chrono::{DateTime, Utc};
use cirrus_engine::{
    build_deep_requests, parse_date, Error as EngineError, LocalId, Object, Query, Request,
    SaveOutcome, Store,
};
use futures::future::join_all;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

pub const HEADER_APP_ID: &str = "X-LC-Id";
pub const HEADER_APP_KEY: &str = "X-LC-Key";
pub const HEADER_SESSION: &str = "X-LC-Session";

const USER_AGENT: &str = concat!("cirrus/", env!("CARGO_PKG_VERSION"));

struct ClientInner {
    config: Config,
    store: Arc<Store>,
    session: Session,
    transport: Arc<dyn Transport>,
    executor: Executor,
}

/// Client for one application. Clones share the store, session and executor.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("signed_in", &self.inner.session.is_signed_in())
            .finish()
    }
}

impl Client {
    /// Client talking HTTP to `config.server_url`.
    pub fn new(config: Config, store: Arc<Store>) -> Result<Self> {
        let transport = HttpTransport::new(config.clone())?;
        Self::with_transport(config, store, Arc::new(transport))
    }

    /// Client sending its requests through `transport`.
    pub fn with_transport(
        config: Config,
        store: Arc<Store>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let executor = Executor::new(config.max_concurrent_requests)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                store,
                session: Session::new(),
                transport,
                executor,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    fn with_headers(&self, request: HttpRequest) -> HttpRequest {
        let request = request
            .with_header(HEADER_APP_ID, &self.inner.config.app_id)
            .with_header(HEADER_APP_KEY, &self.inner.config.app_key)
            .with_header("User-Agent", USER_AGENT)
            .with_header("Accept", "application/json");
        match self.inner.session.token() {
            Some(token) => request.with_header(HEADER_SESSION, token),
            None => request,
        }
    }

    /// Send one request once a slot on the wire is free.
    async fn dispatch(&self, request: HttpRequest) -> Result<JsonValue> {
        let request = self.with_headers(request);
        let _permit = self.inner.executor.acquire().await?;
        tracing::debug!(
            method = request.method.as_str(),
            endpoint = %request.endpoint,
            "Dispatching request"
        );
        self.inner.transport.execute(request).await
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    /// Save `object` and every new or changed object reachable from it.
    ///
    /// Requests go out in waves: a request is sent once all requests it
    /// depends on succeeded, requests of one wave run concurrently. On the
    /// first failure the failed request and every unsent one are rolled
    /// back; objects already saved stay committed. Dropping the future
    /// before it completes rolls back everything not yet committed.
    ///
    /// Changes queued behind a pending operation are sent by further
    /// rounds once the operation ahead of them is persisted.
    pub async fn save(&self, object: &Object) -> Result<()> {
        while self.save_round(object).await? {}
        Ok(())
    }

    /// One round of [`Client::save`]. Returns whether an object it saved
    /// had changes queued for a later round.
    async fn save_round(&self, object: &Object) -> Result<bool> {
        let store = &self.inner.store;
        let mut pending = Unsettled(build_deep_requests(store, object)?);
        if pending.0.is_empty() {
            tracing::debug!(class = object.class_name(), "Nothing to save");
            return Ok(false);
        }
        let queued = pending.0.iter().any(|r| r.object().has_queued());
        tracing::info!(
            class = object.class_name(),
            requests = pending.0.len(),
            "Saving object graph"
        );

        let mut saved: HashSet<LocalId> = HashSet::new();
        while !pending.0.is_empty() {
            let (ready, rest): (Vec<Request>, Vec<Request>) = std::mem::take(&mut pending.0)
                .into_iter()
                .partition(|r| r.dependencies().iter().all(|d| saved.contains(d)));
            pending.0 = rest;

            if ready.is_empty() {
                let classes = pending
                    .0
                    .iter()
                    .map(|r| r.object().class_name().to_string())
                    .collect();
                return Err(EngineError::CyclicUnsavedReference(classes).into());
            }

            let mut wave = Unsettled(ready);
            let results = join_all(wave.0.iter().map(|r| self.send_save(r))).await;
            let wave = std::mem::take(&mut wave.0);

            let mut failure = None;
            for (request, result) in wave.iter().zip(results) {
                let committed = result.and_then(|outcome| {
                    store
                        .commit(request.object(), request.generation(), outcome)
                        .map_err(ClientError::from)
                });
                match committed {
                    Ok(()) => {
                        saved.insert(request.object().local_id());
                        tracing::info!(
                            class = request.object().class_name(),
                            object_id = ?request.object().object_id(),
                            "Object saved"
                        );
                    }
                    Err(err) => {
                        rollback(request);
                        if failure.is_none() {
                            failure = Some(err);
                        }
                    }
                }
            }

            if let Some(err) = failure {
                tracing::warn!(error = %err, unsent = pending.0.len(), "Save failed");
                return Err(err);
            }
        }

        Ok(queued)
    }

    async fn send_save(&self, request: &Request) -> Result<SaveOutcome> {
        let object = request.object();
        let body = JsonValue::Object(request.payload(&self.inner.store)?);
        let http = match object.object_id() {
            Some(id) => HttpRequest::new(Method::Put, object_endpoint(object.class_name(), &id)),
            None => HttpRequest::new(Method::Post, class_endpoint(object.class_name())),
        }
        .with_body(body);

        let response = self.dispatch(http).await?;
        let outcome = parse_outcome(&response)?;
        if object.is_new() && outcome.object_id.is_none() {
            return Err(ClientError::InvalidResponse(
                "create response has no objectId".into(),
            ));
        }
        Ok(outcome)
    }

    pub fn save_with_callback<C>(&self, object: &Object, callback: C) -> RequestHandle
    where
        C: FnOnce(Result<()>) + Send + 'static,
    {
        let object = object.clone();
        self.submit(move |client| async move { client.save(&object).await }, callback)
    }

    pub fn save_blocking(&self, object: &Object) -> Result<()> {
        let object = object.clone();
        self.block(move |client| async move { client.save(&object).await })
    }

    // ------------------------------------------------------------------
    // Querying
    // ------------------------------------------------------------------

    /// Objects matching `query`, rehydrated through the store.
    pub async fn find(&self, query: &Query) -> Result<Vec<Object>> {
        let compiled = query.compile();
        let request = HttpRequest::new(Method::Get, class_endpoint(&compiled.class_name))
            .with_params(compiled.to_params());

        let response = self.dispatch(request).await?;
        let results = response
            .get("results")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| ClientError::InvalidResponse("query response has no results".into()))?;

        let objects = results
            .iter()
            .map(|doc| self.inner.store.rehydrate(&compiled.class_name, doc))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tracing::debug!(class = %compiled.class_name, found = objects.len(), "Query finished");
        Ok(objects)
    }

    /// Number of objects matching `query`. Limit and skip are ignored.
    pub async fn count(&self, query: &Query) -> Result<u64> {
        let compiled = query.compile();
        let mut params: Vec<(String, String)> = compiled
            .to_params()
            .into_iter()
            .filter(|(name, _)| name != "limit" && name != "skip")
            .collect();
        params.push(("count".to_string(), "1".to_string()));
        params.push(("limit".to_string(), "0".to_string()));

        let request = HttpRequest::new(Method::Get, class_endpoint(&compiled.class_name))
            .with_params(params);
        let response = self.dispatch(request).await?;
        response
            .get("count")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| ClientError::InvalidResponse("count response has no count".into()))
    }

    /// Fetch one object by identifier.
    pub async fn get(&self, class_name: &str, object_id: &str) -> Result<Object> {
        let request = HttpRequest::new(Method::Get, object_endpoint(class_name, object_id));
        let response = self.dispatch(request).await?;
        if response.as_object().is_some_and(JsonMap::is_empty) {
            return Err(ClientError::Backend {
                status: 404,
                code: 101,
                message: format!("{class_name} {object_id} not found"),
            });
        }
        Ok(self.inner.store.rehydrate(class_name, &response)?)
    }

    pub fn find_with_callback<C>(&self, query: &Query, callback: C) -> RequestHandle
    where
        C: FnOnce(Result<Vec<Object>>) + Send + 'static,
    {
        let query = query.clone();
        self.submit(move |client| async move { client.find(&query).await }, callback)
    }

    pub fn count_with_callback<C>(&self, query: &Query, callback: C) -> RequestHandle
    where
        C: FnOnce(Result<u64>) + Send + 'static,
    {
        let query = query.clone();
        self.submit(move |client| async move { client.count(&query).await }, callback)
    }

    pub fn get_with_callback<C>(&self, class_name: &str, object_id: &str, callback: C) -> RequestHandle
    where
        C: FnOnce(Result<Object>) + Send + 'static,
    {
        let (class_name, object_id) = (class_name.to_string(), object_id.to_string());
        self.submit(
            move |client| async move { client.get(&class_name, &object_id).await },
            callback,
        )
    }

    pub fn find_blocking(&self, query: &Query) -> Result<Vec<Object>> {
        let query = query.clone();
        self.block(move |client| async move { client.find(&query).await })
    }

    pub fn count_blocking(&self, query: &Query) -> Result<u64> {
        let query = query.clone();
        self.block(move |client| async move { client.count(&query).await })
    }

    pub fn get_blocking(&self, class_name: &str, object_id: &str) -> Result<Object> {
        let (class_name, object_id) = (class_name.to_string(), object_id.to_string());
        self.block(move |client| async move { client.get(&class_name, &object_id).await })
    }

    fn submit<T, F, Fut, C>(&self, call: F, callback: C) -> RequestHandle
    where
        T: Send + 'static,
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(Result<T>) + Send + 'static,
    {
        self.inner.executor.submit(call(self.clone()), callback)
    }

    fn block<T, F, Fut>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.inner.executor.blocking(call(self.clone()))
    }
}

fn rollback(request: &Request) {
    if let Err(err) = request.object().rollback(request.generation()) {
        tracing::warn!(error = %err, "Rollback failed");
    } else {
        tracing::debug!(class = request.object().class_name(), "Rolled back");
    }
}

/// Requests whose generation is neither committed nor rolled back. Dropping
/// them rolls each one back.
struct Unsettled(Vec<Request>);

impl Drop for Unsettled {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            tracing::debug!(requests = self.0.len(), "Rolling back unsettled requests");
        }
        self.0.iter().for_each(rollback);
    }
}

fn parse_outcome(response: &JsonValue) -> Result<SaveOutcome> {
    let map = response
        .as_object()
        .ok_or_else(|| ClientError::InvalidResponse("save response is not an object".into()))?;
    let date = |key: &str| -> Result<Option<DateTime<Utc>>> {
        Ok(map
            .get(key)
            .and_then(JsonValue::as_str)
            .map(parse_date)
            .transpose()?)
    };

    Ok(SaveOutcome {
        object_id: map
            .get("objectId")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        created_at: date("createdAt")?,
        updated_at: date("updatedAt")?,
    })
}
