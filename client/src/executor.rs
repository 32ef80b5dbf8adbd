//! Shared execution context.
//!
//! Every request of a client runs on one tokio runtime and takes a permit
//! from one semaphore before touching the network. Submitted calls are
//! tracked by id so they can be cancelled until they complete.

use crate::{error::Result, ClientError};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{oneshot, Semaphore, SemaphorePermit};
use uuid::Uuid;

type InFlight = DashMap<Uuid, oneshot::Sender<()>>;

/// Runtime the executor started itself when none was running.
#[derive(Debug)]
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; shut down without waiting.
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Bounded-concurrency context shared by all requests of a client.
#[derive(Debug)]
pub struct Executor {
    handle: Handle,
    _runtime: Option<OwnedRuntime>,
    permits: Semaphore,
    in_flight: Arc<InFlight>,
}

impl Executor {
    /// Use the current tokio runtime, or start one if there is none.
    pub fn new(max_concurrent_requests: usize) -> Result<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::with_handle(handle, max_concurrent_requests)),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .thread_name("cirrus-worker")
                    .build()?;
                let mut executor = Self::with_handle(runtime.handle().clone(), max_concurrent_requests);
                executor._runtime = Some(OwnedRuntime(Some(runtime)));
                tracing::debug!("Started executor runtime");
                Ok(executor)
            }
        }
    }

    /// Run on the runtime behind `handle`.
    pub fn with_handle(handle: Handle, max_concurrent_requests: usize) -> Self {
        Self {
            handle,
            _runtime: None,
            permits: Semaphore::new(max_concurrent_requests.max(1)),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Wait for a slot on the wire.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ClientError::Cancelled)
    }

    /// Number of submitted calls that have not completed.
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Run `future` in the background and hand its result to `callback`.
    ///
    /// Cancelling the returned handle before completion drops the future and
    /// calls `callback` with [`ClientError::Cancelled`].
    pub fn submit<T, F, C>(&self, future: F, callback: C) -> RequestHandle
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(Result<T>) + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.in_flight.insert(id, cancel_tx);

        let in_flight = Arc::clone(&self.in_flight);
        self.handle.spawn(async move {
            let result = tokio::select! {
                result = future => result,
                _ = cancel_rx => Err(ClientError::Cancelled),
            };
            in_flight.remove(&id);
            callback(result);
        });

        tracing::debug!(request_id = %id, "Request submitted");

        RequestHandle {
            id,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Run `future` and block the calling thread until it completes.
    ///
    /// Must not be called from a thread of the async runtime.
    pub fn blocking<T, F>(&self, future: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(ClientError::BlockingInRuntime);
        }
        let (tx, rx) = oneshot::channel();
        self.submit(future, move |result| {
            let _ = tx.send(result);
        });
        rx.blocking_recv().unwrap_or(Err(ClientError::Cancelled))
    }
}

/// Handle to a submitted call.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: Uuid,
    in_flight: Arc<InFlight>,
}

impl RequestHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel the call. Returns false if it had already completed.
    pub fn cancel(&self) -> bool {
        match self.in_flight.remove(&self.id) {
            Some((_, cancel)) => {
                let _ = cancel.send(());
                tracing::info!(request_id = %self.id, "Request cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        !self.in_flight.contains_key(&self.id)
    }
}
