//! Operation handles, type-erased jobs and result tickets

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::core::progress::SharedSink;
use crate::error::{Result, ShareError};

pub type OperationId = u64;

/// Lifecycle of a submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationState::Queued => "QUEUED",
            OperationState::Running => "RUNNING",
            OperationState::Completed => "COMPLETED",
            OperationState::Failed => "FAILED",
            OperationState::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Shared view of one submission
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: OperationId,
    name: String,
    state: Arc<Mutex<OperationState>>,
}

impl OperationHandle {
    pub(crate) fn new(id: OperationId, name: String) -> Self {
        Self {
            id,
            name,
            state: Arc::new(Mutex::new(OperationState::Queued)),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OperationState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, state: OperationState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// Live operations, keyed by id. Entries disappear when they terminate.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    live: Mutex<HashMap<OperationId, OperationHandle>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, handle: OperationHandle) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.id(), handle);
    }

    pub(crate) fn remove(&self, id: OperationId) {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    pub fn get(&self, id: OperationId) -> Option<OperationHandle> {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).get(&id).cloned()
    }

    /// Live handles ordered by id
    pub fn snapshot(&self) -> Vec<OperationHandle> {
        let mut handles: Vec<_> = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        handles.sort_by_key(|h| h.id());
        handles
    }

    pub fn len(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

trait JobBody: Send {
    /// Run, record the terminal state, then deliver the result
    fn run(
        self: Box<Self>,
        sink: SharedSink,
        handle: OperationHandle,
        registry: Arc<OperationRegistry>,
    ) -> BoxFuture<'static, OperationState>;

    fn fail(self: Box<Self>, err: ShareError);
}

struct TypedJob<T, F> {
    op: F,
    tx: oneshot::Sender<Result<T>>,
}

impl<T, F, Fut> JobBody for TypedJob<T, F>
where
    F: FnOnce(SharedSink) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    fn run(
        self: Box<Self>,
        sink: SharedSink,
        handle: OperationHandle,
        registry: Arc<OperationRegistry>,
    ) -> BoxFuture<'static, OperationState> {
        let TypedJob { op, tx } = *self;
        async move {
            let result = op(sink).await;
            let state = match &result {
                Ok(_) => OperationState::Completed,
                Err(e) if e.is_cancelled() => OperationState::Cancelled,
                Err(_) => OperationState::Failed,
            };
            handle.set_state(state);
            registry.remove(handle.id());
            // Caller may have dropped the ticket
            let _ = tx.send(result);
            state
        }
        .boxed()
    }

    fn fail(self: Box<Self>, err: ShareError) {
        let _ = self.tx.send(Err(err));
    }
}

/// A submitted operation on its way to the worker host
pub struct Job {
    handle: OperationHandle,
    sink: SharedSink,
    body: Box<dyn JobBody>,
    registry: Arc<OperationRegistry>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.handle.id())
            .field("name", &self.handle.name())
            .finish()
    }
}

impl Job {
    /// Build a job and the ticket its result is delivered to
    pub(crate) fn new<T, F, Fut>(
        handle: OperationHandle,
        sink: SharedSink,
        registry: Arc<OperationRegistry>,
        op: F,
    ) -> (Job, OperationTicket<T>)
    where
        F: FnOnce(SharedSink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        registry.register(handle.clone());
        let ticket = OperationTicket {
            handle: handle.clone(),
            rx,
        };
        let job = Job {
            handle,
            sink,
            body: Box::new(TypedJob { op, tx }),
            registry,
        };
        (job, ticket)
    }

    pub fn id(&self) -> OperationId {
        self.handle.id()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Progress sink supplied at submission
    pub fn sink(&self) -> SharedSink {
        Arc::clone(&self.sink)
    }

    /// Execute the operation, reporting through `sink`
    pub fn run(self, sink: SharedSink) -> BoxFuture<'static, ()> {
        let Job {
            handle, body, registry, ..
        } = self;

        async move {
            handle.set_state(OperationState::Running);
            tracing::info!(id = handle.id(), operation = handle.name(), "Operation running");

            let state = body.run(sink, handle.clone(), registry).await;
            tracing::info!(id = handle.id(), operation = handle.name(), state = %state, "Operation finished");
        }
        .boxed()
    }

    /// Deliver `err` to the caller without running
    pub fn fail(self, err: ShareError) {
        tracing::warn!(id = self.id(), operation = self.name(), error = %err, "Operation could not be delegated");
        self.handle.set_state(OperationState::Failed);
        self.registry.remove(self.handle.id());
        self.body.fail(err);
    }
}

/// Eventual result of a submission
pub struct OperationTicket<T> {
    handle: OperationHandle,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> OperationTicket<T> {
    pub fn id(&self) -> OperationId {
        self.handle.id()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn state(&self) -> OperationState {
        self.handle.state()
    }

    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    /// Wait for the operation to finish
    pub async fn wait(self) -> Result<T> {
        let name = self.handle.name().to_string();
        self.rx
            .await
            .unwrap_or_else(|_| Err(ShareError::HostUnavailable(format!("{} was dropped before completion", name))))
    }
}
