//! Operation Dispatcher
//!
//! Callers hand named operations to [`OperationDispatcher::submit`] and get
//! an [`OperationTicket`] back. A single consumer task owns the pending
//! queue and the host lifecycle:
//!
//! ```text
//!            submit                 Host(Connected)
//! Disconnected ─────▶ Binding ────────────────────▶ Connected
//!      ▲                 │ retry tick                   │
//!      └─────────────────┴──────── Host(Disconnected) ◀─┘
//!                          or delegation came back
//! ```
//!
//! Work submitted while the host is not connected waits in FIFO order and
//! is drained, in submission order, as soon as the host reports connected.
//! A job the host hands back mid-drain returns to the front of the queue and
//! a fresh bind is requested. Only a refusal from a connected host is
//! reported to the caller.

pub mod host;
pub mod operation;

pub use host::{Delegation, HostEvent, HostEvents, LocalWorkerHost, WorkerHost};
pub use operation::{OperationHandle, OperationId, OperationRegistry, OperationState, OperationTicket};

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::core::progress::{MultiFileAdapter, MultiFileSink, SharedSink};
use crate::error::{Result, ShareError};

use operation::Job;

/// Messages processed by the consumer task
#[derive(Debug)]
pub(crate) enum Command {
    Submit(Job),
    Host(HostEvent),
    RetryTick,
    Shutdown,
}

/// Connection state of the dispatcher towards its host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Disconnected,
    Binding,
    Connected,
    Stopped,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DispatcherState::Disconnected => "disconnected",
            DispatcherState::Binding => "binding",
            DispatcherState::Connected => "connected",
            DispatcherState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy)]
struct Status {
    state: DispatcherState,
    queued: usize,
}

/// Front door for background operations
///
/// Must be created inside a tokio runtime. Clones share the same queue,
/// host and registry.
#[derive(Clone)]
pub struct OperationDispatcher {
    tx: mpsc::UnboundedSender<Command>,
    host: Arc<dyn WorkerHost>,
    registry: Arc<OperationRegistry>,
    next_id: Arc<AtomicU64>,
    status: Arc<Mutex<Status>>,
}

impl OperationDispatcher {
    pub fn new(host: Arc<dyn WorkerHost>, config: &EngineConfig) -> Self {
        Self::with_retry_delay(host, config.dispatcher_retry_delay())
    }

    pub fn with_retry_delay(host: Arc<dyn WorkerHost>, retry_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(Status {
            state: DispatcherState::Disconnected,
            queued: 0,
        }));

        let consumer = Consumer {
            host: Arc::clone(&host),
            tx: tx.clone(),
            retry_delay,
            state: DispatcherState::Disconnected,
            queue: VecDeque::new(),
            timer_armed: false,
            status: Arc::clone(&status),
        };
        tokio::spawn(consumer.run(rx));

        Self {
            tx,
            host,
            registry: Arc::new(OperationRegistry::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            status,
        }
    }

    /// Queue `op` for execution on the worker host
    ///
    /// `op` receives the progress sink it should report through; the host
    /// may wrap the one given here.
    pub fn submit<T, F, Fut>(&self, name: impl Into<String>, sink: SharedSink, op: F) -> OperationTicket<T>
    where
        F: FnOnce(SharedSink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = OperationHandle::new(id, name.into());
        let (job, ticket) = Job::new(handle, sink, Arc::clone(&self.registry), op);
        tracing::debug!(id, operation = ticket.name(), "Operation submitted");

        if let Err(mpsc::error::SendError(Command::Submit(job))) = self.tx.send(Command::Submit(job)) {
            job.fail(ShareError::HostUnavailable("dispatcher stopped".to_string()));
        }
        ticket
    }

    /// Like [`submit`](Self::submit) for operations reporting per file and per byte
    pub fn submit_multi_file<T, F, Fut>(
        &self,
        name: impl Into<String>,
        sink: Arc<dyn MultiFileSink>,
        total_files_hint: usize,
        op: F,
    ) -> OperationTicket<T>
    where
        F: FnOnce(SharedSink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let adapter: SharedSink = Arc::new(MultiFileAdapter::new(sink, total_files_hint));
        self.submit(name, adapter, op)
    }

    /// Signal cancellation to everything running on the host, bypassing the queue
    pub fn cancel_all(&self) {
        tracing::info!("Broadcasting cancel to worker host");
        self.host.cancel_all();
    }

    /// Live operations
    pub fn operations(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn state(&self) -> DispatcherState {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Jobs waiting for the host
    pub fn queued_len(&self) -> usize {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).queued
    }

    /// Stop the consumer task; queued jobs fail with `HostUnavailable`
    pub fn shutdown(&self) {
        if self.tx.send(Command::Shutdown).is_err() {
            tracing::debug!("Dispatcher already stopped");
        }
    }
}

struct Consumer {
    host: Arc<dyn WorkerHost>,
    tx: mpsc::UnboundedSender<Command>,
    retry_delay: Duration,
    state: DispatcherState,
    queue: VecDeque<Job>,
    timer_armed: bool,
    status: Arc<Mutex<Status>>,
}

impl Consumer {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Submit(job) => self.on_submit(job).await,
                Command::Host(HostEvent::Connected) => {
                    tracing::info!(queued = self.queue.len(), "Worker host connected");
                    self.state = DispatcherState::Connected;
                    self.drain().await;
                }
                Command::Host(HostEvent::Disconnected) => {
                    tracing::warn!(queued = self.queue.len(), "Worker host disconnected");
                    self.state = DispatcherState::Disconnected;
                    if !self.queue.is_empty() {
                        self.ensure_bound().await;
                        self.arm_timer();
                    }
                }
                Command::RetryTick => self.on_retry_tick().await,
                Command::Shutdown => {
                    self.stop();
                    break;
                }
            }
            self.publish();
        }
        tracing::debug!("Dispatcher stopped");
    }

    async fn on_submit(&mut self, job: Job) {
        self.ensure_bound().await;

        if self.state == DispatcherState::Connected && self.queue.is_empty() {
            if let Some(job) = self.delegate(job) {
                self.requeue(job).await;
            }
            return;
        }

        tracing::debug!(id = job.id(), operation = job.name(), state = %self.state, "Host not ready, queueing");
        self.queue.push_back(job);
        if self.state == DispatcherState::Connected {
            self.drain().await;
        } else {
            self.arm_timer();
        }
    }

    async fn on_retry_tick(&mut self) {
        self.timer_armed = false;
        if self.queue.is_empty() {
            return;
        }

        if self.state == DispatcherState::Connected {
            self.drain().await;
            return;
        }

        // The previous bind never reported back
        tracing::debug!(queued = self.queue.len(), state = %self.state, "Host still not ready, rebinding");
        self.state = DispatcherState::Disconnected;
        self.ensure_bound().await;
        self.arm_timer();
    }

    /// Start and bind the host unless a bind is already in flight
    async fn ensure_bound(&mut self) {
        if self.state != DispatcherState::Disconnected {
            return;
        }
        self.state = DispatcherState::Binding;

        if let Err(err) = self.host.start().await {
            tracing::warn!(error = %err, "Worker host failed to start");
            self.state = DispatcherState::Disconnected;
            return;
        }
        if let Err(err) = self.host.bind(HostEvents::new(self.tx.clone())).await {
            tracing::warn!(error = %err, "Worker host bind failed");
            self.state = DispatcherState::Disconnected;
            return;
        }
        tracing::debug!("Bind requested");
    }

    /// Hand `job` to the host; returns it if the host is unavailable
    fn delegate(&mut self, job: Job) -> Option<Job> {
        let id = job.id();
        match self.host.execute(job) {
            Delegation::Delegated => {
                tracing::debug!(id, "Operation delegated");
                None
            }
            Delegation::Unavailable(job) => Some(job),
            Delegation::Rejected(job, err) => {
                job.fail(err);
                None
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(job) = self.queue.pop_front() {
            if let Some(job) = self.delegate(job) {
                self.requeue(job).await;
                return;
            }
        }
    }

    /// The host dropped out from under us
    async fn requeue(&mut self, job: Job) {
        tracing::warn!(id = job.id(), operation = job.name(), "Host unavailable during delegation, requeueing");
        self.queue.push_front(job);
        self.state = DispatcherState::Disconnected;
        self.ensure_bound().await;
        self.arm_timer();
    }

    fn arm_timer(&mut self) {
        if self.timer_armed {
            return;
        }
        self.timer_armed = true;

        let tx = self.tx.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::RetryTick);
        });
    }

    fn stop(&mut self) {
        tracing::info!(queued = self.queue.len(), "Dispatcher shutting down");
        for job in self.queue.drain(..) {
            job.fail(ShareError::HostUnavailable("dispatcher stopped".to_string()));
        }
        self.state = DispatcherState::Stopped;
        self.publish();
    }

    fn publish(&self) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = Status {
            state: self.state,
            queued: self.queue.len(),
        };
    }
}
