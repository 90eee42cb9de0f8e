//! Worker Host contract and an in-process tokio implementation
//!
//! The host is the long-lived context that actually runs operations. The
//! dispatcher starts it, binds to it, and from then on learns about its
//! availability only through [`HostEvents`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::cancel::CancelRegistry;
use crate::core::progress::{ProgressSink, ProgressUpdate, SharedSink};
use crate::error::{Result, ShareError};

use super::operation::Job;
use super::Command;

/// Lifecycle notification from a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Connected,
    Disconnected,
}

/// Channel a host reports connect/disconnect on
#[derive(Debug, Clone)]
pub struct HostEvents {
    tx: mpsc::UnboundedSender<Command>,
}

impl HostEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, event: HostEvent) {
        if self.tx.send(Command::Host(event)).is_err() {
            tracing::debug!(?event, "Dispatcher gone, host event dropped");
        }
    }

    pub fn connected(&self) {
        self.notify(HostEvent::Connected);
    }

    pub fn disconnected(&self) {
        self.notify(HostEvent::Disconnected);
    }
}

/// Outcome of handing a job to the host
#[derive(Debug)]
pub enum Delegation {
    /// The host owns the job now
    Delegated,
    /// The host is not reachable; the job comes back for requeueing
    Unavailable(Job),
    /// The host refused the job while connected
    Rejected(Job, ShareError),
}

/// What the dispatcher needs from a worker host
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Start the host. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Bind to the host. Availability is reported later through `events`.
    async fn bind(&self, events: HostEvents) -> Result<()>;

    fn execute(&self, job: Job) -> Delegation;

    /// Raise every cancellation flag of running work
    fn cancel_all(&self);
}

struct HostShared {
    started: AtomicBool,
    connected: AtomicBool,
    reachable: AtomicBool,
    binds: AtomicUsize,
    events: Mutex<Option<HostEvents>>,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    history: Mutex<Vec<String>>,
    progress: Mutex<HashMap<String, ProgressUpdate>>,
    cancel: CancelRegistry,
}

/// Records the latest update per operation name, then forwards it
struct HostSink {
    shared: Arc<HostShared>,
    name: String,
    inner: SharedSink,
}

impl ProgressSink for HostSink {
    fn emit(&self, update: ProgressUpdate) {
        self.shared
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(self.name.clone(), update.clone());
        self.inner.emit(update);
    }
}

/// Worker host running jobs on tokio worker tasks
///
/// With the default single worker, jobs run one after another in the order
/// they were delegated. The host shares a [`CancelRegistry`] with the engine
/// so [`WorkerHost::cancel_all`] reaches running transfers.
#[derive(Clone)]
pub struct LocalWorkerHost {
    shared: Arc<HostShared>,
    workers: usize,
    bind_delay: Duration,
}

impl LocalWorkerHost {
    pub fn new(cancel: CancelRegistry) -> Self {
        Self {
            shared: Arc::new(HostShared {
                started: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                reachable: AtomicBool::new(true),
                binds: AtomicUsize::new(0),
                events: Mutex::new(None),
                jobs: Mutex::new(None),
                history: Mutex::new(Vec::new()),
                progress: Mutex::new(HashMap::new()),
                cancel,
            }),
            workers: 1,
            bind_delay: Duration::ZERO,
        }
    }

    /// Delay between a bind request and the connected notification
    pub fn with_bind_delay(mut self, delay: Duration) -> Self {
        self.bind_delay = delay;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Number of bind requests received
    pub fn bind_count(&self) -> usize {
        self.shared.binds.load(Ordering::SeqCst)
    }

    /// When unreachable, binds never report connected
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop the connection, as if the host process went away
    pub fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(events) = self.events() {
            events.disconnected();
        }
    }

    /// Names of operations in the order workers picked them up
    pub fn history(&self) -> Vec<String> {
        self.shared.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Latest progress reported for an operation name
    pub fn last_progress(&self, name: &str) -> Option<ProgressUpdate> {
        self.shared
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn events(&self) -> Option<HostEvents> {
        self.shared.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn spawn_workers(&self) {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker in 0..self.workers {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };

                    shared
                        .history
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(job.name().to_string());
                    let sink: SharedSink = Arc::new(HostSink {
                        shared: Arc::clone(&shared),
                        name: job.name().to_string(),
                        inner: job.sink(),
                    });
                    job.run(sink).await;
                }
                tracing::debug!(worker, "Host worker stopped");
            });
        }

        *self.shared.jobs.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }
}

#[async_trait]
impl WorkerHost for LocalWorkerHost {
    async fn start(&self) -> Result<()> {
        if !self.shared.started.swap(true, Ordering::SeqCst) {
            self.spawn_workers();
            tracing::info!(workers = self.workers, "Worker host started");
        }
        Ok(())
    }

    async fn bind(&self, events: HostEvents) -> Result<()> {
        if !self.shared.started.load(Ordering::SeqCst) {
            return Err(ShareError::HostUnavailable("host not started".to_string()));
        }
        self.shared.binds.fetch_add(1, Ordering::SeqCst);
        *self.shared.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(events.clone());

        let shared = Arc::clone(&self.shared);
        let delay = self.bind_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if shared.reachable.load(Ordering::SeqCst) {
                shared.connected.store(true, Ordering::SeqCst);
                events.connected();
            } else {
                tracing::debug!("Host unreachable, bind left pending");
            }
        });
        Ok(())
    }

    fn execute(&self, job: Job) -> Delegation {
        if !self.is_connected() {
            return Delegation::Unavailable(job);
        }
        let jobs = self.shared.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => Delegation::Delegated,
                Err(mpsc::error::SendError(job)) => Delegation::Unavailable(job),
            },
            None => Delegation::Unavailable(job),
        }
    }

    fn cancel_all(&self) {
        self.shared.cancel.cancel_all();
    }
}
