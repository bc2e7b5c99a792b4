//! Reconcile scheduler: a bounded worker pool over a deduplicating queue.

mod backoff;
mod queue;
mod registry;
pub mod watches;

pub use backoff::Backoff;
pub use queue::WorkQueue;
pub use registry::Registry;

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::ControllerConfig;
use crate::reconcilers::Outcome;
use crate::types::{Error, Result};

/// Kinds the scheduler dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    MetalCluster,
    MetalMachine,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetalCluster => write!(f, "MetalCluster"),
            Self::MetalMachine => write!(f, "MetalMachine"),
        }
    }
}

/// Queue key identifying one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub requeue_interval: Duration,
    pub resync_interval: Duration,
    pub reconcile_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&ControllerConfig> for SchedulerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            workers: config.workers,
            requeue_interval: Duration::from_secs(config.requeue_interval_secs),
            resync_interval: Duration::from_secs(config.resync_interval_secs),
            reconcile_timeout: Duration::from_secs(config.reconcile_timeout_secs),
            backoff_base: Duration::from_millis(config.backoff_base_millis),
            backoff_max: Duration::from_secs(config.backoff_max_secs),
        }
    }
}

pub struct Scheduler {
    queue: Arc<WorkQueue<ObjectKey>>,
    registry: Registry,
    backoff: Backoff<ObjectKey>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(registry: Registry, config: SchedulerConfig) -> Self {
        Self {
            queue: WorkQueue::new(),
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            registry,
            config,
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue<ObjectKey>> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    /// Stop handing out work. Running reconciles finish, then [`Self::run`] returns.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Run the worker pool until the queue is shut down.
    pub async fn run(self: Arc<Self>) {
        info!(workers = self.config.workers, "Starting reconcile workers");
        let workers = (0..self.config.workers).map(|id| {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move { scheduler.worker(id).await })
        });
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Reconcile worker terminated abnormally: {}", e);
            }
        }
        info!("Reconcile workers stopped");
    }

    async fn worker(&self, id: usize) {
        while let Some(key) = self.queue.get().await {
            let span = tracing::info_span!("reconcile", worker = id, key = %key);
            self.process(&key).instrument(span).await;
            self.queue.done(&key);
        }
        debug!(worker = id, "Worker exiting");
    }

    /// Run one reconcile for `key` and schedule what comes next.
    pub(crate) async fn process(&self, key: &ObjectKey) {
        let Some(reconciler) = self.registry.get(key.kind) else {
            error!(kind = %key.kind, "No reconciler registered for kind");
            return;
        };

        let reconcile = AssertUnwindSafe(reconciler.reconcile(&key.namespace, &key.name)).catch_unwind();
        let result = match tokio::time::timeout(self.config.reconcile_timeout, reconcile).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(Error::Invariant(format!(
                "reconcile panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(Error::Timeout(self.config.reconcile_timeout)),
        };

        self.handle_result(key, result);
    }

    fn handle_result(&self, key: &ObjectKey, result: Result<Outcome>) {
        match result {
            Ok(Outcome::Done) => {
                self.backoff.forget(key);
                self.queue
                    .add_after(key.clone(), self.config.resync_interval);
            }
            Ok(Outcome::Pending) => {
                self.backoff.forget(key);
                self.queue
                    .add_after(key.clone(), self.config.requeue_interval);
            }
            Ok(Outcome::AwaitChange) => {
                self.backoff.forget(key);
            }
            Err(Error::Conflict(message)) => {
                debug!(%message, "Conflict, requeueing immediately");
                self.queue.add(key.clone());
            }
            Err(e) => {
                let delay = self.backoff.next_delay(key);
                warn!(
                    error = %e,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    failures = self.backoff.failures(key),
                    "Reconcile failed"
                );
                self.queue.add_after(key.clone(), delay);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
