//! ActionQueue - single-concurrency, submission-ordered execution
//!
//! Every caller-audible step an orchestrator produces goes through one of
//! these. Independent event sources may enqueue at any moment; the queue
//! runs their operations one at a time in the order `enqueue` was called.
//!
//! ```text
//! enqueue ──► intake (mpsc) ──► worker ──► op.await ──► ActionHandle
//!                  ▲
//!   end() drops ───┘  (later enqueues fail with QueueError::Closed)
//! ```
//!
//! Operations already accepted when `end()` is called still run to
//! completion; `end()` only closes intake.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("action queue {0} is closed")]
    Closed(String),

    #[error("queued action {0} was dropped before it settled")]
    Abandoned(String),
}

/// A bound operation plus its resolver, owned by the queue until settled
struct QueueItem {
    id: String,
    job: BoxFuture<'static, ()>,
}

pub struct ActionQueue {
    name: String,
    intake: Mutex<Option<mpsc::UnboundedSender<QueueItem>>>,
}

/// Completion handle for one queued operation
#[derive(Debug)]
pub struct ActionHandle<T> {
    id: String,
    outcome: oneshot::Receiver<T>,
}

impl<T> ActionHandle<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the operation to run and return its output
    pub async fn outcome(self) -> Result<T, QueueError> {
        self.outcome.await.map_err(|_| QueueError::Abandoned(self.id))
    }
}

impl ActionQueue {
    /// Create a queue and spawn its worker on the current tokio runtime
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(name.clone(), rx));
        Self {
            name,
            intake: Mutex::new(Some(tx)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit `op`. Fails closed once the queue has been ended.
    pub fn enqueue<F, T>(&self, op: F) -> Result<ActionHandle<T>, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let intake = self.intake.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = intake.as_ref() else {
            return Err(QueueError::Closed(self.name.clone()));
        };

        let id = ulid::Ulid::new().to_string();
        let (resolve, outcome) = oneshot::channel();
        let job = async move {
            let result = op.await;
            let _ = resolve.send(result);
        }
        .boxed();

        tx.send(QueueItem {
            id: id.clone(),
            job,
        })
        .map_err(|_| QueueError::Closed(self.name.clone()))?;

        tracing::trace!(queue = %self.name, item_id = %id, "action enqueued");
        Ok(ActionHandle { id, outcome })
    }

    /// Stop accepting operations. Idempotent.
    pub fn end(&self) {
        let mut intake = self.intake.lock().unwrap_or_else(|p| p.into_inner());
        if intake.take().is_some() {
            tracing::debug!(queue = %self.name, "action queue closed to new work");
        }
    }

    pub fn is_ended(&self) -> bool {
        self.intake
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_none()
    }
}

impl Drop for ActionQueue {
    fn drop(&mut self) {
        self.end();
    }
}

async fn drain(name: String, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
    while let Some(item) = rx.recv().await {
        tracing::trace!(queue = %name, item_id = %item.id, "action started");
        if AssertUnwindSafe(item.job).catch_unwind().await.is_err() {
            tracing::error!(queue = %name, item_id = %item.id, "queued action panicked");
        }
    }
    tracing::debug!(queue = %name, "action queue drained");
}
