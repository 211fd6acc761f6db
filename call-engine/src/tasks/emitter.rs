//! TaskEmitter - event publishing capability for tasks
//!
//! Kept separate from [`TaskLifecycle`](super::TaskLifecycle): a step that
//! reports caller input (a gather publishing transcriptions) is handed an
//! emitter by its owner. The owner relays events into its mailbox with
//! [`TaskEmitter::forward`] and detaches with [`TaskEmitter::detach`].
//!
//! ```text
//! step.emit(e) ──► broadcast ──► relay task ──► owner callback (actor cast)
//!                                   ▲
//!               detach() cancels ───┘  (later emits are dropped)
//! ```

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_BUFFER: usize = 64;

pub struct TaskEmitter<E> {
    tx: broadcast::Sender<E>,
    detached: CancellationToken,
}

impl<E> Clone for TaskEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            detached: self.detached.clone(),
        }
    }
}

impl<E> std::fmt::Debug for TaskEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEmitter")
            .field("receivers", &self.tx.receiver_count())
            .field("detached", &self.detached.is_cancelled())
            .finish()
    }
}

impl<E: Clone + Send + 'static> Default for TaskEmitter<E> {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self {
            tx,
            detached: CancellationToken::new(),
        }
    }
}

impl<E: Clone + Send + 'static> TaskEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Relay every event to `deliver` until the emitter is detached.
    ///
    /// The subscription is taken before this returns, so events emitted
    /// right after the call are not lost.
    pub fn forward(&self, deliver: impl Fn(E) + Send + 'static) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        let detached = self.detached.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = detached.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => deliver(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "task event relay lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Publish `event`. Returns `false` when the owner has detached or
    /// nobody is subscribed, in which case the event is dropped.
    pub fn emit(&self, event: E) -> bool {
        if self.detached.is_cancelled() {
            return false;
        }
        self.tx.send(event).is_ok()
    }

    /// Stop relaying. Idempotent; applies to every clone.
    pub fn detach(&self) {
        self.detached.cancel();
    }

    pub fn is_attached(&self) -> bool {
        !self.detached.is_cancelled() && self.tx.receiver_count() > 0
    }
}
