//! Tasks - executable call-control steps
//!
//! Every instruction in a call application becomes a [`Task`]. Tasks share:
//! - a [`TaskLifecycle`] (kill flag, single-resolution completion, hooks)
//! - optional event publishing through a [`TaskEmitter`] when an owner
//!   wants to observe them (e.g. a gather owned by the bot orchestrator)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let builder = Arc::new(TaskBuilder::new(registry, step_factory, connector, settings));
//! let tasks = builder.build_application(&instructions)?;
//! for task in tasks {
//!     task.exec(session.clone(), Some(endpoint.clone())).await?;
//! }
//! ```

use async_trait::async_trait;
use call_types::{TaskName, TaskPreconditions, Transcription};
use serde_json::Value;
use std::sync::Arc;

pub mod action_queue;
pub mod bot;
pub mod builder;
pub mod emitter;
pub mod lifecycle;

#[cfg(test)]
mod tests;

pub use action_queue::{ActionHandle, ActionQueue, QueueError};
pub use builder::TaskBuilder;
pub use emitter::TaskEmitter;
pub use lifecycle::{TaskLifecycle, TaskState};

use crate::call::{CallSession, Endpoint, HookError};
use crate::channel::ChannelError;
use crate::registry::ValidationError;

// ============================================================================
// Task Contract
// ============================================================================

#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> TaskName;

    fn preconditions(&self) -> TaskPreconditions {
        TaskPreconditions::None
    }

    fn lifecycle(&self) -> &TaskLifecycle;

    /// Run the task against the call. Resolves when the task is done.
    async fn exec(
        &self,
        session: Arc<dyn CallSession>,
        endpoint: Option<Arc<dyn Endpoint>>,
    ) -> Result<(), TaskError>;

    /// Stop the task. Idempotent; always ends with completion signaled.
    async fn kill(&self, session: Arc<dyn CallSession>);

    fn killed(&self) -> bool {
        self.lifecycle().killed()
    }

    async fn await_task_done(&self) {
        self.lifecycle().await_task_done().await
    }
}

/// Events an owned step publishes to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    Transcription(Transcription),
    DtmfCollected { digits: String },
    Timeout,
    Error { message: String },
}

/// Builds concrete playback/collection steps (say, gather, hangup, refer)
pub trait StepFactory: Send + Sync {
    fn make_step(
        &self,
        name: TaskName,
        config: Value,
        owner: Option<TaskEmitter<StepEvent>>,
    ) -> Result<Arc<dyn Task>, TaskError>;
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("instruction must be an object naming exactly one task: {0}")]
    MalformedInstruction(String),

    #[error("{0} is not an executable task")]
    NotATask(String),

    #[error("{0} requires a media endpoint")]
    MissingEndpoint(TaskName),

    #[error("{0} has not been bound to a call session")]
    NotBound(TaskName),

    #[error("invalid task data: {0}")]
    InvalidData(String),

    #[error("hook error: {0}")]
    Hook(#[from] HookError),

    #[error("bot channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("step failed: {0}")]
    Step(String),

    #[error("actor error: {0}")]
    Actor(String),
}
