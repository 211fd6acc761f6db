//! TaskLifecycle - the construct/execute/kill/complete contract every task shares
//!
//! ```text
//! Constructed → Executing → Killed
//!                        ↘ Completed
//! ```
//!
//! Completion is a single-resolution signal: `notify_task_done` may be called
//! any number of times from any path (natural end, kill, error) and
//! `await_task_done` resolves exactly once for all waiters.

use call_types::TaskName;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

use super::TaskError;
use crate::call::{CallSession, Notifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Constructed,
    Executing,
    Killed,
    Completed,
}

struct BoundSession {
    session: Arc<dyn CallSession>,
    notifiers: Notifiers,
}

pub struct TaskLifecycle {
    name: TaskName,
    action_hook: Option<String>,
    state: Mutex<TaskState>,
    kill_in_progress: AtomicBool,
    done: CancellationToken,
    bound: OnceLock<BoundSession>,
}

impl std::fmt::Debug for TaskLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycle")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("killed", &self.killed())
            .field("done", &self.is_done())
            .finish()
    }
}

impl TaskLifecycle {
    pub fn new(name: TaskName, action_hook: Option<String>) -> Self {
        Self {
            name,
            action_hook,
            state: Mutex::new(TaskState::Constructed),
            kill_in_progress: AtomicBool::new(false),
            done: CancellationToken::new(),
            bound: OnceLock::new(),
        }
    }

    pub fn name(&self) -> TaskName {
        self.name
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Bind the session and its hook collaborators; moves to Executing
    pub fn bind(&self, session: &Arc<dyn CallSession>) {
        let fresh = self
            .bound
            .set(BoundSession {
                session: session.clone(),
                notifiers: session.notifiers(),
            })
            .is_ok();
        if !fresh {
            tracing::warn!(task = %self.name, "task executed more than once; keeping first session");
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state == TaskState::Constructed {
            *state = TaskState::Executing;
        }
    }

    pub fn session(&self) -> Option<Arc<dyn CallSession>> {
        self.bound.get().map(|bound| bound.session.clone())
    }

    pub fn killed(&self) -> bool {
        self.kill_in_progress.load(Ordering::SeqCst)
    }

    /// Mark the task killed. Returns `true` only for the first caller.
    pub fn begin_kill(&self) -> bool {
        let first = !self.kill_in_progress.swap(true, Ordering::SeqCst);
        if first {
            tracing::debug!(task = %self.name, "task is being killed");
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if matches!(*state, TaskState::Constructed | TaskState::Executing) {
                *state = TaskState::Killed;
            }
        }
        first
    }

    /// Resolve the completion signal. Safe to call repeatedly.
    pub fn notify_task_done(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if matches!(*state, TaskState::Constructed | TaskState::Executing) {
                *state = TaskState::Completed;
            }
        }
        self.done.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub async fn await_task_done(&self) {
        self.done.cancelled().await;
    }

    /// Report `results` to the task's action hook.
    ///
    /// When the application answers with a non-empty instruction list the
    /// call session's application is replaced with it.
    pub async fn perform_action(&self, results: Value, expect_response: bool) -> Result<(), TaskError> {
        let Some(hook) = self.action_hook.as_deref() else {
            tracing::debug!(task = %self.name, results = %results, "no action hook configured");
            return Ok(());
        };
        let bound = self.bound.get().ok_or(TaskError::NotBound(self.name))?;

        let tasks = bound
            .notifiers
            .action_hook
            .perform_action(hook, results, expect_response)
            .await?;

        if let Some(tasks) = tasks.filter(|tasks| !tasks.is_empty()) {
            tracing::debug!(
                task = %self.name,
                count = tasks.len(),
                "replacing application with tasks from action hook"
            );
            bound.session.replace_application(tasks);
        }
        Ok(())
    }

    /// Send an event to `hook`; `true` means the application redirected
    pub async fn perform_hook(&self, hook: &str, payload: Value) -> Result<bool, TaskError> {
        let bound = self.bound.get().ok_or(TaskError::NotBound(self.name))?;
        let redirected = bound
            .notifiers
            .event_hook
            .perform_hook(bound.session.clone(), hook, payload)
            .await?;
        Ok(redirected)
    }
}
