//! Bot conversation task
//!
//! Bridges a live call to an external conversational bot. The task itself is
//! a thin front: `exec` spawns a [`BotOrchestrator`] actor that owns the
//! per-call [`ConversationSession`](actor::ConversationSession) and waits for
//! the lifecycle's completion signal.
//!
//! ```text
//! listening step ──StepEvent──┐
//!                             ├──► BotOrchestrator mailbox ──► ActionQueue ──► say/hangup/refer
//! bot channel ───ChannelEvent─┘
//! ```
//!
//! The mailbox serializes every handler; the queue serializes every
//! caller-audible step. `kill` and natural completion both end in the same
//! idempotent teardown.

use async_trait::async_trait;
use call_types::{TaskName, TaskPreconditions};
use ractor::{Actor, ActorRef};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

pub mod actor;
pub mod protocol;
pub mod reply;
pub mod speech_config;

pub use actor::{BotOrchestrator, ConversationArgs};
pub use protocol::{BotEvent, BotMsg, SessionSnapshot, TeardownReason};
pub use reply::{BotControl, BotReply, ReplyPayload};
pub use speech_config::{GatherConfig, SpeechConfig};

use super::{Task, TaskBuilder, TaskError, TaskLifecycle};
use crate::call::{CallSession, Endpoint};

/// Process-wide bot connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSettings {
    pub channel: String,
    pub welcome_message: String,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            channel: "jambonz".to_string(),
            welcome_message: "Welcome Message".to_string(),
        }
    }
}

/// Validated `cognigy` instruction data.
///
/// A `prompt` property passes validation but is not read: the bot opens the
/// conversation itself after the welcome message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotInstruction {
    pub url: String,
    pub token: String,
    #[serde(default)]
    pub event_hook: Option<String>,
    #[serde(default)]
    pub action_hook: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

pub struct BotTask {
    instruction: BotInstruction,
    lifecycle: Arc<TaskLifecycle>,
    builder: Arc<TaskBuilder>,
    actor: Mutex<Option<ActorRef<BotMsg>>>,
}

impl BotTask {
    pub fn new(data: &Value, builder: Arc<TaskBuilder>) -> Result<Self, TaskError> {
        let instruction: BotInstruction = serde_json::from_value(data.clone())
            .map_err(|e| TaskError::InvalidData(format!("cognigy: {e}")))?;
        let lifecycle = Arc::new(TaskLifecycle::new(
            TaskName::Cognigy,
            instruction.action_hook.clone(),
        ));
        Ok(Self {
            instruction,
            lifecycle,
            builder,
            actor: Mutex::new(None),
        })
    }

    pub fn instruction(&self) -> &BotInstruction {
        &self.instruction
    }

    /// Conversation state, while the orchestrator is running
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let actor = self.current_actor()?;
        ractor::call!(actor, |reply| BotMsg::GetSnapshot { reply }).ok()
    }

    fn current_actor(&self) -> Option<ActorRef<BotMsg>> {
        self.actor.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn teardown(actor: &ActorRef<BotMsg>, reason: TeardownReason) -> bool {
        match ractor::call!(actor, |reply| BotMsg::Teardown {
            reason,
            reply: Some(reply),
        }) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, reason = ?reason, "bot orchestrator unavailable for teardown");
                false
            }
        }
    }
}

#[async_trait]
impl Task for BotTask {
    fn name(&self) -> TaskName {
        TaskName::Cognigy
    }

    fn preconditions(&self) -> TaskPreconditions {
        TaskPreconditions::Endpoint
    }

    fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    async fn exec(
        &self,
        session: Arc<dyn CallSession>,
        endpoint: Option<Arc<dyn Endpoint>>,
    ) -> Result<(), TaskError> {
        let endpoint = endpoint.ok_or(TaskError::MissingEndpoint(TaskName::Cognigy))?;
        self.lifecycle.bind(&session);
        if self.lifecycle.killed() {
            self.lifecycle.notify_task_done();
            return Ok(());
        }

        let args = ConversationArgs {
            instruction: self.instruction.clone(),
            lifecycle: self.lifecycle.clone(),
            builder: self.builder.clone(),
            session: session.clone(),
            endpoint,
        };
        let (actor, handle) = Actor::spawn(None, BotOrchestrator, args)
            .await
            .map_err(|e| TaskError::Actor(format!("Failed to spawn bot orchestrator: {e}")))?;
        *self.actor.lock().unwrap_or_else(|p| p.into_inner()) = Some(actor.clone());

        // kill() may have run before the actor was published
        let connected = if self.lifecycle.killed() {
            Ok(())
        } else {
            match ractor::call!(actor, |reply| BotMsg::Connect { reply }) {
                Ok(result) => result.map_err(TaskError::from),
                Err(e) => Err(TaskError::Actor(e.to_string())),
            }
        };

        if connected.is_ok() {
            self.lifecycle.await_task_done().await;
        }

        if !Self::teardown(&actor, TeardownReason::Completed).await {
            self.lifecycle.notify_task_done();
        }
        actor.stop(None);
        if let Err(e) = handle.await {
            tracing::warn!(call_sid = %session.call_sid(), error = %e, "bot orchestrator did not stop cleanly");
        }
        self.actor.lock().unwrap_or_else(|p| p.into_inner()).take();

        if let Err(e) = &connected {
            tracing::error!(call_sid = %session.call_sid(), error = %e, "bot task failed");
        }
        connected
    }

    async fn kill(&self, _session: Arc<dyn CallSession>) {
        if !self.lifecycle.begin_kill() {
            return;
        }

        match self.current_actor() {
            Some(actor) => {
                if !Self::teardown(&actor, TeardownReason::Killed).await {
                    self.lifecycle.notify_task_done();
                }
            }
            None => self.lifecycle.notify_task_done(),
        }
    }
}
