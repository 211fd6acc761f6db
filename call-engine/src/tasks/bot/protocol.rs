//! Messages understood by the bot conversation actor

use call_types::{RetryPolicy, SessionPhase, TurnState};
use ractor::RpcReplyPort;
use serde::Serialize;

use super::reply::{BotControl, BotReply};
use crate::channel::{ChannelError, ChannelEvent};
use crate::tasks::StepEvent;

#[derive(Debug)]
pub enum BotMsg {
    /// Open the bot channel and send the welcome message
    Connect {
        reply: RpcReplyPort<Result<(), ChannelError>>,
    },
    /// Caller input or timeout published by the listening step
    Step(StepEvent),
    /// Event from the bot channel
    Bot(BotEvent),
    /// A queued hangup/refer step finished running; its outcome is already reported
    ControlStepSettled {
        control: BotControl,
        result: Result<(), String>,
    },
    /// Release the channel, queue and listening step. Idempotent.
    Teardown {
        reason: TeardownReason,
        reply: Option<RpcReplyPort<()>>,
    },
    GetSnapshot {
        reply: RpcReplyPort<SessionSnapshot>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Utterance(BotReply),
    Error { message: String },
    FinalPing,
}

impl From<ChannelEvent> for BotEvent {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Output(raw) => BotEvent::Utterance(BotReply::decode(raw)),
            ChannelEvent::Error { message } => BotEvent::Error { message },
            ChannelEvent::FinalPing => BotEvent::FinalPing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownReason {
    /// The call hung up or the session cancelled the task
    Killed,
    /// The conversation reached a final action on its own
    Completed,
    /// The actor is stopping without an explicit teardown
    Stopped,
}

/// Point-in-time view of the conversation state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub turn: TurnState,
    pub timeout_count: u32,
    pub retry: RetryPolicy,
    pub reported_final_action: bool,
    pub prompts: Vec<String>,
    pub queue_ended: bool,
    pub listeners_attached: bool,
}
