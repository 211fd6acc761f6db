//! Shared types between the call engine and its collaborators
//!
//! These types cross the boundary between:
//! - the task engine (validation, lifecycle, bot orchestration)
//! - the call session, webhooks and speech steps that drive it
//!
//! Serializable with serde for JSON over webhooks and the bot channel

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Task Identity
// ============================================================================

/// Type tag of an executable call-control task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskName {
    #[serde(rename = "cognigy")]
    Cognigy,
    #[serde(rename = "say")]
    Say,
    #[serde(rename = "gather")]
    Gather,
    #[serde(rename = "hangup")]
    Hangup,
    #[serde(rename = "sip:refer")]
    SipRefer,
}

impl TaskName {
    /// Instruction name as it appears in an application script
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::Cognigy => "cognigy",
            TaskName::Say => "say",
            TaskName::Gather => "gather",
            TaskName::Hangup => "hangup",
            TaskName::SipRefer => "sip:refer",
        }
    }

    /// Map an instruction name to a task, `None` for non-task spec entries
    /// such as `synthesizer` or `recognizer`
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cognigy" => Some(TaskName::Cognigy),
            "say" => Some(TaskName::Say),
            "gather" => Some(TaskName::Gather),
            "hangup" => Some(TaskName::Hangup),
            "sip:refer" => Some(TaskName::SipRefer),
            _ => None,
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task needs from the call before it can execute
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskPreconditions {
    #[default]
    None,
    Endpoint,
}

// ============================================================================
// Final Action
// ============================================================================

/// Key under which the orchestrator outcome is reported to the action hook
pub const BOT_RESULT_KEY: &str = "cognigyResult";

/// Terminal outcome of a bot conversation, reported exactly once
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FinalResult {
    #[serde(rename = "caller hungup")]
    CallerHungup,
    #[serde(rename = "botError")]
    BotError,
    #[serde(rename = "hangup Succeeded")]
    HangupSucceeded,
    #[serde(rename = "refer succeeded")]
    ReferSucceeded,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "socketError")]
    SocketError,
    #[serde(rename = "redirect")]
    Redirect,
}

impl FinalResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalResult::CallerHungup => "caller hungup",
            FinalResult::BotError => "botError",
            FinalResult::HangupSucceeded => "hangup Succeeded",
            FinalResult::ReferSucceeded => "refer succeeded",
            FinalResult::Error => "error",
            FinalResult::Timeout => "timeout",
            FinalResult::SocketError => "socketError",
            FinalResult::Redirect => "redirect",
        }
    }

    /// Build the action hook payload, e.g. `{"cognigyResult": "timeout"}`
    pub fn to_payload(&self, message: Option<&str>) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        payload.insert(
            BOT_RESULT_KEY.to_string(),
            serde_json::Value::String(self.as_str().to_string()),
        );
        if let Some(message) = message {
            payload.insert(
                "message".to_string(),
                serde_json::Value::String(message.to_string()),
            );
        }
        serde_json::Value::Object(payload)
    }
}

impl fmt::Display for FinalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Conversation Session
// ============================================================================

/// No-input retry policy attached to the most recent listening step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default)]
    pub no_input_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_input_speech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_input_url: Option<String>,
}

/// Top-level orchestrator phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Init,
    Connecting,
    Active,
    Terminating,
    Done,
}

/// Turn sub-state while the session is active
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Listening,
    AwaitingBot,
    Speaking,
    Prompting,
}

// ============================================================================
// Caller Input
// ============================================================================

/// One recognition hypothesis from the speech engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Final transcription delivered by a listening step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transcription {
    pub alternatives: Vec<Alternative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl Transcription {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            alternatives: vec![Alternative {
                transcript: text.into(),
                confidence: None,
            }],
            language_code: None,
        }
    }

    /// Best hypothesis, empty when the engine returned none
    pub fn utterance(&self) -> &str {
        self.alternatives
            .first()
            .map(|alt| alt.transcript.as_str())
            .unwrap_or("")
    }
}

// ============================================================================
// Tests
// ============================================================================
