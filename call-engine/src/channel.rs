//! Conversation channel - duplex session with the external bot engine
//!
//! The bot's wire protocol is owned by the channel implementation. The
//! orchestrator only connects, sends caller input, and listens for
//! [`ChannelEvent`]s. Reconnection is the channel's concern.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    pub enable_typing_indicator: bool,
}

/// Options passed to the bot engine when opening a session
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    pub session_id: String,
    pub channel: String,
    pub force_websockets: bool,
    pub reconnection: bool,
    pub settings: ChannelSettings,
}

impl ConnectOptions {
    pub fn for_call(call_sid: &str, channel: &str) -> Self {
        Self {
            session_id: call_sid.to_string(),
            channel: channel.to_string(),
            force_websockets: true,
            reconnection: true,
            settings: ChannelSettings {
                enable_typing_indicator: false,
            },
        }
    }
}

/// Raw events emitted by the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Bot utterance payload, undecoded
    Output(Value),
    Error { message: String },
    FinalPing,
}

pub type ChannelListener = Box<dyn Fn(ChannelEvent) + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect to bot: {0}")]
    Connect(String),

    #[error("failed to send message to bot: {0}")]
    Send(String),
}

#[async_trait]
pub trait ConversationChannel: Send + Sync {
    fn on_event(&self, listener: ChannelListener);

    fn remove_all_listeners(&self);

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<(), ChannelError>;

    /// Send caller text or digits, optionally with structured data
    async fn send_message(&self, text: &str, data: Option<Value>) -> Result<(), ChannelError>;

    async fn disconnect(&self);
}

/// Creates unconnected channels for a bot endpoint
pub trait ConversationConnector: Send + Sync {
    fn open(
        &self,
        url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> Arc<dyn ConversationChannel>;
}
