//! Bot reply decoding
//!
//! A bot output event is decoded once, where it leaves the channel, into a
//! [`BotReply`]: the plain `text` field plus the `data.type` discriminated
//! payload. Everything downstream matches on the typed variants.

use call_types::FinalResult;
use serde::Deserialize;
use serde_json::Value;

/// `data` payload keyed by its `type` discriminator
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReplyPayload {
    QuickReplies {
        #[serde(rename = "_cognigy", default)]
        content: Option<RichContent>,
    },
    Gallery {
        #[serde(rename = "_cognigy", default)]
        content: Option<RichContent>,
    },
    Hangup {
        #[serde(default)]
        reason: Option<String>,
    },
    Refer {
        #[serde(default)]
        number: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RichContent {
    #[serde(rename = "_default", default)]
    pub default: Option<DefaultChannelContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DefaultChannelContent {
    #[serde(rename = "_quickReplies", default)]
    pub quick_replies: Option<SpokenContent>,
    #[serde(rename = "_gallery", default)]
    pub gallery: Option<SpokenContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpokenContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub fallback_text: Option<String>,
}

/// Call-control instruction carried by a reply
#[derive(Debug, Clone, PartialEq)]
pub enum BotControl {
    Hangup { reason: Option<String> },
    Refer { number: Option<String> },
}

impl BotControl {
    /// Final result reported once the control step ran successfully
    pub fn outcome(&self) -> FinalResult {
        match self {
            BotControl::Hangup { .. } => FinalResult::HangupSucceeded,
            BotControl::Refer { .. } => FinalResult::ReferSucceeded,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    pub text: Option<String>,
    pub payload: Option<ReplyPayload>,
    /// Raw `data` object, used to update the session speech settings
    pub data: Option<Value>,
    /// Undecoded event, forwarded to the event hook
    pub raw: Value,
}

impl BotReply {
    pub fn decode(raw: Value) -> Self {
        let text = non_empty(raw.get("text").and_then(Value::as_str));
        let data = raw.get("data").filter(|d| d.is_object()).cloned();
        let payload = data
            .as_ref()
            .filter(|d| d.get("type").is_some())
            .and_then(|d| match serde_json::from_value::<ReplyPayload>(d.clone()) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::info!(error = %e, data = %d, "ignoring malformed bot reply data");
                    None
                }
            });

        Self {
            text,
            payload,
            data,
            raw,
        }
    }

    /// Text to speak to the caller, if any
    pub fn spoken_text(&self) -> Option<String> {
        if let Some(text) = &self.text {
            return Some(text.clone());
        }

        match self.payload.as_ref()? {
            ReplyPayload::QuickReplies { content } => {
                let replies = content.as_ref()?.default.as_ref()?.quick_replies.as_ref()?;
                non_empty(replies.text.as_deref()).or_else(|| non_empty(replies.fallback_text.as_deref()))
            }
            ReplyPayload::Gallery { content } => {
                let gallery = content.as_ref()?.default.as_ref()?.gallery.as_ref()?;
                non_empty(gallery.fallback_text.as_deref())
            }
            ReplyPayload::Hangup { .. } | ReplyPayload::Refer { .. } | ReplyPayload::Other => None,
        }
    }

    pub fn control(&self) -> Option<BotControl> {
        match self.payload.as_ref()? {
            ReplyPayload::Hangup { reason } => Some(BotControl::Hangup {
                reason: reason.clone(),
            }),
            ReplyPayload::Refer { number } => Some(BotControl::Refer {
                number: number.clone(),
            }),
            _ => None,
        }
    }
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.filter(|t| !t.is_empty()).map(ToString::to_string)
}
