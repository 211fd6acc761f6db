//! HttpHooks - webhook delivery for action and event hooks
//!
//! Payloads are POSTed as JSON with the call's `call_sid` added. An
//! application answers with either nothing or a JSON array of replacement
//! instructions:
//!
//! ```text
//! POST {base_url}/action   {"cognigyResult": "timeout", "call_sid": "CA.."}
//!   ← 200 []                              keep the current application
//!   ← 200 [{"say": {...}}, {"hangup": {}}] run these instead
//! ```

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::call::{ActionHook, CallSession, EventHook, HookError, Notifiers};
use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct HttpHooks {
    client: reqwest::Client,
    base_url: Option<Url>,
    call_sid: String,
}

impl HttpHooks {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<&str>,
        call_sid: impl Into<String>,
    ) -> Result<Self, HookError> {
        let base_url = base_url
            .map(|raw| {
                Url::parse(raw).map_err(|e| HookError::InvalidUrl {
                    url: raw.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self {
            client,
            base_url,
            call_sid: call_sid.into(),
        })
    }

    pub fn from_config(config: &EngineConfig, call_sid: impl Into<String>) -> Result<Self, HookError> {
        let client = reqwest::Client::builder()
            .timeout(config.hook_timeout)
            .build()
            .map_err(|e| HookError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Self::new(client, config.hook_base_url.as_deref(), call_sid)
    }

    /// Both hook roles backed by this client
    pub fn notifiers(self: Arc<Self>) -> Notifiers {
        Notifiers {
            action_hook: self.clone(),
            event_hook: self,
        }
    }

    fn resolve(&self, hook: &str) -> Result<Url, HookError> {
        let invalid = |message: String| HookError::InvalidUrl {
            url: hook.to_string(),
            message,
        };
        if let Ok(url) = Url::parse(hook) {
            return Ok(url);
        }
        let base = self
            .base_url
            .as_ref()
            .ok_or_else(|| invalid("relative hook without a base url".to_string()))?;
        base.join(hook).map_err(|e| invalid(e.to_string()))
    }

    /// POST `payload` and return the decoded instruction list, empty when the
    /// application sent none
    async fn post(&self, hook: &str, payload: Value) -> Result<Vec<Value>, HookError> {
        let url = self.resolve(hook)?;
        let body = match payload {
            Value::Object(mut fields) => {
                fields.insert("call_sid".to_string(), Value::String(self.call_sid.clone()));
                Value::Object(fields)
            }
            other => json!({"call_sid": self.call_sid, "data": other}),
        };

        tracing::debug!(call_sid = %self.call_sid, url = %url, "sending hook");
        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| HookError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HookError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| HookError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(instructions)) => {
                if instructions.iter().any(|i| !i.is_object()) {
                    return Err(HookError::InvalidResponse(format!(
                        "{url} returned an instruction list with non-object entries"
                    )));
                }
                Ok(instructions)
            }
            Ok(_) | Err(_) => {
                tracing::debug!(call_sid = %self.call_sid, url = %url, "hook response carried no instructions");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl ActionHook for HttpHooks {
    async fn perform_action(
        &self,
        hook: &str,
        payload: Value,
        expect_response: bool,
    ) -> Result<Option<Vec<Value>>, HookError> {
        let instructions = self.post(hook, payload).await?;
        if expect_response && !instructions.is_empty() {
            Ok(Some(instructions))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl EventHook for HttpHooks {
    async fn perform_hook(
        &self,
        session: Arc<dyn CallSession>,
        hook: &str,
        payload: Value,
    ) -> Result<bool, HookError> {
        let instructions = self.post(hook, payload).await?;
        if instructions.is_empty() {
            return Ok(false);
        }

        tracing::info!(
            call_sid = %session.call_sid(),
            hook = %hook,
            count = instructions.len(),
            "event hook returned a new application"
        );
        session.replace_application(instructions);
        Ok(true)
    }
}
