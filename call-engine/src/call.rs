//! Call collaborators - the seams between tasks and the live call
//!
//! Telephony signaling, media and webhook transport live outside this crate.
//! Tasks see them only through these traits:
//! - [`CallSession`] owns the running application (instruction list)
//! - [`Endpoint`] is the media leg tasks play to and listen on
//! - [`ActionHook`] / [`EventHook`] deliver results and events to the app

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// Endpoint
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint command {command} failed: {message}")]
    Command { command: String, message: String },
}

/// Media endpoint of the call leg
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn uuid(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Run a media-server API command, e.g. `uuid_break <uuid>`
    async fn api(&self, command: &str, args: &str) -> Result<String, EndpointError>;
}

// ============================================================================
// Webhooks
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    #[error("invalid hook url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("hook request failed: {0}")]
    Transport(String),

    #[error("hook {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("hook returned invalid response: {0}")]
    InvalidResponse(String),
}

/// Delivers a task's final result to the application
#[async_trait]
pub trait ActionHook: Send + Sync {
    /// Returns replacement instructions when the application answered with a
    /// non-empty list and `expect_response` is set
    async fn perform_action(
        &self,
        hook: &str,
        payload: Value,
        expect_response: bool,
    ) -> Result<Option<Vec<Value>>, HookError>;
}

/// Delivers mid-task events to the application
#[async_trait]
pub trait EventHook: Send + Sync {
    /// Returns `true` when the application redirected the call to a new
    /// script in response to the event
    async fn perform_hook(
        &self,
        session: Arc<dyn CallSession>,
        hook: &str,
        payload: Value,
    ) -> Result<bool, HookError>;
}

/// Hook collaborators resolved from the call session at task execution
#[derive(Clone)]
pub struct Notifiers {
    pub action_hook: Arc<dyn ActionHook>,
    pub event_hook: Arc<dyn EventHook>,
}

// ============================================================================
// Call Session
// ============================================================================

pub trait CallSession: Send + Sync {
    fn call_sid(&self) -> &str;

    /// Call metadata forwarded to the bot with the welcome message
    fn call_info(&self) -> Value;

    fn notifiers(&self) -> Notifiers;

    /// Atomically swap the active instruction list for `tasks`
    fn replace_application(&self, tasks: Vec<Value>);

    /// Set by the session while it is swapping applications
    fn is_replacing_application(&self) -> bool;
}
