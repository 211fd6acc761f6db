//! BotOrchestrator - the per-call conversation state machine
//!
//! ```text
//! INIT → CONNECTING → ACTIVE → TERMINATING → DONE
//!
//! ACTIVE turns:
//!   LISTENING → AWAITING_BOT → SPEAKING → LISTENING
//!        ↑                                   │
//!        └──────────── PROMPTING ◄── timeout ┘
//! ```
//!
//! Handlers run one at a time in the actor mailbox. Listening steps publish
//! into the mailbox through a [`TaskEmitter`]; the bot channel publishes
//! through its listener. Caller-audible work goes through the session's
//! [`ActionQueue`] so steps never overlap and keep submission order.
//!
//! Teardown runs inside a single handler, so no event can slip in between
//! detaching listeners and closing the queue.

use async_trait::async_trait;
use call_types::{FinalResult, RetryPolicy, SessionPhase, TaskName, Transcription, TurnState};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::{json, Value};
use std::sync::Arc;

use super::protocol::{BotEvent, BotMsg, SessionSnapshot, TeardownReason};
use super::reply::{BotControl, BotReply};
use super::speech_config::{GatherConfig, SpeechConfig};
use super::BotInstruction;
use crate::call::{CallSession, Endpoint};
use crate::channel::{ChannelError, ChannelEvent, ConnectOptions, ConversationChannel};
use crate::tasks::{ActionQueue, StepEvent, Task, TaskBuilder, TaskEmitter, TaskError, TaskLifecycle};

pub struct BotOrchestrator;

pub struct ConversationArgs {
    pub instruction: BotInstruction,
    pub lifecycle: Arc<TaskLifecycle>,
    pub builder: Arc<TaskBuilder>,
    pub session: Arc<dyn CallSession>,
    pub endpoint: Arc<dyn Endpoint>,
}

/// Per-call conversation state, owned by one orchestrator
pub struct ConversationSession {
    instruction: BotInstruction,
    lifecycle: Arc<TaskLifecycle>,
    builder: Arc<TaskBuilder>,
    session: Arc<dyn CallSession>,
    endpoint: Arc<dyn Endpoint>,
    speech: SpeechConfig,
    channel: Option<Arc<dyn ConversationChannel>>,
    queue: ActionQueue,
    step_events: TaskEmitter<StepEvent>,
    listening: Option<Arc<dyn Task>>,
    /// Texts spoken since the bot last finished a turn
    prompts: Vec<String>,
    retry: RetryPolicy,
    timeout_count: u32,
    reported_final_action: bool,
    /// A hangup/refer step is queued; later bot output is not played
    control_pending: bool,
    phase: SessionPhase,
    turn: TurnState,
    torn_down: bool,
}

impl ConversationSession {
    fn call_sid(&self) -> &str {
        self.session.call_sid()
    }

    fn has_reported_final_action(&self) -> bool {
        self.reported_final_action || self.session.is_replacing_application()
    }

    /// Claim the single final-action report. `false` if already claimed.
    fn claim_final_action(&mut self) -> bool {
        if self.has_reported_final_action() {
            return false;
        }
        self.reported_final_action = true;
        true
    }

    /// Events arriving after the conversation ended are dropped
    fn is_closed(&self) -> bool {
        self.torn_down || matches!(self.phase, SessionPhase::Terminating | SessionPhase::Done)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            turn: self.turn,
            timeout_count: self.timeout_count,
            retry: self.retry.clone(),
            reported_final_action: self.reported_final_action,
            prompts: self.prompts.clone(),
            queue_ended: self.queue.is_ended(),
            listeners_attached: self.step_events.is_attached(),
        }
    }
}

// ============================================================================
// Actor Implementation
// ============================================================================

#[async_trait]
impl Actor for BotOrchestrator {
    type Msg = BotMsg;
    type State = ConversationSession;
    type Arguments = ConversationArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let call_sid = args.session.call_sid().to_string();
        let speech = SpeechConfig::from_data(&args.instruction.data);

        let step_events = TaskEmitter::new();
        let me = myself.clone();
        step_events.forward(move |event: StepEvent| {
            if me.cast(BotMsg::Step(event)).is_err() {
                tracing::trace!("step event after bot orchestrator stopped");
            }
        });

        tracing::debug!(call_sid = %call_sid, url = %args.instruction.url, "bot orchestrator starting");

        Ok(ConversationSession {
            instruction: args.instruction,
            lifecycle: args.lifecycle,
            builder: args.builder,
            session: args.session,
            endpoint: args.endpoint,
            speech,
            channel: None,
            queue: ActionQueue::new(format!("bot:{call_sid}")),
            step_events,
            listening: None,
            prompts: Vec::new(),
            retry: RetryPolicy::default(),
            timeout_count: 0,
            reported_final_action: false,
            control_pending: false,
            phase: SessionPhase::Init,
            turn: TurnState::Listening,
            torn_down: false,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BotMsg::Connect { reply } => {
                let result = self.connect(&myself, state).await;
                let _ = reply.send(result);
            }

            BotMsg::Step(event) => {
                if state.is_closed() {
                    tracing::debug!(call_sid = %state.call_sid(), event = ?event, "dropping step event, conversation closed");
                    return Ok(());
                }
                match event {
                    StepEvent::Transcription(transcription) => {
                        self.on_transcription(state, transcription).await
                    }
                    StepEvent::DtmfCollected { digits } => {
                        tracing::info!(call_sid = %state.call_sid(), digits = %digits, "got dtmf");
                        self.forward_to_bot(state, &digits).await;
                    }
                    StepEvent::Timeout => self.on_timeout(state).await,
                    StepEvent::Error { message } => {
                        tracing::info!(call_sid = %state.call_sid(), error = %message, "listening step failed");
                        self.finish(state, FinalResult::Error, Some(&message)).await;
                    }
                }
            }

            BotMsg::Bot(event) => {
                if state.is_closed() {
                    tracing::debug!(call_sid = %state.call_sid(), "dropping bot event, conversation closed");
                    return Ok(());
                }
                match event {
                    BotEvent::Utterance(reply) => self.on_bot_utterance(&myself, state, reply).await,
                    BotEvent::Error { message } => {
                        tracing::info!(call_sid = %state.call_sid(), error = %message, "bot channel error");
                        self.finish(state, FinalResult::BotError, Some(&message)).await;
                    }
                    BotEvent::FinalPing => self.on_final_ping(state).await,
                }
            }

            BotMsg::ControlStepSettled { control, result } => {
                self.on_control_settled(state, control, result);
            }

            BotMsg::Teardown { reason, reply } => {
                self.teardown(state, reason).await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }

            BotMsg::GetSnapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        self.teardown(state, TeardownReason::Stopped).await;
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

impl BotOrchestrator {
    async fn connect(
        &self,
        myself: &ActorRef<BotMsg>,
        state: &mut ConversationSession,
    ) -> Result<(), ChannelError> {
        if state.phase != SessionPhase::Init {
            tracing::warn!(call_sid = %state.call_sid(), phase = ?state.phase, "connect requested twice");
            return Ok(());
        }
        state.phase = SessionPhase::Connecting;

        let settings = state.builder.bot_settings().clone();
        let options = ConnectOptions::for_call(state.call_sid(), &settings.channel);
        let channel = state
            .builder
            .connector()
            .open(&state.instruction.url, &state.instruction.token, options);

        let me = myself.clone();
        channel.on_event(Box::new(move |event: ChannelEvent| {
            if me.cast(BotMsg::Bot(BotEvent::from(event))).is_err() {
                tracing::trace!("bot event after bot orchestrator stopped");
            }
        }));
        state.channel = Some(channel.clone());

        if let Err(e) = channel.connect().await {
            tracing::error!(call_sid = %state.call_sid(), error = %e, "failed to connect to bot");
            self.finish(state, FinalResult::BotError, Some(&e.to_string())).await;
            return Err(e);
        }

        let mut welcome = state.instruction.data.clone();
        if let Value::Object(call_info) = state.session.call_info() {
            welcome.extend(call_info);
        }
        if let Err(e) = channel
            .send_message(&settings.welcome_message, Some(Value::Object(welcome)))
            .await
        {
            tracing::warn!(call_sid = %state.call_sid(), error = %e, "failed to send welcome message to bot");
        }

        state.phase = SessionPhase::Active;
        state.turn = TurnState::Listening;
        tracing::info!(call_sid = %state.call_sid(), channel = %settings.channel, "bot conversation started");
        Ok(())
    }

    async fn on_transcription(&self, state: &mut ConversationSession, transcription: Transcription) {
        let utterance = transcription.utterance().to_string();
        tracing::debug!(call_sid = %state.call_sid(), utterance = %utterance, "got transcription");

        if let Some(hook) = state.instruction.event_hook.clone() {
            let payload = json!({"event": "userMessage", "message": utterance});
            if self.intercepted(state, &hook, payload).await {
                if let Some(step) = state.listening.take() {
                    if !step.lifecycle().is_done() {
                        step.kill(state.session.clone()).await;
                    }
                }
                return;
            }
        }

        self.forward_to_bot(state, &utterance).await;
    }

    /// Offer an event to the application's event hook. `true` when the
    /// application redirected the call, in which case the redirect has been
    /// reported and this conversation stops.
    async fn intercepted(&self, state: &mut ConversationSession, hook: &str, payload: Value) -> bool {
        match state.lifecycle.perform_hook(hook, payload).await {
            Ok(false) => false,
            Ok(true) => {
                tracing::info!(call_sid = %state.call_sid(), hook = %hook, "event hook redirected call to a new application");
                state.phase = SessionPhase::Terminating;
                if !state.reported_final_action {
                    state.reported_final_action = true;
                    if let Err(e) = state
                        .lifecycle
                        .perform_action(FinalResult::Redirect.to_payload(None), false)
                        .await
                    {
                        tracing::info!(call_sid = %state.call_sid(), error = %e, "error reporting redirect");
                    }
                }
                true
            }
            Err(e) => {
                tracing::info!(call_sid = %state.call_sid(), hook = %hook, error = %e, "error sending event hook");
                false
            }
        }
    }

    async fn forward_to_bot(&self, state: &mut ConversationSession, text: &str) {
        let Some(channel) = state.channel.clone().filter(|c| c.is_connected()) else {
            tracing::info!(call_sid = %state.call_sid(), "not sending caller input, bot is disconnected");
            return;
        };

        match channel.send_message(text, None).await {
            Ok(()) => state.turn = TurnState::AwaitingBot,
            Err(e) => {
                tracing::error!(call_sid = %state.call_sid(), error = %e, "error sending caller input to bot, ending task");
                self.finish(state, FinalResult::SocketError, None).await;
            }
        }
    }

    async fn on_bot_utterance(
        &self,
        myself: &ActorRef<BotMsg>,
        state: &mut ConversationSession,
        reply: BotReply,
    ) {
        tracing::debug!(call_sid = %state.call_sid(), reply = %reply.raw, "got bot utterance");

        if let Some(hook) = state.instruction.event_hook.clone() {
            let payload = json!({"event": "botMessage", "message": reply.raw});
            if self.intercepted(state, &hook, payload).await {
                return;
            }
        }

        if let Some(data) = &reply.data {
            state.speech.update(data);
        }

        if state.control_pending {
            tracing::info!(call_sid = %state.call_sid(), "dropping bot output queued behind a final control step");
            return;
        }

        if let Some(text) = reply.spoken_text() {
            self.enqueue_say(state, text);
        }

        if let Some(control) = reply.control() {
            self.enqueue_control(myself, state, control).await;
        }
    }

    fn enqueue_say(&self, state: &mut ConversationSession, text: String) {
        let step = match state
            .builder
            .make_step(TaskName::Say, state.speech.make_say_config(&text), None)
        {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!(call_sid = %state.call_sid(), error = %e, "could not build say step");
                return;
            }
        };

        let session = state.session.clone();
        let endpoint = state.endpoint.clone();
        let queued = state.queue.enqueue(async move {
            if let Err(e) = step.exec(session, Some(endpoint)).await {
                tracing::info!(error = %e, "say step failed");
            }
        });

        match queued {
            Ok(handle) => {
                tracing::debug!(call_sid = %state.call_sid(), item_id = %handle.id(), "say step queued");
                state.prompts.push(text);
                state.turn = TurnState::Speaking;
            }
            Err(e) => {
                tracing::info!(call_sid = %state.call_sid(), error = %e, "dropping say step");
            }
        }
    }

    async fn enqueue_control(
        &self,
        myself: &ActorRef<BotMsg>,
        state: &mut ConversationSession,
        control: BotControl,
    ) {
        let step = match self.build_control_step(state, &control) {
            Ok(step) => step,
            Err(e) => {
                tracing::info!(call_sid = %state.call_sid(), control = ?control, error = %e, "error building control step");
                self.finish(state, FinalResult::Error, Some(&e.to_string())).await;
                return;
            }
        };

        let session = state.session.clone();
        let endpoint = state.endpoint.clone();
        let handle = match state.queue.enqueue(async move {
            step.exec(session, Some(endpoint))
                .await
                .map_err(|e| e.to_string())
        }) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::info!(call_sid = %state.call_sid(), control = ?control, error = %e, "error queueing control step");
                self.finish(state, FinalResult::Error, Some(&e.to_string())).await;
                return;
            }
        };
        state.control_pending = true;
        // The step may end the call, and with it this task, before it settles
        let report = state.claim_final_action();
        tracing::debug!(call_sid = %state.call_sid(), control = ?control, item_id = %handle.id(), "control step queued");

        let me = myself.clone();
        let lifecycle = state.lifecycle.clone();
        let call_sid = state.call_sid().to_string();
        tokio::spawn(async move {
            let result = handle.outcome().await.unwrap_or_else(|e| Err(e.to_string()));
            if report {
                let payload = match &result {
                    Ok(()) => control.outcome().to_payload(None),
                    Err(message) => FinalResult::Error.to_payload(Some(message.as_str())),
                };
                if let Err(e) = lifecycle.perform_action(payload, true).await {
                    tracing::info!(call_sid = %call_sid, control = ?control, error = %e, "error with action hook");
                }
            }
            if me.cast(BotMsg::ControlStepSettled { control, result }).is_err() {
                tracing::debug!(call_sid = %call_sid, "control step settled after bot orchestrator stopped");
            }
        });
    }

    fn build_control_step(
        &self,
        state: &ConversationSession,
        control: &BotControl,
    ) -> Result<Arc<dyn Task>, TaskError> {
        match control {
            BotControl::Hangup { reason } => {
                let headers = match reason {
                    Some(reason) => json!({"X-Reason": reason}),
                    None => json!({}),
                };
                state
                    .builder
                    .make_step(TaskName::Hangup, json!({"headers": headers}), None)
            }
            BotControl::Refer { number } => {
                let number = number
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| TaskError::InvalidData("refer reply has no transfer target".to_string()))?;
                state.builder.make_step(
                    TaskName::SipRefer,
                    json!({"referTo": number, "referredBy": "cognigy"}),
                    None,
                )
            }
        }
    }

    fn on_control_settled(
        &self,
        state: &mut ConversationSession,
        control: BotControl,
        result: Result<(), String>,
    ) {
        if let Err(message) = &result {
            tracing::info!(call_sid = %state.call_sid(), control = ?control, error = %message, "control step failed");
        }
        if state.torn_down {
            tracing::debug!(call_sid = %state.call_sid(), control = ?control, "control step settled after teardown");
            return;
        }
        state.phase = SessionPhase::Terminating;
        state.lifecycle.notify_task_done();
    }

    async fn on_final_ping(&self, state: &mut ConversationSession) {
        tracing::info!(call_sid = %state.call_sid(), prompts = ?state.prompts, "bot finished its turn");
        state.prompts.clear();
        if state.control_pending {
            return;
        }
        self.arm_listening(state, Some(""), None).await;
        state.turn = TurnState::Listening;
    }

    async fn on_timeout(&self, state: &mut ConversationSession) {
        tracing::debug!(
            call_sid = %state.call_sid(),
            timeout_count = state.timeout_count,
            retry = ?state.retry,
            "no input from caller"
        );

        if state.timeout_count < state.retry.no_input_retries {
            state.timeout_count += 1;
            state.turn = TurnState::Prompting;
            let speech = state.retry.no_input_speech.clone();
            let url = state.retry.no_input_url.clone();
            self.arm_listening(state, speech.as_deref(), url.as_deref()).await;
        } else {
            self.finish(state, FinalResult::Timeout, None).await;
        }
    }

    /// Start a new listening step owned by this conversation
    async fn arm_listening(
        &self,
        state: &mut ConversationSession,
        text_prompt: Option<&str>,
        url_prompt: Option<&str>,
    ) {
        let GatherConfig { gather, retry } = state.speech.make_gather_config(text_prompt, url_prompt);
        state.retry = retry;

        let step = match state
            .builder
            .make_step(TaskName::Gather, gather, Some(state.step_events.clone()))
        {
            Ok(step) => step,
            Err(e) => {
                tracing::info!(call_sid = %state.call_sid(), error = %e, "error building listening step");
                self.finish(state, FinalResult::Error, Some(&e.to_string())).await;
                return;
            }
        };

        if let Some(previous) = state.listening.replace(step.clone()) {
            if !previous.lifecycle().is_done() {
                previous.kill(state.session.clone()).await;
            }
        }

        let session = state.session.clone();
        let endpoint = state.endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = step.exec(session, Some(endpoint)).await {
                tracing::info!(error = %e, "listening step returned error");
            }
        });
    }

    /// Report `result` unless a final action was already reported, then
    /// signal completion
    async fn finish(&self, state: &mut ConversationSession, result: FinalResult, message: Option<&str>) {
        if state.claim_final_action() {
            tracing::info!(call_sid = %state.call_sid(), result = %result, "reporting final action");
            if let Err(e) = state
                .lifecycle
                .perform_action(result.to_payload(message), true)
                .await
            {
                tracing::info!(call_sid = %state.call_sid(), result = %result, error = %e, "error with action hook");
            }
        } else {
            tracing::debug!(call_sid = %state.call_sid(), result = %result, "final action already reported");
        }
        state.phase = SessionPhase::Terminating;
        state.lifecycle.notify_task_done();
    }

    async fn teardown(&self, state: &mut ConversationSession, reason: TeardownReason) {
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        tracing::debug!(call_sid = %state.call_sid(), reason = ?reason, "tearing down bot conversation");

        state.step_events.detach();

        if let Some(step) = state.listening.take() {
            if !step.lifecycle().is_done() {
                step.kill(state.session.clone()).await;
            }
        }

        if let Some(channel) = state.channel.take() {
            channel.remove_all_listeners();
            if channel.is_connected() {
                channel.disconnect().await;
            }
        }

        // Nothing can reach the queue past this point
        state.queue.end();

        if state.claim_final_action() {
            if let Err(e) = state
                .lifecycle
                .perform_action(FinalResult::CallerHungup.to_payload(None), true)
                .await
            {
                tracing::info!(call_sid = %state.call_sid(), error = %e, "error with action hook");
            }
        }

        if state.endpoint.is_connected() {
            let uuid = state.endpoint.uuid().to_string();
            if let Err(e) = state.endpoint.api("uuid_break", &uuid).await {
                tracing::info!(call_sid = %state.call_sid(), error = %e, "error killing audio");
            }
        }

        state.lifecycle.notify_task_done();
        state.phase = SessionPhase::Done;
    }
}
