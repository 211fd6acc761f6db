use async_trait::async_trait;
use call_types::{TaskName, TaskPreconditions};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::call::{ActionHook, CallSession, Endpoint, EndpointError, EventHook, HookError, Notifiers};
use crate::channel::{
    ChannelError, ChannelEvent, ChannelListener, ConnectOptions, ConversationChannel,
    ConversationConnector,
};
use crate::registry::InstructionRegistry;
use crate::tasks::bot::{BotSettings, BotTask};
use crate::tasks::{StepEvent, StepFactory, Task, TaskBuilder, TaskEmitter, TaskError, TaskLifecycle};

pub(crate) const CALL_SID: &str = "CA-test-0001";

/// Ordered record of every externally visible effect
#[derive(Clone, Default)]
pub(crate) struct EffectLog(Arc<Mutex<Vec<String>>>);

impl EffectLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub(crate) fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }

    /// Index of the first occurrence of `entry`
    pub(crate) fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} not in log: {:?}", self.entries()))
    }
}

pub(crate) async fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !ready() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Call collaborators
// ============================================================================

pub(crate) struct FakeHooks {
    log: EffectLog,
    pub(crate) actions: Mutex<Vec<Value>>,
    pub(crate) events: Mutex<Vec<Value>>,
    pub(crate) redirect: AtomicBool,
}

#[async_trait]
impl ActionHook for FakeHooks {
    async fn perform_action(
        &self,
        _hook: &str,
        payload: Value,
        _expect_response: bool,
    ) -> Result<Option<Vec<Value>>, HookError> {
        let result = payload["cognigyResult"].as_str().unwrap_or("?").to_string();
        self.log.push(format!("action:{result}"));
        self.actions.lock().unwrap().push(payload);
        Ok(None)
    }
}

#[async_trait]
impl EventHook for FakeHooks {
    async fn perform_hook(
        &self,
        _session: Arc<dyn CallSession>,
        _hook: &str,
        payload: Value,
    ) -> Result<bool, HookError> {
        let event = payload["event"].as_str().unwrap_or("?").to_string();
        self.log.push(format!("event:{event}"));
        self.events.lock().unwrap().push(payload);
        Ok(self.redirect.load(Ordering::SeqCst))
    }
}

pub(crate) struct FakeSession {
    pub(crate) hooks: Arc<FakeHooks>,
    pub(crate) replacing: AtomicBool,
}

impl FakeSession {
    /// Final results reported to the action hook, in order
    pub(crate) fn results(&self) -> Vec<String> {
        self.hooks
            .actions
            .lock()
            .unwrap()
            .iter()
            .map(|a| a["cognigyResult"].as_str().unwrap_or("?").to_string())
            .collect()
    }
}

impl CallSession for FakeSession {
    fn call_sid(&self) -> &str {
        CALL_SID
    }

    fn call_info(&self) -> Value {
        json!({"callSid": CALL_SID, "from": "+15550100", "to": "+15550199"})
    }

    fn notifiers(&self) -> Notifiers {
        Notifiers {
            action_hook: self.hooks.clone(),
            event_hook: self.hooks.clone(),
        }
    }

    fn replace_application(&self, _tasks: Vec<Value>) {}

    fn is_replacing_application(&self) -> bool {
        self.replacing.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeEndpoint {
    log: EffectLog,
    connected: AtomicBool,
    pub(crate) fail_api: AtomicBool,
}

#[async_trait]
impl Endpoint for FakeEndpoint {
    fn uuid(&self) -> &str {
        "ep-0001"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn api(&self, command: &str, _args: &str) -> Result<String, EndpointError> {
        self.log.push(format!("endpoint:{command}"));
        if self.fail_api.load(Ordering::SeqCst) {
            return Err(EndpointError::Command {
                command: command.to_string(),
                message: "-ERR no such channel".to_string(),
            });
        }
        Ok("+OK".to_string())
    }
}

// ============================================================================
// Bot channel
// ============================================================================

pub(crate) struct FakeChannel {
    log: EffectLog,
    listeners: Mutex<Vec<ChannelListener>>,
    connected: AtomicBool,
    pub(crate) fail_connect: AtomicBool,
    pub(crate) fail_send: AtomicBool,
    pub(crate) sent: Mutex<Vec<(String, Option<Value>)>>,
    pub(crate) options: Mutex<Option<ConnectOptions>>,
}

impl FakeChannel {
    /// Deliver an event as the bot engine would
    pub(crate) fn emit(&self, event: ChannelEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(event.clone());
        }
    }

    pub(crate) fn reply(&self, output: Value) {
        self.emit(ChannelEvent::Output(output));
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl ConversationChannel for FakeChannel {
    fn on_event(&self, listener: ChannelListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_all_listeners(&self) {
        self.log.push("channel:detach");
        self.listeners.lock().unwrap().clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, text: &str, data: Option<Value>) -> Result<(), ChannelError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ChannelError::Send("socket closed".to_string()));
        }
        self.log.push(format!("bot:{text}"));
        self.sent.lock().unwrap().push((text.to_string(), data));
        Ok(())
    }

    async fn disconnect(&self) {
        self.log.push("channel:disconnect");
        self.connected.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct FakeConnector {
    channel: Arc<FakeChannel>,
}

impl ConversationConnector for FakeConnector {
    fn open(&self, _url: &str, _token: &str, options: ConnectOptions) -> Arc<dyn ConversationChannel> {
        *self.channel.options.lock().unwrap() = Some(options);
        self.channel.clone()
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Stand-in for say/gather/hangup/refer that records what it was asked to do
pub(crate) struct FakeStep {
    name: TaskName,
    config: Value,
    owner: Option<TaskEmitter<StepEvent>>,
    lifecycle: TaskLifecycle,
    log: EffectLog,
    delay: Duration,
    fail: bool,
}

impl FakeStep {
    fn describe(&self) -> String {
        match self.name {
            TaskName::Say => format!("say:{}", self.config["text"].as_str().unwrap_or("")),
            TaskName::Gather => {
                let prompt = self.config["say"]["text"]
                    .as_str()
                    .or_else(|| self.config["play"]["url"].as_str())
                    .unwrap_or("-");
                format!("gather:{prompt}")
            }
            TaskName::Hangup => format!(
                "hangup:{}",
                self.config["headers"]["X-Reason"].as_str().unwrap_or("")
            ),
            TaskName::SipRefer => format!("refer:{}", self.config["referTo"].as_str().unwrap_or("")),
            TaskName::Cognigy => "cognigy".to_string(),
        }
    }
}

#[async_trait]
impl Task for FakeStep {
    fn name(&self) -> TaskName {
        self.name
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
        _endpoint: Option<Arc<dyn Endpoint>>,
    ) -> Result<(), TaskError> {
        self.lifecycle.bind(&session);
        if self.name == TaskName::Gather {
            self.log.push(self.describe());
            self.lifecycle.await_task_done().await;
            return Ok(());
        }

        tokio::time::sleep(self.delay).await;
        if self.fail {
            self.lifecycle.notify_task_done();
            return Err(TaskError::Step(format!("{} failed", self.name)));
        }
        self.log.push(self.describe());
        self.lifecycle.notify_task_done();
        Ok(())
    }

    async fn kill(&self, _session: Arc<dyn CallSession>) {
        if self.lifecycle.begin_kill() {
            self.log.push(format!("kill:{}", self.name));
        }
        self.lifecycle.notify_task_done();
    }
}

#[derive(Default)]
pub(crate) struct FakeSteps {
    log: EffectLog,
    pub(crate) say_delay: Mutex<Duration>,
    /// Run time of hangup and refer steps
    pub(crate) control_delay: Mutex<Duration>,
    pub(crate) failing: Mutex<Vec<TaskName>>,
    pub(crate) made: Mutex<Vec<(TaskName, Value)>>,
    gathers: Mutex<Vec<Arc<FakeStep>>>,
}

impl FakeSteps {
    pub(crate) fn made_names(&self) -> Vec<TaskName> {
        self.made.lock().unwrap().iter().map(|(n, _)| *n).collect()
    }

    pub(crate) fn gather_count(&self) -> usize {
        self.gathers.lock().unwrap().len()
    }

    fn newest_gather(&self) -> Arc<FakeStep> {
        self.gathers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no listening step armed")
    }

    /// Finish the newest listening step with `event`, as a gather would
    pub(crate) fn listening_reports(&self, event: StepEvent) {
        let gather = self.newest_gather();
        gather.lifecycle.notify_task_done();
        gather.owner.clone().expect("listening step has no owner").emit(event);
    }

    /// Publish `event` while the newest listening step keeps running
    pub(crate) fn listening_emits(&self, event: StepEvent) {
        let gather = self.newest_gather();
        gather.owner.clone().expect("listening step has no owner").emit(event);
    }
}

impl StepFactory for FakeSteps {
    fn make_step(
        &self,
        name: TaskName,
        config: Value,
        owner: Option<TaskEmitter<StepEvent>>,
    ) -> Result<Arc<dyn Task>, TaskError> {
        self.made.lock().unwrap().push((name, config.clone()));
        let delay = match name {
            TaskName::Say => *self.say_delay.lock().unwrap(),
            TaskName::Hangup | TaskName::SipRefer => *self.control_delay.lock().unwrap(),
            _ => Duration::ZERO,
        };
        let step = Arc::new(FakeStep {
            name,
            config,
            owner,
            lifecycle: TaskLifecycle::new(name, None),
            log: self.log.clone(),
            delay,
            fail: self.failing.lock().unwrap().contains(&name),
        });
        if name == TaskName::Gather {
            self.gathers.lock().unwrap().push(step.clone());
        }
        Ok(step)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub(crate) struct Harness {
    pub(crate) log: EffectLog,
    pub(crate) session: Arc<FakeSession>,
    pub(crate) endpoint: Arc<FakeEndpoint>,
    pub(crate) channel: Arc<FakeChannel>,
    pub(crate) steps: Arc<FakeSteps>,
    pub(crate) builder: Arc<TaskBuilder>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let log = EffectLog::default();
        let hooks = Arc::new(FakeHooks {
            log: log.clone(),
            actions: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            redirect: AtomicBool::new(false),
        });
        let session = Arc::new(FakeSession {
            hooks,
            replacing: AtomicBool::new(false),
        });
        let endpoint = Arc::new(FakeEndpoint {
            log: log.clone(),
            connected: AtomicBool::new(true),
            fail_api: AtomicBool::new(false),
        });
        let channel = Arc::new(FakeChannel {
            log: log.clone(),
            listeners: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            options: Mutex::new(None),
        });
        let steps = Arc::new(FakeSteps {
            log: log.clone(),
            ..Default::default()
        });
        let registry = Arc::new(InstructionRegistry::builtin().unwrap());
        let builder = Arc::new(TaskBuilder::new(
            registry,
            steps.clone(),
            Arc::new(FakeConnector {
                channel: channel.clone(),
            }),
            BotSettings::default(),
        ));

        Self {
            log,
            session,
            endpoint,
            channel,
            steps,
            builder,
        }
    }

    pub(crate) fn bot_task(&self, data: Value) -> Arc<BotTask> {
        let mut instruction = json!({
            "url": "wss://bot.example.com",
            "token": "secret",
            "actionHook": "/action"
        });
        if let (Value::Object(fields), Value::Object(extra)) = (&mut instruction, data) {
            fields.extend(extra);
        }
        Arc::new(BotTask::new(&instruction, self.builder.clone()).unwrap())
    }

    pub(crate) fn dyn_session(&self) -> Arc<dyn CallSession> {
        self.session.clone()
    }

    /// Run the task in the background and wait for the welcome message
    pub(crate) async fn start(&self, task: &Arc<BotTask>) -> JoinHandle<Result<(), TaskError>> {
        let running = {
            let task = task.clone();
            let session = self.dyn_session();
            let endpoint: Arc<dyn Endpoint> = self.endpoint.clone();
            tokio::spawn(async move { task.exec(session, Some(endpoint)).await })
        };
        let channel = self.channel.clone();
        wait_until("welcome message", || !channel.sent.lock().unwrap().is_empty()).await;
        running
    }

    pub(crate) async fn kill(&self, task: &Arc<BotTask>) {
        task.kill(self.dyn_session()).await;
    }
}

pub(crate) async fn finished(running: JoinHandle<Result<(), TaskError>>) -> Result<(), TaskError> {
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("bot task did not finish")
        .expect("bot task panicked")
}
