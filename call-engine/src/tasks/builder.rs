//! TaskBuilder - validated construction of tasks from application instructions
//!
//! Accepts either envelope form:
//!
//! ```text
//! {"say": {"text": "hello"}}          single key naming the task
//! {"verb": "say", "text": "hello"}    verb field plus inline data
//! ```
//!
//! Every instruction is validated against the registry before a task object
//! exists, so a malformed script never begins executing.

use call_types::TaskName;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::bot::{BotSettings, BotTask};
use super::{StepEvent, StepFactory, Task, TaskEmitter, TaskError};
use crate::channel::ConversationConnector;
use crate::registry::InstructionRegistry;

pub struct TaskBuilder {
    registry: Arc<InstructionRegistry>,
    steps: Arc<dyn StepFactory>,
    connector: Arc<dyn ConversationConnector>,
    bot_settings: BotSettings,
}

impl TaskBuilder {
    pub fn new(
        registry: Arc<InstructionRegistry>,
        steps: Arc<dyn StepFactory>,
        connector: Arc<dyn ConversationConnector>,
        bot_settings: BotSettings,
    ) -> Self {
        Self {
            registry,
            steps,
            connector,
            bot_settings,
        }
    }

    pub fn registry(&self) -> &InstructionRegistry {
        &self.registry
    }

    pub fn bot_settings(&self) -> &BotSettings {
        &self.bot_settings
    }

    pub fn connector(&self) -> Arc<dyn ConversationConnector> {
        self.connector.clone()
    }

    /// Validate and construct the task for one instruction
    pub fn make_task(self: &Arc<Self>, instruction: &Value) -> Result<Arc<dyn Task>, TaskError> {
        let (name, data) = self.check(instruction)?;
        self.construct(name, data)
    }

    /// Parse and validate an instruction without constructing anything
    fn check(&self, instruction: &Value) -> Result<(TaskName, Value), TaskError> {
        let (name, data) = parse_instruction(instruction)?;
        self.registry.validate(&name, &data)?;
        let task_name = TaskName::parse(&name).ok_or(TaskError::NotATask(name))?;
        Ok((task_name, data))
    }

    fn construct(self: &Arc<Self>, name: TaskName, data: Value) -> Result<Arc<dyn Task>, TaskError> {
        match name {
            TaskName::Cognigy => Ok(Arc::new(BotTask::new(&data, self.clone())?)),
            other => self.steps.make_step(other, data, None),
        }
    }

    /// Validate and construct a step on behalf of an owning task
    pub fn make_step(
        &self,
        name: TaskName,
        config: Value,
        owner: Option<TaskEmitter<StepEvent>>,
    ) -> Result<Arc<dyn Task>, TaskError> {
        self.registry.validate(name.as_str(), &config)?;
        self.steps.make_step(name, config, owner)
    }

    /// Build every instruction. The first invalid instruction fails the whole
    /// application before any task is constructed.
    pub fn build_application(
        self: &Arc<Self>,
        instructions: &[Value],
    ) -> Result<Vec<Arc<dyn Task>>, TaskError> {
        let checked = instructions
            .iter()
            .map(|instruction| self.check(instruction))
            .collect::<Result<Vec<_>, _>>()?;
        let tasks = checked
            .into_iter()
            .map(|(name, data)| self.construct(name, data))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(count = tasks.len(), "built call application");
        Ok(tasks)
    }
}

/// Split an instruction envelope into `(name, data)`
pub fn parse_instruction(instruction: &Value) -> Result<(String, Value), TaskError> {
    let malformed = || TaskError::MalformedInstruction(instruction.to_string());
    let fields = instruction.as_object().ok_or_else(malformed)?;

    if let Some(verb) = fields.get("verb") {
        let name = verb.as_str().ok_or_else(malformed)?;
        let data: Map<String, Value> = fields
            .iter()
            .filter(|(key, _)| key.as_str() != "verb")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        return Ok((name.to_string(), Value::Object(data)));
    }

    let mut entries = fields.iter();
    match (entries.next(), entries.next()) {
        (Some((name, data)), None) => Ok((name.clone(), data.clone())),
        _ => Err(malformed()),
    }
}
