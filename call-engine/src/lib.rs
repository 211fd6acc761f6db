//! Call Engine - call-control task execution
//!
//! This crate validates call-application instructions, runs them as tasks
//! sharing one lifecycle contract, and bridges calls to a conversational
//! bot through a per-call orchestrator actor.

pub mod call;
pub mod channel;
pub mod config;
pub mod hooks;
pub mod registry;
pub mod tasks;

pub use config::EngineConfig;
pub use registry::{InstructionRegistry, ValidationError};
pub use tasks::{Task, TaskBuilder, TaskError};
