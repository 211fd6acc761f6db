use std::path::PathBuf;

use anyhow::Context;
use call_engine::tasks::builder::parse_instruction;
use call_engine::EngineConfig;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE: &str = "usage: call-engine validate <application.json>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "call_engine=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(command), Some(file)) = (args.next(), args.next()) else {
        anyhow::bail!(USAGE);
    };
    if command != "validate" {
        anyhow::bail!("unknown command {command}; {USAGE}");
    }

    let config = EngineConfig::from_env()?;
    let registry = config.load_registry()?;
    validate_application(&registry, &PathBuf::from(file))
}

fn validate_application(
    registry: &call_engine::InstructionRegistry,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let document: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let instructions = match document {
        Value::Array(instructions) => instructions,
        single @ Value::Object(_) => vec![single],
        _ => anyhow::bail!("{} must hold an instruction or a list of instructions", path.display()),
    };

    for (index, instruction) in instructions.iter().enumerate() {
        let (name, data) = parse_instruction(instruction)
            .with_context(|| format!("instruction {index} is malformed"))?;
        registry
            .validate(&name, &data)
            .with_context(|| format!("instruction {index} ({name}) is invalid"))?;
    }

    info!(path = %path.display(), count = instructions.len(), "application is valid");
    Ok(())
}
