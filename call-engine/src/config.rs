//! Engine configuration loaded from the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::registry::InstructionRegistry;
use crate::tasks::bot::BotSettings;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// JSON document overriding the built-in instruction specs
    pub specs_path: Option<PathBuf>,
    /// Timeout applied to every action/event webhook request
    pub hook_timeout: Duration,
    /// Base URL that relative hook paths (e.g. `/events`) resolve against
    pub hook_base_url: Option<String>,
    /// Channel name announced to the bot engine on connect
    pub bot_channel: String,
    /// First message sent to the bot once the channel is up
    pub welcome_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            specs_path: None,
            hook_timeout: Duration::from_millis(10_000),
            hook_base_url: None,
            bot_channel: "jambonz".to_string(),
            welcome_message: "Welcome Message".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            specs_path: env_opt("CALL_ENGINE_SPECS_PATH").map(PathBuf::from),
            hook_timeout: Duration::from_millis(env_parse(
                "CALL_ENGINE_HOOK_TIMEOUT_MS",
                defaults.hook_timeout.as_millis() as u64,
            )?),
            hook_base_url: env_opt("CALL_ENGINE_HOOK_BASE_URL"),
            bot_channel: env_str("CALL_ENGINE_BOT_CHANNEL", &defaults.bot_channel),
            welcome_message: env_str("CALL_ENGINE_WELCOME_MESSAGE", &defaults.welcome_message),
        })
    }

    pub fn load_registry(&self) -> anyhow::Result<InstructionRegistry> {
        InstructionRegistry::load(self.specs_path.as_deref()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to load instruction specs from {}: {e}",
                self.specs_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "builtin".to_string())
            )
        })
    }

    pub fn bot_settings(&self) -> BotSettings {
        BotSettings {
            channel: self.bot_channel.clone(),
            welcome_message: self.welcome_message.clone(),
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.hook_timeout, Duration::from_secs(10));
        assert_eq!(config.bot_channel, "jambonz");
        assert_eq!(config.welcome_message, "Welcome Message");
        assert!(config.specs_path.is_none());
    }

    #[test]
    fn test_env_parse_reports_bad_value() {
        std::env::set_var("CALL_ENGINE_TEST_BAD_TIMEOUT", "soon");
        let err = env_parse::<u64>("CALL_ENGINE_TEST_BAD_TIMEOUT", 5).unwrap_err();
        assert!(err.to_string().contains("CALL_ENGINE_TEST_BAD_TIMEOUT=soon"));
        std::env::remove_var("CALL_ENGINE_TEST_BAD_TIMEOUT");

        assert_eq!(env_parse::<u64>("CALL_ENGINE_TEST_UNSET_TIMEOUT", 5).unwrap(), 5);
    }

    #[test]
    fn test_default_config_loads_builtin_registry() {
        let registry = EngineConfig::default().load_registry().unwrap();
        assert!(registry.contains("cognigy"));
    }
}
