//! Per-call speech settings of a bot conversation.
//!
//! Seeded from the instruction's `data` and shallow-merged with any
//! `synthesizer` / `recognizer` / `bargein` / `dtmf` / `user` objects the bot
//! sends back, so later steps pick up voice or timeout changes mid-call.

use call_types::RetryPolicy;
use serde_json::{json, Map, Value};

const SECTIONS: [&str; 6] = ["synthesizer", "recognizer", "bargein", "bot", "user", "dtmf"];

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechConfig {
    synthesizer: Map<String, Value>,
    recognizer: Map<String, Value>,
    bargein: Map<String, Value>,
    bot: Map<String, Value>,
    user: Map<String, Value>,
    dtmf: Map<String, Value>,
}

/// Gather step config plus the retry policy that governs its timeouts
#[derive(Debug, Clone, PartialEq)]
pub struct GatherConfig {
    pub gather: Value,
    pub retry: RetryPolicy,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            synthesizer: object(json!({
                "vendor": "default",
                "language": "default",
                "voice": "default"
            })),
            recognizer: object(json!({
                "vendor": "default",
                "language": "default"
            })),
            bargein: Map::new(),
            bot: Map::new(),
            user: Map::new(),
            dtmf: Map::new(),
        }
    }
}

impl SpeechConfig {
    /// Session settings from instruction data; missing sections use defaults
    pub fn from_data(data: &Map<String, Value>) -> Self {
        let mut config = Self::default();
        for name in SECTIONS {
            if let Some(Value::Object(section)) = data.get(name) {
                *config.section_mut(name) = section.clone();
            }
        }
        config
    }

    /// Shallow-merge the sections carried by a bot reply's `data`
    pub fn update(&mut self, data: &Value) {
        for name in SECTIONS {
            if let Some(Value::Object(changes)) = data.get(name) {
                let section = self.section_mut(name);
                for (key, value) in changes {
                    section.insert(key.clone(), value.clone());
                }
                tracing::debug!(section = name, "speech config updated from bot reply");
            }
        }
    }

    pub fn synthesizer(&self) -> Value {
        Value::Object(self.synthesizer.clone())
    }

    pub fn recognizer(&self) -> Value {
        Value::Object(self.recognizer.clone())
    }

    pub fn make_say_config(&self, text: &str) -> Value {
        json!({
            "text": text,
            "synthesizer": self.synthesizer()
        })
    }

    /// Build a gather step listening for the caller's next input.
    ///
    /// A non-empty `text_prompt` is spoken first, otherwise `url_prompt` is
    /// played when present; with neither the gather listens silently.
    pub fn make_gather_config(&self, text_prompt: Option<&str>, url_prompt: Option<&str>) -> GatherConfig {
        let dtmf_enabled = flag(&self.dtmf, "enable");
        let mut input = vec![json!("speech")];
        if dtmf_enabled {
            input.push(json!("digits"));
        }

        let mut gather = Map::new();
        gather.insert("input".to_string(), Value::Array(input));
        gather.insert("recognizer".to_string(), self.recognizer());

        if let Some(timeout) = self.user.get("noInputTimeout").filter(|v| v.is_number()) {
            gather.insert("timeout".to_string(), timeout.clone());
        }

        if flag(&self.bargein, "enable") {
            gather.insert("bargein".to_string(), Value::Bool(true));
            if let Some(count) = self.bargein.get("minBargeinWordCount").filter(|v| v.is_number()) {
                gather.insert("minBargeinWordCount".to_string(), count.clone());
            }
        }

        if dtmf_enabled {
            gather.insert("dtmfBargein".to_string(), Value::Bool(true));
            for key in ["numDigits", "minDigits", "maxDigits", "interDigitTimeout", "finishOnKey"] {
                if let Some(value) = self.dtmf.get(key) {
                    gather.insert(key.to_string(), value.clone());
                }
            }
        }

        match (
            text_prompt.filter(|t| !t.is_empty()),
            url_prompt.filter(|u| !u.is_empty()),
        ) {
            (Some(text), _) => {
                gather.insert("say".to_string(), self.make_say_config(text));
            }
            (None, Some(url)) => {
                gather.insert("play".to_string(), json!({ "url": url }));
            }
            (None, None) => {}
        }

        GatherConfig {
            gather: Value::Object(gather),
            retry: self.retry_policy(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            no_input_retries: self
                .user
                .get("noInputRetries")
                .and_then(Value::as_u64)
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(0),
            no_input_speech: self
                .user
                .get("noInputSpeech")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            no_input_url: self
                .user
                .get("noInputUrl")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        }
    }

    fn section_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        match name {
            "synthesizer" => &mut self.synthesizer,
            "recognizer" => &mut self.recognizer,
            "bargein" => &mut self.bargein,
            "bot" => &mut self.bot,
            "user" => &mut self.user,
            _ => &mut self.dtmf,
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn flag(section: &Map<String, Value>, key: &str) -> bool {
    section.get(key).and_then(Value::as_bool).unwrap_or(false)
}
