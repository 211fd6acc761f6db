//! InstructionRegistry - capability specs for every call-control instruction
//!
//! The registry is built once at startup from a JSON document (the built-in
//! `config/specs.json`, or a file named by `CALL_ENGINE_SPECS_PATH`) and is
//! passed by reference wherever instructions are validated.
//!
//! Rule grammar for each property:
//!
//! ```text
//! "number" | "string" | "boolean" | "object"   primitive type
//! "array"                                      any JSON array
//! "#name"                                      nested instruction
//! ["#name"]                                    array of nested instructions
//! {"type": "string", "enum": [...]}            typed descriptor, optional enum
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_SPECS_JSON: &str = include_str!("../config/specs.json");

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Number,
    String,
    Boolean,
    Object,
}

impl PrimitiveType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "number" => Some(Self::Number),
            "string" => Some(Self::String),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }
}

/// Validation rule for a single property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyRule {
    Primitive(PrimitiveType),
    Array,
    Typed {
        ty: PrimitiveType,
        allowed: Option<Vec<Value>>,
    },
    Reference(String),
    ArrayOf(String),
}

/// Registry entry for one instruction
#[derive(Debug, Clone, Default)]
pub struct InstructionSpec {
    pub properties: HashMap<String, PropertyRule>,
    pub required: Vec<String>,
}

/// Error loading the registry document
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read specs file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse specs document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("specs document must be a JSON object keyed by instruction name")]
    NotAnObject,

    #[error("{instruction}: invalid spec entry: {reason}")]
    InvalidEntry { instruction: String, reason: String },

    #[error("{instruction}: invalid rule for property {property}: {rule}")]
    InvalidRule {
        instruction: String,
        property: String,
        rule: String,
    },

    #[error("{instruction}: property {property} references unknown spec #{target}")]
    UnresolvedReference {
        instruction: String,
        property: String,
        target: String,
    },
}

/// First violation found while validating an instruction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid instruction: {0}")]
    UnknownInstruction(String),

    #[error("{instruction}: data must be an object")]
    NotAnObject { instruction: String },

    #[error("{instruction}: unknown property {property}")]
    UnknownProperty {
        instruction: String,
        property: String,
    },

    #[error("{instruction}: property {property} has invalid data type, expected {expected}")]
    InvalidType {
        instruction: String,
        property: String,
        expected: &'static str,
    },

    #[error("{instruction}: property {property} is not an array")]
    NotAnArray {
        instruction: String,
        property: String,
    },

    #[error("{instruction}: invalid value {value} for {property}, must be one of {allowed}")]
    InvalidEnumValue {
        instruction: String,
        property: String,
        value: String,
        allowed: String,
    },

    #[error("{instruction}: missing value for {}", .missing.join(","))]
    MissingRequired {
        instruction: String,
        missing: Vec<String>,
    },
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct InstructionRegistry {
    specs: HashMap<String, InstructionSpec>,
}

impl InstructionRegistry {
    /// Registry compiled into the binary
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json_str(BUILTIN_SPECS_JSON)
    }

    /// Load from `path` when given, otherwise fall back to the built-in specs
    pub fn load(path: Option<&Path>) -> Result<Self, RegistryError> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                let registry = Self::from_json_str(&content)?;
                tracing::info!(
                    path = %path.display(),
                    instructions = registry.specs.len(),
                    "Loaded instruction specs from file"
                );
                Ok(registry)
            }
            None => Self::builtin(),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, RegistryError> {
        let doc: Value = serde_json::from_str(content)?;
        Self::from_value(&doc)
    }

    pub fn from_value(doc: &Value) -> Result<Self, RegistryError> {
        let entries = doc.as_object().ok_or(RegistryError::NotAnObject)?;
        let mut specs = HashMap::with_capacity(entries.len());
        for (name, entry) in entries {
            specs.insert(name.clone(), parse_entry(name, entry)?);
        }

        let registry = Self { specs };
        registry.check_references()?;
        Ok(registry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&InstructionSpec> {
        self.specs.get(name)
    }

    /// Validate `data` against the spec registered under `name`.
    ///
    /// Fails fast: the first violation is returned and nothing else is
    /// inspected. Required keys are checked after every present key passed.
    pub fn validate(&self, name: &str, data: &Value) -> Result<(), ValidationError> {
        tracing::trace!(instruction = name, data = %data, "validating instruction");

        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| ValidationError::UnknownInstruction(name.to_string()))?;
        let fields = data
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject {
                instruction: name.to_string(),
            })?;

        let mut missing: Vec<&str> = spec.required.iter().map(String::as_str).collect();
        for (key, value) in fields {
            let rule = spec
                .properties
                .get(key)
                .ok_or_else(|| ValidationError::UnknownProperty {
                    instruction: name.to_string(),
                    property: key.clone(),
                })?;

            match rule {
                PropertyRule::Primitive(ty) => check_type(name, key, *ty, value)?,
                PropertyRule::Array => {
                    if !value.is_array() {
                        return Err(not_an_array(name, key));
                    }
                }
                PropertyRule::Typed { ty, allowed } => match allowed {
                    Some(allowed) => {
                        if !allowed.contains(value) {
                            return Err(ValidationError::InvalidEnumValue {
                                instruction: name.to_string(),
                                property: key.clone(),
                                value: value.to_string(),
                                allowed: allowed
                                    .iter()
                                    .map(Value::to_string)
                                    .collect::<Vec<_>>()
                                    .join(","),
                            });
                        }
                    }
                    None => check_type(name, key, *ty, value)?,
                },
                PropertyRule::Reference(target) => self.validate(target, value)?,
                PropertyRule::ArrayOf(target) => {
                    let items = value.as_array().ok_or_else(|| not_an_array(name, key))?;
                    for item in items {
                        self.validate(target, item)?;
                    }
                }
            }

            missing.retain(|required| *required != key);
        }

        if !missing.is_empty() {
            return Err(ValidationError::MissingRequired {
                instruction: name.to_string(),
                missing: missing.into_iter().map(ToString::to_string).collect(),
            });
        }
        Ok(())
    }

    fn check_references(&self) -> Result<(), RegistryError> {
        for (name, spec) in &self.specs {
            for (property, rule) in &spec.properties {
                let target = match rule {
                    PropertyRule::Reference(target) | PropertyRule::ArrayOf(target) => target,
                    _ => continue,
                };
                if !self.specs.contains_key(target) {
                    return Err(RegistryError::UnresolvedReference {
                        instruction: name.clone(),
                        property: property.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_type(
    instruction: &str,
    property: &str,
    ty: PrimitiveType,
    value: &Value,
) -> Result<(), ValidationError> {
    if ty.matches(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidType {
            instruction: instruction.to_string(),
            property: property.to_string(),
            expected: ty.as_str(),
        })
    }
}

fn not_an_array(instruction: &str, property: &str) -> ValidationError {
    ValidationError::NotAnArray {
        instruction: instruction.to_string(),
        property: property.to_string(),
    }
}

// ============================================================================
// Document Parsing
// ============================================================================

fn parse_entry(name: &str, entry: &Value) -> Result<InstructionSpec, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidEntry {
        instruction: name.to_string(),
        reason: reason.to_string(),
    };

    let entry = entry.as_object().ok_or_else(|| invalid("entry is not an object"))?;

    let mut properties = HashMap::new();
    if let Some(raw) = entry.get("properties") {
        let raw = raw
            .as_object()
            .ok_or_else(|| invalid("properties is not an object"))?;
        for (property, rule) in raw {
            properties.insert(property.clone(), parse_rule(name, property, rule)?);
        }
    }

    let mut required = Vec::new();
    if let Some(raw) = entry.get("required") {
        let raw = raw
            .as_array()
            .ok_or_else(|| invalid("required is not an array"))?;
        for key in raw {
            let key = key
                .as_str()
                .ok_or_else(|| invalid("required keys must be strings"))?;
            if !properties.contains_key(key) {
                return Err(invalid(&format!("required key {key} has no property rule")));
            }
            required.push(key.to_string());
        }
    }

    Ok(InstructionSpec {
        properties,
        required,
    })
}

fn parse_rule(instruction: &str, property: &str, raw: &Value) -> Result<PropertyRule, RegistryError> {
    let invalid = || RegistryError::InvalidRule {
        instruction: instruction.to_string(),
        property: property.to_string(),
        rule: raw.to_string(),
    };

    match raw {
        Value::String(rule) => {
            if rule == "array" {
                return Ok(PropertyRule::Array);
            }
            if let Some(target) = rule.strip_prefix('#') {
                return Ok(PropertyRule::Reference(target.to_string()));
            }
            PrimitiveType::parse(rule)
                .map(PropertyRule::Primitive)
                .ok_or_else(invalid)
        }
        Value::Array(items) => match items.as_slice() {
            [Value::String(rule)] => rule
                .strip_prefix('#')
                .map(|target| PropertyRule::ArrayOf(target.to_string()))
                .ok_or_else(invalid),
            _ => Err(invalid()),
        },
        Value::Object(descriptor) => {
            let ty = descriptor
                .get("type")
                .and_then(Value::as_str)
                .and_then(PrimitiveType::parse)
                .ok_or_else(invalid)?;
            let allowed = match descriptor.get("enum") {
                None => None,
                Some(Value::Array(values)) => Some(values.clone()),
                Some(_) => return Err(invalid()),
            };
            Ok(PropertyRule::Typed { ty, allowed })
        }
        _ => Err(invalid()),
    }
}

// ============================================================================
// Tests
// ============================================================================
