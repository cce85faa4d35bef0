//! Prompt template and agent task entities

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identifier::validate_identifier;
use crate::domain::storage::{StorageEntity, StorageKey};
use crate::domain::DomainError;

/// Prompt template identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PromptId(String);

impl PromptId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        validate_identifier("Prompt", &id).map_err(DomainError::invalid_id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PromptId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PromptId> for String {
    fn from(id: PromptId) -> Self {
        id.0
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StorageKey for PromptId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether a template is a plain prompt or is tagged for agentic use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    #[default]
    Prompt,
    AgentTask,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::AgentTask => "agent-task",
        }
    }
}

/// Declared type of a template variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        write!(f, "{}", name)
    }
}

/// A typed variable slot in a prompt template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVariable {
    pub name: String,

    #[serde(rename = "type", default)]
    pub var_type: VariableType,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Guidance shown next to the input field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl PromptVariable {
    pub fn required(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            var_type,
            required: true,
            description: None,
            instructions: None,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            required: false,
            ..Self::required(name, var_type)
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A stored prompt template (or agent task)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    id: PromptId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    kind: PromptKind,
    prompt: String,
    #[serde(default)]
    variables: Vec<PromptVariable>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PromptTemplate {
    pub fn new(id: PromptId, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: String::new(),
            kind: PromptKind::Prompt,
            prompt: prompt.into(),
            variables: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_kind(mut self, kind: PromptKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_variable(mut self, variable: PromptVariable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_variables(mut self, variables: Vec<PromptVariable>) -> Self {
        self.variables = variables;
        self
    }

    pub fn id(&self) -> &PromptId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> PromptKind {
        self.kind
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn variables(&self) -> &[PromptVariable] {
        &self.variables
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
        self.touch();
    }

    pub fn set_variables(&mut self, variables: Vec<PromptVariable>) {
        self.variables = variables;
        self.touch();
    }

    pub fn set_kind(&mut self, kind: PromptKind) {
        self.kind = kind;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl StorageEntity for PromptTemplate {
    type Key = PromptId;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_id_validation() {
        assert!(PromptId::new("summarize_v2").is_ok());
        assert!(PromptId::new("").is_err());
        assert!(PromptId::new("has space").is_err());
    }

    #[test]
    fn test_template_serializes_camel_case() {
        let template = PromptTemplate::new(PromptId::new("t1").unwrap(), "T", "Hi {{ name }}")
            .with_kind(PromptKind::AgentTask)
            .with_variable(PromptVariable::required("name", VariableType::String));

        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["kind"], "agent-task");
        assert_eq!(value["variables"][0]["type"], "string");
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_variable_defaults_when_fields_absent() {
        let variable: PromptVariable = serde_json::from_value(json!({"name": "topic"})).unwrap();
        assert_eq!(variable.var_type, VariableType::String);
        assert!(!variable.required);
        assert!(variable.default.is_none());
    }
}
