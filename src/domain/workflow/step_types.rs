//! Workflow step type definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::prompt::PromptVariable;

/// Type of workflow step with its type-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    /// Compile a stored prompt template and call a model
    Prompt(TemplateStep),

    /// Same as `Prompt`, but the template is tagged as an agent task
    AgentTask(TemplateStep),

    /// Compile inline prompt text and call a model
    CustomPrompt(CustomPromptStep),

    /// Invoke a named tool
    ToolCall(ToolCallStep),

    /// Run user code in a sandbox
    Function(FunctionStep),

    /// Reshape prior outputs with queries
    Transform(TransformStep),

    /// Pause for a human decision
    HumanInTheLoop(HumanStep),
}

impl StepKind {
    /// Get the wire name of the step type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "prompt",
            Self::AgentTask(_) => "agent-task",
            Self::CustomPrompt(_) => "custom-prompt",
            Self::ToolCall(_) => "tool-call",
            Self::Function(_) => "function",
            Self::Transform(_) => "transform",
            Self::HumanInTheLoop(_) => "human-in-the-loop",
        }
    }

    /// Model id for steps that call a model
    pub fn model_id(&self) -> Option<&str> {
        match self {
            Self::Prompt(step) | Self::AgentTask(step) => Some(&step.model_id),
            Self::CustomPrompt(step) => Some(&step.model_id),
            _ => None,
        }
    }

    pub fn input_mapping(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Prompt(step) | Self::AgentTask(step) => Some(&step.input_mapping),
            Self::CustomPrompt(step) => Some(&step.input_mapping),
            Self::ToolCall(step) => Some(&step.input_mapping),
            Self::Function(step) => Some(&step.input_mapping),
            Self::Transform(_) | Self::HumanInTheLoop(_) => None,
        }
    }

    pub fn is_transform(&self) -> bool {
        matches!(self, Self::Transform(_))
    }
}

/// Step types recognised on the wire
pub const STEP_TYPES: [&str; 7] = [
    "prompt",
    "agent-task",
    "custom-prompt",
    "tool-call",
    "function",
    "transform",
    "human-in-the-loop",
];

/// JSON Schema constraint on a model step's response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructuredOutput {
    /// Editor representation of the expected fields
    pub schema: Value,
    pub json_schema: Value,
}

impl StructuredOutput {
    pub fn new(json_schema: Value) -> Self {
        Self {
            schema: Value::Object(Default::default()),
            json_schema,
        }
    }
}

/// Configuration shared by `prompt` and `agent-task` steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStep {
    pub model_id: String,

    pub template_id: String,

    /// Template variable name to query or static value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<StructuredOutput>,
}

impl TemplateStep {
    pub fn new(model_id: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            template_id: template_id.into(),
            input_mapping: BTreeMap::new(),
            structured_output: None,
        }
    }

    pub fn with_mapping(mut self, variable: impl Into<String>, query: impl Into<String>) -> Self {
        self.input_mapping.insert(variable.into(), query.into());
        self
    }

    pub fn with_structured_output(mut self, output: StructuredOutput) -> Self {
        self.structured_output = Some(output);
        self
    }
}

/// Inline prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomPromptStep {
    pub model_id: String,

    pub prompt_content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompt_variables: Vec<PromptVariable>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<StructuredOutput>,
}

impl CustomPromptStep {
    pub fn new(model_id: impl Into<String>, prompt_content: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt_content: prompt_content.into(),
            prompt_variables: Vec::new(),
            input_mapping: BTreeMap::new(),
            structured_output: None,
        }
    }

    pub fn with_variable(mut self, variable: PromptVariable) -> Self {
        self.prompt_variables.push(variable);
        self
    }

    pub fn with_mapping(mut self, variable: impl Into<String>, query: impl Into<String>) -> Self {
        self.input_mapping.insert(variable.into(), query.into());
        self
    }

    pub fn with_structured_output(mut self, output: StructuredOutput) -> Self {
        self.structured_output = Some(output);
        self
    }
}

/// Tool invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallStep {
    pub tool_name: String,

    /// Static arguments
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub tool_args: serde_json::Map<String, Value>,

    /// Dynamic arguments, resolved at run time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,
}

impl ToolCallStep {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_args: serde_json::Map::new(),
            input_mapping: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.tool_args.insert(name.into(), value);
        self
    }

    pub fn with_mapping(mut self, arg: impl Into<String>, query: impl Into<String>) -> Self {
        self.input_mapping.insert(arg.into(), query.into());
        self
    }
}

/// Languages a function step may be written in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FunctionLanguage {
    /// In-process expression language
    #[default]
    Jexl,
    Python,
    Javascript,
}

impl FunctionLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jexl => "jexl",
            Self::Python => "python",
            Self::Javascript => "javascript",
        }
    }
}

/// Sandboxed function configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStep {
    #[serde(default)]
    pub function_language: FunctionLanguage,

    pub function_code: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_variables: Vec<PromptVariable>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_mapping: BTreeMap<String, String>,
}

impl FunctionStep {
    pub fn new(language: FunctionLanguage, code: impl Into<String>) -> Self {
        Self {
            function_language: language,
            function_code: code.into(),
            function_variables: Vec::new(),
            input_mapping: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, variable: PromptVariable) -> Self {
        self.function_variables.push(variable);
        self
    }

    pub fn with_mapping(mut self, variable: impl Into<String>, query: impl Into<String>) -> Self {
        self.input_mapping.insert(variable.into(), query.into());
        self
    }
}

/// Data reshaping configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformStep {
    /// Output field to query
    pub transform_mappings: BTreeMap<String, String>,
}

impl TransformStep {
    pub fn new() -> Self {
        Self {
            transform_mappings: BTreeMap::new(),
        }
    }

    pub fn with_mapping(mut self, field: impl Into<String>, query: impl Into<String>) -> Self {
        self.transform_mappings.insert(field.into(), query.into());
        self
    }
}

impl Default for TransformStep {
    fn default() -> Self {
        Self::new()
    }
}

/// Human approval gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HumanStep {
    #[serde(default)]
    pub instructions_for_human: String,
}

impl HumanStep {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions_for_human: instructions.into(),
        }
    }
}
