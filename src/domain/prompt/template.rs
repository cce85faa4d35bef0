//! Prompt template compilation
//!
//! Placeholders use the `{{ name }}` syntax. Declared variables are checked
//! against their type before substitution; undeclared placeholders are only
//! replaced when a value is supplied and are otherwise left in place.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::entity::{PromptTemplate, PromptVariable, VariableType};

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.-]*)\s*\}\}").unwrap());

/// Template compilation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("Missing required variable: {name}")]
    MissingVariable { name: String },

    #[error("Variable '{name}' expects type {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: VariableType,
        actual: String,
    },
}

/// Final prompt text produced by the compiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledPrompt {
    pub content: String,
}

/// Compile a stored template with the given values
pub fn compile_template(
    template: &PromptTemplate,
    values: &HashMap<String, Value>,
) -> Result<CompiledPrompt, TemplateError> {
    compile(template.prompt(), template.variables(), values)
}

/// Compile raw template text against its declared variables
pub fn compile(
    content: &str,
    variables: &[PromptVariable],
    values: &HashMap<String, Value>,
) -> Result<CompiledPrompt, TemplateError> {
    let mut rendered: HashMap<&str, String> = HashMap::with_capacity(variables.len());

    for variable in variables {
        rendered.insert(variable.name.as_str(), resolve_variable(variable, values)?);
    }

    let content = PLACEHOLDER_PATTERN.replace_all(content, |caps: &Captures| {
        let name = &caps[1];

        if let Some(text) = rendered.get(name) {
            return text.clone();
        }

        match values.get(name) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        }
    });

    Ok(CompiledPrompt {
        content: content.into_owned(),
    })
}

/// Names of all placeholders in the template text, in order of first use
pub fn extract_placeholders(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    for caps in PLACEHOLDER_PATTERN.captures_iter(content) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    names
}

fn resolve_variable(
    variable: &PromptVariable,
    values: &HashMap<String, Value>,
) -> Result<String, TemplateError> {
    let provided = values.get(&variable.name).filter(|v| !v.is_null());
    let value = provided.or(variable.default.as_ref().filter(|v| !v.is_null()));

    match value {
        Some(value) => {
            check_type(variable, value)?;
            Ok(stringify(value))
        }
        None if variable.required => Err(TemplateError::MissingVariable {
            name: variable.name.clone(),
        }),
        None => Ok(String::new()),
    }
}

fn check_type(variable: &PromptVariable, value: &Value) -> Result<(), TemplateError> {
    let compatible = match variable.var_type {
        VariableType::String => true,
        VariableType::Number => match value {
            Value::Number(_) => true,
            Value::String(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        },
        VariableType::Boolean => match value {
            Value::Bool(_) => true,
            Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "false"),
            _ => false,
        },
        VariableType::Array => match value {
            Value::Array(_) => true,
            Value::String(s) => matches!(serde_json::from_str::<Value>(s), Ok(Value::Array(_))),
            _ => false,
        },
        VariableType::Object => match value {
            Value::Object(_) => true,
            Value::String(s) => matches!(serde_json::from_str::<Value>(s), Ok(Value::Object(_))),
            _ => false,
        },
    };

    if compatible {
        Ok(())
    } else {
        Err(TemplateError::TypeMismatch {
            name: variable.name.clone(),
            expected: variable.var_type,
            actual: json_type_name(value).to_string(),
        })
    }
}

/// Render a JSON value as prompt text
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
