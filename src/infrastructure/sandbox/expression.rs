//! In-process JEXL sandbox

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::sandbox::{FunctionSandbox, SandboxError};
use crate::domain::workflow::FunctionLanguage;

/// Evaluates JEXL expressions against the function scope
///
/// The expression sees the scope's top-level keys as variables
/// (`outputs[1].summary|upper`, `initial_step|length`). A leading `return`
/// and trailing `;` are accepted so JavaScript-flavoured one-liners work.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionSandbox;

impl ExpressionSandbox {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate synchronously; the evaluator holds non-`Send` transforms
    pub fn evaluate(&self, code: &str, scope: &Value) -> Result<Value, SandboxError> {
        if !scope.is_object() {
            return Err(SandboxError::raised("Function scope must be a JSON object"));
        }

        let expression = normalize(code);
        if expression.is_empty() {
            return Err(SandboxError::raised("Function code is empty"));
        }

        evaluator()
            .eval_in_context(expression, scope)
            .map_err(|e| SandboxError::raised(e.to_string()))
    }
}

#[async_trait]
impl FunctionSandbox for ExpressionSandbox {
    async fn execute(
        &self,
        language: FunctionLanguage,
        code: &str,
        scope: Value,
    ) -> Result<Value, SandboxError> {
        if language != FunctionLanguage::Jexl {
            return Err(SandboxError::unsupported(language.as_str()));
        }

        self.evaluate(code, &scope)
    }
}

fn normalize(code: &str) -> &str {
    let code = code.trim();
    let code = code.strip_prefix("return ").unwrap_or(code);
    code.trim().trim_end_matches(';').trim()
}

fn first_str(args: &[Value]) -> &str {
    args.first().and_then(Value::as_str).unwrap_or("")
}

fn evaluator() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| Ok(json!(first_str(args).to_lowercase())))
        .with_transform("upper", |args: &[Value]| Ok(json!(first_str(args).to_uppercase())))
        .with_transform("trim", |args: &[Value]| Ok(json!(first_str(args).trim())))
        .with_transform("split", |args: &[Value]| {
            let delimiter = args.get(1).and_then(Value::as_str).unwrap_or(",");
            let parts: Vec<&str> = first_str(args).split(delimiter).collect();
            Ok(json!(parts))
        })
        .with_transform("join", |args: &[Value]| {
            let separator = args.get(1).and_then(Value::as_str).unwrap_or(",");
            let items: Vec<String> = args
                .first()
                .and_then(Value::as_array)
                .map(|items| items.iter().map(crate::domain::prompt::stringify).collect())
                .unwrap_or_default();
            Ok(json!(items.join(separator)))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
        .with_transform("keys", |args: &[Value]| {
            let keys: Vec<&String> = args
                .first()
                .and_then(Value::as_object)
                .map(|object| object.keys().collect())
                .unwrap_or_default();
            Ok(json!(keys))
        })
        .with_transform("parseJson", |args: &[Value]| {
            Ok(serde_json::from_str(first_str(args)).unwrap_or(Value::Null))
        })
}
