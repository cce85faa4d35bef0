//! Query resolver over the execution context
//!
//! A query is either a `$.`-rooted path (`$.outputs[2].field`,
//! `$.initial_step.topic`, `$.workflow.name`) or a literal: a double-quoted
//! JSON string, a number, `true` or `false`. Literals never read the context.

use std::borrow::Cow;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::context::ExecutionContext;
use super::error::WorkflowError;
use crate::domain::prompt::json_type_name;

/// Query errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    Resolution(String),
}

impl From<QueryError> for WorkflowError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Syntax(message) => WorkflowError::query_syntax(message),
            QueryError::Resolution(message) => WorkflowError::query_resolution(message),
        }
    }
}

/// Non-throwing query result for per-field feedback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<Value, QueryError>> for QueryResult {
    fn from(result: Result<Value, QueryError>) -> Self {
        match result {
            Ok(value) => Self {
                is_valid: true,
                value: Some(value),
                error: None,
            },
            Err(err) => Self {
                is_valid: false,
                value: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Resolve a query against a run's context
pub fn resolve(query: &str, context: &ExecutionContext) -> QueryResult {
    resolve_query(query, context).into()
}

/// Typed variant of [`resolve`]
pub fn resolve_query(query: &str, context: &ExecutionContext) -> Result<Value, QueryError> {
    if let Some(literal) = parse_literal(query)? {
        return Ok(literal);
    }

    resolve_in(query, &context.to_json())
}

/// Resolve a query against an arbitrary JSON root
pub fn resolve_in(query: &str, root: &Value) -> Result<Value, QueryError> {
    if let Some(literal) = parse_literal(query)? {
        return Ok(literal);
    }

    let segments = parse_path(query.trim())?;
    let mut current: Cow<'_, Value> = Cow::Borrowed(root);
    let mut walked = String::from("$");

    for segment in &segments {
        let embedded = match current.as_ref() {
            Value::String(text) => parse_embedded_json(text),
            _ => None,
        };
        if let Some(parsed) = embedded {
            current = Cow::Owned(parsed);
        }

        current = match current {
            Cow::Borrowed(value) => Cow::Borrowed(step_into(value, segment, &walked)?),
            Cow::Owned(value) => Cow::Owned(step_into(&value, segment, &walked)?.clone()),
        };

        match segment {
            Segment::Field(name) => {
                walked.push('.');
                walked.push_str(name);
            }
            Segment::Index(index) => walked.push_str(&format!("[{}]", index)),
        }
    }

    Ok(current.into_owned())
}

/// Resolve an input-mapping value: queries are resolved, literals parsed,
/// anything else is used verbatim as static text.
pub fn resolve_binding(raw: &str, root: &Value) -> Result<Value, QueryError> {
    if is_path_query(raw) {
        return resolve_in(raw, root);
    }

    match parse_literal(raw) {
        Ok(Some(literal)) => Ok(literal),
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Whether a string addresses the context rather than being a literal
pub fn is_path_query(raw: &str) -> bool {
    raw.trim_start().starts_with("$.")
}

/// Check a query's syntax without resolving it
pub fn check_syntax(query: &str) -> Result<(), QueryError> {
    if parse_literal(query)?.is_some() {
        return Ok(());
    }
    parse_path(query.trim()).map(|_| ())
}

fn parse_literal(query: &str) -> Result<Option<Value>, QueryError> {
    let trimmed = query.trim();

    if trimmed.starts_with('"') {
        return serde_json::from_str::<String>(trimmed)
            .map(|s| Some(Value::String(s)))
            .map_err(|_| QueryError::Syntax(format!("Malformed string literal: {}", trimmed)));
    }

    match trimmed {
        "true" => return Ok(Some(Value::Bool(true))),
        "false" => return Ok(Some(Value::Bool(false))),
        _ => {}
    }

    let numeric_start = trimmed
        .chars()
        .next()
        .is_some_and(|c| c == '-' || c.is_ascii_digit());
    if numeric_start {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(number @ Value::Number(_)) => Ok(Some(number)),
            _ => Err(QueryError::Syntax(format!(
                "Malformed numeric literal: {}",
                trimmed
            ))),
        };
    }

    Ok(None)
}

fn parse_path(query: &str) -> Result<Vec<Segment>, QueryError> {
    let path = query.strip_prefix("$.").ok_or_else(|| {
        QueryError::Syntax(format!(
            "Query '{}' must start with '$.' or be a quoted string, number, true or false",
            query
        ))
    })?;

    if let Some(bad) = path
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '[' | ']')))
    {
        return Err(QueryError::Syntax(format!(
            "Query '{}' contains disallowed character '{}'",
            query, bad
        )));
    }

    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            return Err(QueryError::Syntax(format!(
                "Query '{}' contains an empty path segment",
                query
            )));
        }

        let (name, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };

        if name.contains(']') || name.contains('$') {
            return Err(QueryError::Syntax(format!(
                "Query '{}' has a malformed segment '{}'",
                query, part
            )));
        }

        if name.is_empty() && segments.is_empty() {
            return Err(QueryError::Syntax(format!(
                "Query '{}' must start with a field name",
                query
            )));
        }

        if !name.is_empty() {
            segments.push(Segment::Field(name.to_string()));
        }

        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(|| {
                QueryError::Syntax(format!("Query '{}' has an unterminated '['", query))
            })?;
            let inner = &rest[1..close];

            if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_digit()) {
                return Err(QueryError::Syntax(format!(
                    "Query '{}' has a non-numeric index '[{}]'",
                    query, inner
                )));
            }

            let index = inner.parse::<usize>().map_err(|_| {
                QueryError::Syntax(format!("Query '{}' has an index out of range", query))
            })?;
            segments.push(Segment::Index(index));

            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(QueryError::Syntax(format!(
                    "Query '{}' has a malformed segment '{}'",
                    query, part
                )));
            }
        }
    }

    Ok(segments)
}

fn step_into<'a>(value: &'a Value, segment: &Segment, walked: &str) -> Result<&'a Value, QueryError> {
    match (segment, value) {
        (Segment::Field(name), Value::Object(map)) => map.get(name).ok_or_else(|| {
            QueryError::Resolution(format!("Field '{}' not found at '{}'", name, walked))
        }),
        (Segment::Index(index), Value::Array(items)) => items.get(*index).ok_or_else(|| {
            QueryError::Resolution(format!(
                "Index {} out of range at '{}' (length {})",
                index,
                walked,
                items.len()
            ))
        }),
        (Segment::Field(name), other) => Err(QueryError::Resolution(format!(
            "Cannot read field '{}' of {} at '{}'",
            name,
            json_type_name(other),
            walked
        ))),
        (Segment::Index(index), other) => Err(QueryError::Resolution(format!(
            "Cannot index [{}] into {} at '{}'",
            index,
            json_type_name(other),
            walked
        ))),
    }
}

/// Model responses often carry JSON as text; descend into it when possible
fn parse_embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::{WorkflowId, WorkflowTemplate};
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ExecutionContext {
        let workflow = WorkflowTemplate::new(WorkflowId::new("wf").unwrap(), "Research");
        let mut ctx = ExecutionContext::new(Arc::new(workflow), json!("rust ownership"));
        ctx.append_output(json!({"x": 5, "items": [{"title": "a"}, {"title": "b"}]}));
        ctx.append_output(json!("{\"score\": 0.9, \"tags\": [\"x\"]}"));
        ctx
    }

    #[test]
    fn test_literal_string_ignores_context() {
        let result = resolve("\"literal\"", &context());
        assert_eq!(
            result,
            QueryResult {
                is_valid: true,
                value: Some(json!("literal")),
                error: None
            }
        );
    }

    #[test]
    fn test_numeric_and_boolean_literals() {
        let ctx = context();
        assert_eq!(resolve_query("42", &ctx).unwrap(), json!(42));
        assert_eq!(resolve_query("-1.5", &ctx).unwrap(), json!(-1.5));
        assert_eq!(resolve_query("true", &ctx).unwrap(), json!(true));
        assert_eq!(resolve_query(" false ", &ctx).unwrap(), json!(false));
    }

    #[test]
    fn test_path_hits() {
        let ctx = context();
        assert_eq!(resolve_query("$.outputs[1].x", &ctx).unwrap(), json!(5));
        assert_eq!(
            resolve_query("$.outputs[1].items[1].title", &ctx).unwrap(),
            json!("b")
        );
        assert_eq!(resolve_query("$.workflow.name", &ctx).unwrap(), json!("Research"));
        assert_eq!(
            resolve_query("$.initial_step", &ctx).unwrap(),
            json!("rust ownership")
        );
        assert_eq!(resolve_query("$.outputs[0]", &ctx).unwrap(), json!("rust ownership"));
    }

    #[test]
    fn test_descends_into_json_text() {
        let ctx = context();
        assert_eq!(resolve_query("$.outputs[2].score", &ctx).unwrap(), json!(0.9));
        assert_eq!(resolve_query("$.outputs[2].tags[0]", &ctx).unwrap(), json!("x"));
    }

    #[test]
    fn test_missing_path_is_error_result() {
        let result = resolve("$.outputs[0].x", &context());
        assert!(!result.is_valid);
        assert!(result.value.is_none());
        assert!(result.error.unwrap().contains("Cannot read field 'x' of string"));

        let out_of_range = resolve_query("$.outputs[9]", &context()).unwrap_err();
        assert!(matches!(out_of_range, QueryError::Resolution(_)));
        assert!(out_of_range.to_string().contains("length 3"));
    }

    #[test]
    fn test_missing_field_names_location() {
        let err = resolve_query("$.outputs[1].missing", &context()).unwrap_err();
        assert_eq!(
            err,
            QueryError::Resolution("Field 'missing' not found at '$.outputs[1]'".to_string())
        );
    }

    #[test]
    fn test_disallowed_characters_are_syntax_errors() {
        for query in [
            "$.outputs[0].x; drop",
            "$.outputs[0]['x']",
            "$.a-b",
            "$.outputs[?(@.x)]",
        ] {
            let err = resolve_query(query, &context()).unwrap_err();
            assert!(matches!(err, QueryError::Syntax(_)), "{}", query);
        }
    }

    #[test]
    fn test_malformed_paths() {
        for query in ["$.", "$..x", "$.outputs[", "$.outputs[a]", "$.outputs[]", "$.[0]", "outputs"] {
            assert!(
                matches!(check_syntax(query), Err(QueryError::Syntax(_))),
                "{}",
                query
            );
        }
        assert!(check_syntax("$.outputs[1][0].a_b").is_ok());
    }

    #[test]
    fn test_binding_static_text_passes_through() {
        let root = context().to_json();
        assert_eq!(resolve_binding("formal", &root).unwrap(), json!("formal"));
        assert_eq!(resolve_binding("3", &root).unwrap(), json!(3));
        assert_eq!(resolve_binding("$.outputs[1].x", &root).unwrap(), json!(5));
    }

    #[test]
    fn test_query_result_serializes_camel_case() {
        let value = serde_json::to_value(resolve("$.nope", &context())).unwrap();
        assert_eq!(value["isValid"], false);
        assert!(value.get("value").is_none());
    }
}
