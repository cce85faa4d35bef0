//! Structural validation of raw workflow JSON
//!
//! Checks run in a fixed order and stop at the first failure, so the error
//! always names the first concrete problem in the document.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

use super::entity::WorkflowTemplate;
use super::error::WorkflowError;
use super::step_types::STEP_TYPES;

const TOP_LEVEL_STRINGS: [&str; 5] = ["id", "name", "description", "createdAt", "updatedAt"];

/// Fields that must be strings whenever they are present on a step
const STEP_STRING_FIELDS: [&str; 8] = [
    "modelId",
    "templateId",
    "instructionsForHuman",
    "prompt",
    "promptContent",
    "toolName",
    "functionCode",
    "functionLanguage",
];

const FUNCTION_LANGUAGES: [&str; 3] = ["jexl", "python", "javascript"];

/// Every type-specific field, in the order foreign fields are reported
const GROUP_FIELDS: [&str; 12] = [
    "modelId",
    "templateId",
    "structuredOutput",
    "promptContent",
    "promptVariables",
    "inputMapping",
    "toolName",
    "toolArgs",
    "functionLanguage",
    "functionCode",
    "functionVariables",
    "transformMappings",
];

/// Result of validating a candidate workflow document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn valid(workflow: WorkflowTemplate) -> Self {
        Self {
            is_valid: true,
            workflow: Some(workflow),
            error: None,
        }
    }

    fn invalid(error: String) -> Self {
        Self {
            is_valid: false,
            workflow: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<WorkflowTemplate, WorkflowError> {
        match (self.workflow, self.error) {
            (Some(workflow), None) => Ok(workflow),
            (_, error) => Err(WorkflowError::validation(
                error.unwrap_or_else(|| "Workflow is invalid".to_string()),
            )),
        }
    }
}

/// Validate a candidate workflow document
pub fn validate(candidate: &Value) -> ValidationOutcome {
    match check(candidate) {
        Ok(workflow) => ValidationOutcome::valid(workflow),
        Err(error) => ValidationOutcome::invalid(error),
    }
}

/// Validate and parse a workflow document
pub fn parse_workflow(candidate: &Value) -> Result<WorkflowTemplate, WorkflowError> {
    validate(candidate).into_result()
}

/// Re-validate an already typed workflow through its JSON form
pub fn revalidate(workflow: &WorkflowTemplate) -> Result<WorkflowTemplate, WorkflowError> {
    let document = serde_json::to_value(workflow)
        .map_err(|e| WorkflowError::validation(format!("Failed to serialize workflow: {}", e)))?;
    parse_workflow(&document)
}

fn check(candidate: &Value) -> Result<WorkflowTemplate, String> {
    let root = candidate
        .as_object()
        .ok_or_else(|| "Workflow must be a JSON object".to_string())?;

    for field in TOP_LEVEL_STRINGS {
        require_string(root, field, "Workflow")?;
    }

    let steps = match root.get("steps") {
        Some(Value::Array(steps)) => steps,
        Some(_) => return Err("Field 'steps' must be an array".to_string()),
        None => return Err("Missing required field 'steps'".to_string()),
    };

    let mut step_objects = Vec::with_capacity(steps.len());
    let mut seen_ids = HashSet::new();

    for (index, step) in steps.iter().enumerate() {
        let step = step
            .as_object()
            .ok_or_else(|| format!("Step {} must be an object", index))?;
        let label = format!("Step {}", index);
        let id = require_string(step, "id", &label)?;
        require_string(step, "name", &label)?;
        let step_type = require_string(step, "type", &label)?;

        if !STEP_TYPES.contains(&step_type) {
            return Err(format!(
                "Step '{}' has unknown type '{}' (expected one of: {})",
                id,
                step_type,
                STEP_TYPES.join(", ")
            ));
        }

        if !seen_ids.insert(id) {
            return Err(format!("Duplicate step id '{}'", id));
        }

        step_objects.push((id, step_type, step));
    }

    for (id, _, step) in &step_objects {
        check_step_shape(id, step)?;
    }

    for (id, step_type, step) in &step_objects {
        check_foreign_fields(id, step_type, step)?;
        check_required_fields(id, step_type, step)?;
    }

    check_trigger(root)?;

    serde_json::from_value(candidate.clone()).map_err(|e| format!("Invalid workflow: {}", e))
}

fn require_string<'a>(
    object: &'a Map<String, Value>,
    field: &str,
    label: &str,
) -> Result<&'a str, String> {
    match object.get(field) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(format!("{} field '{}' must be a string", label, field)),
        None => Err(format!("{} is missing required field '{}'", label, field)),
    }
}

fn check_step_shape(id: &str, step: &Map<String, Value>) -> Result<(), String> {
    for field in STEP_STRING_FIELDS {
        if let Some(value) = step.get(field) {
            if !value.is_string() && !value.is_null() {
                return Err(format!("Step '{}' field '{}' must be a string", id, field));
            }
        }
    }

    if let Some(Value::String(language)) = step.get("functionLanguage") {
        if !FUNCTION_LANGUAGES.contains(&language.as_str()) {
            return Err(format!(
                "Step '{}' field 'functionLanguage' must be one of: {}",
                id,
                FUNCTION_LANGUAGES.join(", ")
            ));
        }
    }

    for field in ["inputMapping", "transformMappings"] {
        match step.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::Object(mapping)) => {
                if let Some((key, _)) = mapping.iter().find(|(_, v)| !v.is_string()) {
                    return Err(format!(
                        "Step '{}' field '{}' entry '{}' must be a string",
                        id, field, key
                    ));
                }
            }
            Some(_) => {
                return Err(format!(
                    "Step '{}' field '{}' must be a mapping of strings",
                    id, field
                ));
            }
        }
    }

    match step.get("structuredOutput") {
        None | Some(Value::Null) => {}
        Some(Value::Object(output)) => {
            for field in ["schema", "jsonSchema"] {
                if !output.get(field).is_some_and(Value::is_object) {
                    return Err(format!(
                        "Step '{}' field 'structuredOutput.{}' must be an object",
                        id, field
                    ));
                }
            }
        }
        Some(_) => {
            return Err(format!(
                "Step '{}' field 'structuredOutput' must be an object",
                id
            ));
        }
    }

    if let Some(value) = step.get("toolArgs") {
        if !value.is_object() && !value.is_null() {
            return Err(format!("Step '{}' field 'toolArgs' must be an object", id));
        }
    }

    for field in ["promptVariables", "functionVariables"] {
        if let Some(value) = step.get(field) {
            if !value.is_array() && !value.is_null() {
                return Err(format!("Step '{}' field '{}' must be an array", id, field));
            }
        }
    }

    Ok(())
}

fn allowed_fields(step_type: &str) -> &'static [&'static str] {
    match step_type {
        "prompt" | "agent-task" => &["modelId", "templateId", "structuredOutput", "inputMapping"],
        "custom-prompt" => &[
            "modelId",
            "promptContent",
            "promptVariables",
            "structuredOutput",
            "inputMapping",
        ],
        "tool-call" => &["toolName", "toolArgs", "inputMapping"],
        "function" => &[
            "functionLanguage",
            "functionCode",
            "functionVariables",
            "inputMapping",
        ],
        "transform" => &["transformMappings"],
        _ => &[],
    }
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn check_foreign_fields(id: &str, step_type: &str, step: &Map<String, Value>) -> Result<(), String> {
    let allowed = allowed_fields(step_type);

    for field in GROUP_FIELDS {
        if allowed.contains(&field) {
            continue;
        }

        if step.get(field).is_some_and(is_populated) {
            return Err(format!(
                "Step '{}' of type '{}' must not set field '{}'",
                id, step_type, field
            ));
        }
    }

    if step_type != "human-in-the-loop" && step.get("instructionsForHuman").is_some_and(is_populated)
    {
        return Err(format!(
            "Step '{}' of type '{}' must not set field 'instructionsForHuman'",
            id, step_type
        ));
    }

    Ok(())
}

fn check_required_fields(
    id: &str,
    step_type: &str,
    step: &Map<String, Value>,
) -> Result<(), String> {
    let required: &[&str] = match step_type {
        "prompt" | "agent-task" => &["modelId", "templateId"],
        "custom-prompt" => &["modelId", "promptContent"],
        "tool-call" => &["toolName"],
        "function" => &["functionCode"],
        "transform" => &["transformMappings"],
        _ => &[],
    };

    for field in required {
        let present = match step.get(*field) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Object(_)) => true,
            _ => false,
        };

        if !present {
            return Err(format!(
                "Step '{}' of type '{}' is missing required field '{}'",
                id, step_type, field
            ));
        }
    }

    Ok(())
}

fn check_trigger(root: &Map<String, Value>) -> Result<(), String> {
    let trigger_type = match root.get("triggerType") {
        None | Some(Value::Null) => "custom",
        Some(Value::String(value)) => value.as_str(),
        Some(_) => return Err("Workflow field 'triggerType' must be a string".to_string()),
    };

    if !["custom", "template", "task"].contains(&trigger_type) {
        return Err(format!(
            "Workflow field 'triggerType' has unknown value '{}'",
            trigger_type
        ));
    }

    for field in ["triggerPrompt", "triggerRef"] {
        if let Some(value) = root.get(field) {
            if !value.is_string() && !value.is_null() {
                return Err(format!("Workflow field '{}' must be a string", field));
            }
        }
    }

    if trigger_type != "custom" && !root.get("triggerRef").is_some_and(is_populated) {
        return Err(format!(
            "Workflow with trigger type '{}' is missing required field 'triggerRef'",
            trigger_type
        ));
    }

    match root.get("templateVariables") {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err("Workflow field 'templateVariables' must be an object".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "id": "wf-1",
            "name": "Summarize",
            "description": "Summarize the input",
            "triggerType": "custom",
            "triggerPrompt": "Summarize: hello",
            "steps": [
                {
                    "id": "s1",
                    "name": "Summary",
                    "type": "prompt",
                    "modelId": "openai:gpt-4o",
                    "templateId": "summarize"
                }
            ],
            "isShortcut": false,
            "createdAt": "2024-05-01T10:00:00Z",
            "updatedAt": "2024-05-01T10:00:00Z"
        })
    }

    fn error_of(candidate: &Value) -> String {
        let outcome = validate(candidate);
        assert!(!outcome.is_valid);
        assert!(outcome.workflow.is_none());
        outcome.error.unwrap()
    }

    #[test]
    fn test_valid_workflow_parses() {
        let outcome = validate(&base());
        assert!(outcome.is_valid, "{:?}", outcome.error);

        let workflow = outcome.workflow.unwrap();
        assert_eq!(workflow.id().as_str(), "wf-1");
        assert_eq!(workflow.steps()[0].type_name(), "prompt");
    }

    #[test]
    fn test_missing_steps_names_steps() {
        let mut doc = base();
        doc.as_object_mut().unwrap().remove("steps");
        assert_eq!(error_of(&doc), "Missing required field 'steps'");
    }

    #[test]
    fn test_steps_must_be_array() {
        let mut doc = base();
        doc["steps"] = json!({"s1": {}});
        assert!(error_of(&doc).contains("steps"));
    }

    #[test]
    fn test_top_level_fields_checked_in_order() {
        let mut doc = base();
        doc["name"] = json!(42);
        doc.as_object_mut().unwrap().remove("createdAt");
        assert_eq!(error_of(&doc), "Workflow field 'name' must be a string");
    }

    #[test]
    fn test_unknown_step_type() {
        let mut doc = base();
        doc["steps"][0]["type"] = json!("parallel");
        assert!(error_of(&doc).contains("unknown type 'parallel'"));
    }

    #[test]
    fn test_duplicate_step_ids() {
        let mut doc = base();
        let step = doc["steps"][0].clone();
        doc["steps"].as_array_mut().unwrap().push(step);
        assert_eq!(error_of(&doc), "Duplicate step id 's1'");
    }

    #[test]
    fn test_model_id_must_be_string() {
        let mut doc = base();
        doc["steps"][0]["modelId"] = json!(7);
        assert_eq!(error_of(&doc), "Step 's1' field 'modelId' must be a string");
    }

    #[test]
    fn test_mapping_values_must_be_strings() {
        let mut doc = base();
        doc["steps"][0]["inputMapping"] = json!({"topic": 1});
        assert!(error_of(&doc).contains("'inputMapping' entry 'topic'"));
    }

    #[test]
    fn test_structured_output_requires_both_schemas() {
        let mut doc = base();
        doc["steps"][0]["structuredOutput"] = json!({"schema": {}});
        assert!(error_of(&doc).contains("structuredOutput.jsonSchema"));
    }

    #[test]
    fn test_transform_with_tool_args_is_rejected_naming_field() {
        let mut doc = base();
        doc["steps"] = json!([{
            "id": "t1",
            "name": "Reshape",
            "type": "transform",
            "transformMappings": {"summary": "$.outputs[0]"},
            "toolArgs": {"q": "x"}
        }]);
        let error = error_of(&doc);
        assert!(error.contains("'toolArgs'"), "{}", error);
    }

    #[test]
    fn test_human_step_with_model_id_is_rejected() {
        let mut doc = base();
        doc["steps"] = json!([{
            "id": "h1",
            "name": "Review",
            "type": "human-in-the-loop",
            "instructionsForHuman": "Check it",
            "modelId": "openai:gpt-4o"
        }]);
        assert!(error_of(&doc).contains("'modelId'"));
    }

    #[test]
    fn test_empty_foreign_fields_are_tolerated() {
        let mut doc = base();
        doc["steps"][0]["toolArgs"] = json!({});
        doc["steps"][0]["transformMappings"] = Value::Null;
        assert!(validate(&doc).is_valid);
    }

    #[test]
    fn test_required_field_missing() {
        let mut doc = base();
        doc["steps"] = json!([{"id": "c1", "name": "Call", "type": "tool-call"}]);
        assert_eq!(
            error_of(&doc),
            "Step 'c1' of type 'tool-call' is missing required field 'toolName'"
        );
    }

    #[test]
    fn test_template_trigger_requires_ref() {
        let mut doc = base();
        doc["triggerType"] = json!("template");
        assert!(error_of(&doc).contains("triggerRef"));
    }

    #[test]
    fn test_bad_timestamp_is_rejected_by_typed_parse() {
        let mut doc = base();
        doc["createdAt"] = json!("yesterday");
        assert!(error_of(&doc).starts_with("Invalid workflow"));
    }

    #[test]
    fn test_validate_serialize_validate_is_idempotent() {
        let mut doc = base();
        doc["steps"].as_array_mut().unwrap().extend([
            json!({
                "id": "t1", "name": "Reshape", "type": "transform",
                "transformMappings": {"summary": "$.outputs[1]"}
            }),
            json!({
                "id": "f1", "name": "Count", "type": "function",
                "functionLanguage": "jexl", "functionCode": "outputs|length",
                "functionVariables": [{"name": "limit", "type": "number", "default": 3}]
            }),
            json!({
                "id": "h1", "name": "Review", "type": "human-in-the-loop",
                "instructionsForHuman": "Approve the summary"
            }),
            json!({
                "id": "c1", "name": "Post", "type": "custom-prompt",
                "modelId": "openai:gpt-4o-mini", "promptContent": "Rate {{summary}}",
                "structuredOutput": {"schema": {}, "jsonSchema": {"type": "object"}}
            }),
        ]);

        let first = validate(&doc).workflow.unwrap();
        let serialized = serde_json::to_value(&first).unwrap();
        let second = validate(&serialized);

        assert!(second.is_valid, "{:?}", second.error);
        assert_eq!(second.workflow.unwrap(), first);
    }

    #[test]
    fn test_revalidate_typed_workflow() {
        let workflow = validate(&base()).workflow.unwrap();
        assert_eq!(revalidate(&workflow).unwrap(), workflow);
    }
}
