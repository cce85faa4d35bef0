//! Step runner: builds each step's input and invokes its collaborator

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::debug;

use crate::domain::prompt::{compile, compile_template};
use crate::domain::workflow::query::{resolve_binding, resolve_in, QueryError};
use crate::domain::workflow::{
    CustomPromptStep, FunctionStep, StructuredOutput, TemplateStep, ToolCallStep, TransformStep,
    TriggerType,
};
use crate::domain::{
    ExecutionContext, FunctionSandbox, LlmProvider, LlmRequest, LlmResponseFormat, PromptId,
    PromptKind, PromptTemplate, Storage, StepKind, TemplateError, ToolInvoker, WorkflowError,
    WorkflowStep, WorkflowTemplate,
};

/// Collaborators the executor calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<dyn ToolInvoker>,
    pub sandbox: Arc<dyn FunctionSandbox>,
    pub prompts: Arc<dyn Storage<PromptTemplate>>,
}

/// Executes the non-interactive step types
pub struct StepRunner {
    collaborators: Collaborators,
    step_timeout: Duration,
}

impl StepRunner {
    pub fn new(collaborators: Collaborators, step_timeout: Duration) -> Self {
        Self {
            collaborators,
            step_timeout,
        }
    }

    /// Produce a run's initial text from its trigger
    pub async fn resolve_trigger(&self, workflow: &WorkflowTemplate) -> Result<String, WorkflowError> {
        let kind = match workflow.trigger_type() {
            TriggerType::Custom => {
                return Ok(workflow.trigger_prompt().unwrap_or_default().to_string());
            }
            TriggerType::Template => PromptKind::Prompt,
            TriggerType::Task => PromptKind::AgentTask,
        };

        let reference = workflow
            .trigger_ref()
            .filter(|reference| !reference.trim().is_empty())
            .ok_or_else(|| {
                WorkflowError::validation(format!(
                    "triggerRef is required for '{}' triggers",
                    workflow.trigger_type().as_str()
                ))
            })?;

        let template = self.fetch_template(reference, kind).await?;
        let values: HashMap<String, Value> = workflow
            .template_variables()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(compile_template(&template, &values)?.content)
    }

    /// Run one step against the context. Human steps are driven by the engine.
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        previous: Option<&WorkflowStep>,
        context: &ExecutionContext,
    ) -> Result<Value, WorkflowError> {
        debug!(step_id = %step.id(), step_type = step.type_name(), "Executing step");

        match step.kind() {
            StepKind::Prompt(config) => {
                self.run_template(step, config, PromptKind::Prompt, previous, context)
                    .await
            }
            StepKind::AgentTask(config) => {
                self.run_template(step, config, PromptKind::AgentTask, previous, context)
                    .await
            }
            StepKind::CustomPrompt(config) => {
                self.run_custom_prompt(step, config, previous, context).await
            }
            StepKind::ToolCall(config) => self.run_tool(step, config, previous, context).await,
            StepKind::Function(config) => self.run_function(step, config, previous, context).await,
            StepKind::Transform(config) => run_transform(config, context),
            StepKind::HumanInTheLoop(_) => Err(WorkflowError::invalid_state(format!(
                "Step '{}' needs a human decision",
                step.id()
            ))),
        }
    }

    async fn run_template(
        &self,
        step: &WorkflowStep,
        config: &TemplateStep,
        kind: PromptKind,
        previous: Option<&WorkflowStep>,
        context: &ExecutionContext,
    ) -> Result<Value, WorkflowError> {
        let bindings = bindings(&config.input_mapping, previous, context)?;
        let template = self.fetch_template(&config.template_id, kind).await?;
        let compiled = compile_template(&template, &into_values(bindings))?;

        self.call_model(
            step,
            &config.model_id,
            compiled.content,
            config.structured_output.as_ref(),
        )
        .await
    }

    async fn run_custom_prompt(
        &self,
        step: &WorkflowStep,
        config: &CustomPromptStep,
        previous: Option<&WorkflowStep>,
        context: &ExecutionContext,
    ) -> Result<Value, WorkflowError> {
        let bindings = bindings(&config.input_mapping, previous, context)?;
        let compiled = compile(
            &config.prompt_content,
            &config.prompt_variables,
            &into_values(bindings),
        )?;

        self.call_model(
            step,
            &config.model_id,
            compiled.content,
            config.structured_output.as_ref(),
        )
        .await
    }

    async fn run_tool(
        &self,
        step: &WorkflowStep,
        config: &ToolCallStep,
        previous: Option<&WorkflowStep>,
        context: &ExecutionContext,
    ) -> Result<Value, WorkflowError> {
        let mut args = config.tool_args.clone();
        args.extend(bindings(&config.input_mapping, previous, context)?);

        let tools = &self.collaborators.tools;
        self.bounded(step, async {
            tools
                .call_tool(&config.tool_name, Value::Object(args))
                .await
                .map_err(WorkflowError::from)
        })
        .await
    }

    async fn run_function(
        &self,
        step: &WorkflowStep,
        config: &FunctionStep,
        previous: Option<&WorkflowStep>,
        context: &ExecutionContext,
    ) -> Result<Value, WorkflowError> {
        let mut provided = bindings(&config.input_mapping, previous, context)?;

        let mut scope = match context.to_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        for variable in &config.function_variables {
            let value = provided
                .remove(&variable.name)
                .filter(|value| !value.is_null())
                .or_else(|| variable.default.clone().filter(|value| !value.is_null()));

            match value {
                Some(value) => {
                    scope.insert(variable.name.clone(), value);
                }
                None if variable.required => {
                    return Err(TemplateError::MissingVariable {
                        name: variable.name.clone(),
                    }
                    .into());
                }
                None => {
                    scope.insert(variable.name.clone(), Value::Null);
                }
            }
        }
        scope.extend(provided);

        let sandbox = &self.collaborators.sandbox;
        self.bounded(step, async {
            sandbox
                .execute(
                    config.function_language,
                    &config.function_code,
                    Value::Object(scope),
                )
                .await
                .map_err(WorkflowError::from)
        })
        .await
    }

    async fn call_model(
        &self,
        step: &WorkflowStep,
        model_id: &str,
        prompt: String,
        structured: Option<&StructuredOutput>,
    ) -> Result<Value, WorkflowError> {
        let mut request = LlmRequest::builder().user(prompt);
        if let Some(output) = structured {
            request = request.response_format(LlmResponseFormat::json_schema(
                schema_name(step.id()),
                output.json_schema.clone(),
            ));
        }
        let request = request.build();

        let llm = &self.collaborators.llm;
        let response = self
            .bounded(step, async {
                llm.chat(model_id, request)
                    .await
                    .map_err(|e| WorkflowError::model(model_id, e.to_string()))
            })
            .await?;

        match structured {
            Some(output) => parse_structured(model_id, response.content(), &output.json_schema),
            None => Ok(Value::String(response.content().to_string())),
        }
    }

    async fn fetch_template(
        &self,
        id: &str,
        kind: PromptKind,
    ) -> Result<PromptTemplate, WorkflowError> {
        let key = PromptId::new(id)?;
        let template = self
            .collaborators
            .prompts
            .get(&key)
            .await?
            .ok_or_else(|| WorkflowError::not_found(format!("{} '{}' not found", label(kind), id)))?;

        if template.kind() != kind {
            return Err(WorkflowError::validation(format!(
                "'{}' is a {}, expected a {}",
                id,
                label(template.kind()),
                label(kind)
            )));
        }

        Ok(template)
    }

    async fn bounded<F, T>(&self, step: &WorkflowStep, invocation: F) -> Result<T, WorkflowError>
    where
        F: Future<Output = Result<T, WorkflowError>>,
    {
        timeout(self.step_timeout, invocation)
            .await
            .map_err(|_| WorkflowError::Timeout {
                step_id: step.id().to_string(),
                timeout_ms: self.step_timeout.as_millis() as u64,
            })?
    }
}

/// Variable bindings for a step: the previous transform's fields overlaid
/// by the step's own input mapping
pub fn bindings(
    mapping: &std::collections::BTreeMap<String, String>,
    previous: Option<&WorkflowStep>,
    context: &ExecutionContext,
) -> Result<Map<String, Value>, WorkflowError> {
    let mut bound = Map::new();

    if previous.is_some_and(|step| step.kind().is_transform()) {
        if let Value::Object(fields) = context.last_output() {
            bound.extend(fields.clone());
        }
    }

    if mapping.is_empty() {
        return Ok(bound);
    }

    let root = context.to_json();
    for (name, raw) in mapping {
        let value = resolve_binding(raw, &root).map_err(|e| named(name, e))?;
        bound.insert(name.clone(), value);
    }

    Ok(bound)
}

fn run_transform(config: &TransformStep, context: &ExecutionContext) -> Result<Value, WorkflowError> {
    let root = context.to_json();
    let mut output = Map::new();

    for (field, query) in &config.transform_mappings {
        let value = resolve_in(query, &root).map_err(|e| named(field, e))?;
        output.insert(field.clone(), value);
    }

    Ok(Value::Object(output))
}

fn named(field: &str, error: QueryError) -> WorkflowError {
    match error {
        QueryError::Syntax(message) => {
            WorkflowError::query_syntax(format!("Field '{}': {}", field, message))
        }
        QueryError::Resolution(message) => {
            WorkflowError::query_resolution(format!("Field '{}': {}", field, message))
        }
    }
}

fn into_values(bindings: Map<String, Value>) -> HashMap<String, Value> {
    bindings.into_iter().collect()
}

fn label(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::Prompt => "Prompt template",
        PromptKind::AgentTask => "Agent task",
    }
}

/// Response format names only allow `[A-Za-z0-9_-]`
fn schema_name(step_id: &str) -> String {
    step_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Parse a structured model response and check it against the step schema
fn parse_structured(model_id: &str, text: &str, schema: &Value) -> Result<Value, WorkflowError> {
    let instance: Value = serde_json::from_str(strip_code_fence(text)).map_err(|e| {
        WorkflowError::model(model_id, format!("Response is not valid JSON: {}", e))
    })?;

    let validator = jsonschema::validator_for(schema)
        .map_err(|e| WorkflowError::model(model_id, format!("Invalid output schema: {}", e)))?;

    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|error| error.to_string())
        .collect();

    if !errors.is_empty() {
        return Err(WorkflowError::model(
            model_id,
            format!("Response does not match schema: {}", errors.join("; ")),
        ));
    }

    Ok(instance)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
