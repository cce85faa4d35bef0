//! Prompt service - CRUD operations and compilation for prompt templates

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::prompt::{compile_template, extract_placeholders};
use crate::domain::{
    CompiledPrompt, DomainError, PromptId, PromptKind, PromptTemplate, PromptVariable, Storage,
};

/// Request to create a new prompt template
#[derive(Debug, Clone)]
pub struct CreatePromptRequest {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: PromptKind,
    pub prompt: String,
    pub variables: Vec<PromptVariable>,
}

impl CreatePromptRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            kind: PromptKind::Prompt,
            prompt: prompt.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_kind(mut self, kind: PromptKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_variable(mut self, variable: PromptVariable) -> Self {
        self.variables.push(variable);
        self
    }
}

/// Request to update an existing prompt template
#[derive(Debug, Clone, Default)]
pub struct UpdatePromptRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<PromptKind>,
    pub prompt: Option<String>,
    pub variables: Option<Vec<PromptVariable>>,
}

impl UpdatePromptRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_variables(mut self, variables: Vec<PromptVariable>) -> Self {
        self.variables = Some(variables);
        self
    }
}

/// Prompt template service
pub struct PromptService {
    storage: Arc<dyn Storage<PromptTemplate>>,
}

impl std::fmt::Debug for PromptService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptService").finish()
    }
}

impl PromptService {
    pub fn new(storage: Arc<dyn Storage<PromptTemplate>>) -> Self {
        Self { storage }
    }

    /// Get a template by ID
    pub async fn get(&self, id: &str) -> Result<Option<PromptTemplate>, DomainError> {
        let prompt_id = self.parse_id(id)?;
        self.storage.get(&prompt_id).await
    }

    /// Get a template by ID, returning an error if not found
    pub async fn get_required(&self, id: &str) -> Result<PromptTemplate, DomainError> {
        self.get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Prompt '{}' not found", id)))
    }

    /// List templates, optionally only those of one kind
    pub async fn list(&self, kind: Option<PromptKind>) -> Result<Vec<PromptTemplate>, DomainError> {
        let prompts = self.storage.list().await?;

        Ok(match kind {
            Some(kind) => prompts.into_iter().filter(|p| p.kind() == kind).collect(),
            None => prompts,
        })
    }

    #[instrument(skip(self, request), fields(prompt_id = %request.id))]
    pub async fn create(&self, request: CreatePromptRequest) -> Result<PromptTemplate, DomainError> {
        let prompt_id = self.parse_id(&request.id)?;

        if self.storage.exists(&prompt_id).await? {
            return Err(DomainError::conflict(format!(
                "Prompt with ID '{}' already exists",
                request.id
            )));
        }

        check_variables(&request.variables)?;

        let mut prompt = PromptTemplate::new(prompt_id, request.name, request.prompt)
            .with_kind(request.kind)
            .with_variables(request.variables);

        if let Some(description) = request.description {
            prompt = prompt.with_description(description);
        }

        debug!(
            placeholders = ?extract_placeholders(prompt.prompt()),
            "Creating prompt template"
        );

        self.storage.create(prompt).await
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: &str,
        request: UpdatePromptRequest,
    ) -> Result<PromptTemplate, DomainError> {
        let mut prompt = self.get_required(id).await?;

        if let Some(name) = request.name {
            prompt.set_name(name);
        }

        if let Some(description) = request.description {
            prompt.set_description(description);
        }

        if let Some(kind) = request.kind {
            prompt.set_kind(kind);
        }

        if let Some(content) = request.prompt {
            prompt.set_prompt(content);
        }

        if let Some(variables) = request.variables {
            check_variables(&variables)?;
            prompt.set_variables(variables);
        }

        self.storage.update(prompt).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, DomainError> {
        let prompt_id = self.parse_id(id)?;
        self.storage.delete(&prompt_id).await
    }

    /// Compile a stored template with the supplied values
    pub async fn compile(
        &self,
        id: &str,
        values: &HashMap<String, Value>,
    ) -> Result<CompiledPrompt, DomainError> {
        let prompt = self.get_required(id).await?;

        compile_template(&prompt, values).map_err(|e| DomainError::validation(e.to_string()))
    }

    fn parse_id(&self, id: &str) -> Result<PromptId, DomainError> {
        PromptId::new(id)
    }
}

fn check_variables(variables: &[PromptVariable]) -> Result<(), DomainError> {
    let mut seen = HashSet::new();

    for variable in variables {
        if variable.name.trim().is_empty() {
            return Err(DomainError::validation("Variable names cannot be empty"));
        }

        if !seen.insert(variable.name.as_str()) {
            return Err(DomainError::validation(format!(
                "Duplicate variable '{}'",
                variable.name
            )));
        }
    }

    Ok(())
}
