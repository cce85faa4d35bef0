//! Prompt management domain - typed templates and the template compiler

mod entity;
mod template;

pub use entity::{PromptId, PromptKind, PromptTemplate, PromptVariable, VariableType};
pub use template::{
    compile, compile_template, extract_placeholders, stringify, CompiledPrompt, TemplateError,
};
pub(crate) use template::json_type_name;
