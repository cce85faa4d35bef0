//! Validate command - checks a workflow document

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use serde_json::Value;

use crate::domain::workflow::{validate, ValidationOutcome};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Workflow JSON document
    pub file: PathBuf,
}

/// Print the validation outcome; invalid documents exit non-zero
pub async fn run(args: ValidateArgs) -> anyhow::Result<()> {
    let outcome = validate_file(&args.file).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.is_valid {
        anyhow::bail!("{} is not a valid workflow", args.file.display());
    }

    Ok(())
}

/// Read a workflow document from disk
pub(crate) async fn read_document(path: &Path) -> anyhow::Result<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", path.display()))
}

async fn validate_file(path: &Path) -> anyhow::Result<ValidationOutcome> {
    Ok(validate(&read_document(path).await?))
}
