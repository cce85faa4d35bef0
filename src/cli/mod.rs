//! Command line entry points
//!
//! - `serve`: HTTP API server
//! - `validate`: check a workflow document without running it
//! - `run`: execute a workflow document to completion

pub mod run;
pub mod serve;
pub mod validate;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// LiteChat workflow engine
#[derive(Parser)]
#[command(name = "litechat-workflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API server
    Serve,

    /// Validate a workflow JSON document
    Validate(validate::ValidateArgs),

    /// Run a workflow JSON document and print the final run
    Run(run::RunArgs),
}

/// Load `.env`, the layered configuration and the log subscriber
pub(crate) fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    logging::init_logging(&config.logging);

    Ok(config)
}
