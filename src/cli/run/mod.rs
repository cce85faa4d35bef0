//! Run command - executes a workflow document from the command line

use std::path::PathBuf;

use clap::Args;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::domain::workflow::Decision;
use crate::domain::{HumanDecision, RunEvent, RunId, RunStatus, WorkflowRun};
use crate::infrastructure::services::{RunView, WorkflowService};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow JSON document
    pub file: PathBuf,

    /// Initial prompt; defaults to the workflow's trigger
    #[arg(long)]
    pub prompt: Option<String>,

    /// Approve every human step without asking
    #[arg(long)]
    pub auto_approve: bool,
}

/// Import the document, run it and print the final run view
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = super::bootstrap()?;
    let document = super::validate::read_document(&args.file).await?;

    let state = crate::create_app_state(&config).await?;
    let view = execute(&state.workflow_service, &document, args.prompt, args.auto_approve).await?;

    println!("{}", serde_json::to_string_pretty(&view)?);

    if view.run.status != RunStatus::Success {
        anyhow::bail!("Run {} finished with status {}", view.run.run_id, view.run.status.as_str());
    }

    Ok(())
}

async fn execute(
    service: &WorkflowService,
    document: &serde_json::Value,
    prompt: Option<String>,
    auto_approve: bool,
) -> anyhow::Result<RunView> {
    let workflow = service.import(document).await?;
    info!(workflow_id = %workflow.id(), "Workflow imported");

    let events = service.subscribe();
    let mut handle = service.start_run(workflow.id().as_str(), prompt).await?;
    let run_id = handle.run_id().clone();
    let printer = tokio::spawn(print_events(events, run_id.clone()));

    let mut answered: Option<usize> = None;
    loop {
        let run = handle
            .wait_for(|run| run.is_terminal() || awaiting_new_decision(run, answered))
            .await;

        if run.is_terminal() {
            break;
        }

        let Some(pending) = run.pending_human.clone() else {
            continue;
        };
        answered = run.current_step;

        let decision = if auto_approve {
            info!(step_id = %pending.step_id, "Auto-approving human step");
            Decision::Approve
        } else {
            ask(&pending.step_id, &pending.instructions).await?
        };

        service
            .submit_decision(HumanDecision {
                run_id: run_id.clone(),
                step_id: pending.step_id,
                decision,
                data: None,
            })
            .await?;
    }

    printer.abort();
    Ok(service.get_run(run_id.as_str()).await?)
}

fn awaiting_new_decision(run: &WorkflowRun, answered: Option<usize>) -> bool {
    run.status == RunStatus::PausedForHuman && run.current_step != answered
}

async fn ask(step_id: &str, instructions: &str) -> anyhow::Result<Decision> {
    let mut stderr = tokio::io::stderr();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let prompt = format!("[{}] {}\napprove or reject? ", step_id, instructions);
        stderr.write_all(prompt.as_bytes()).await?;
        stderr.flush().await?;

        let Some(line) = lines.next_line().await? else {
            anyhow::bail!("stdin closed while waiting for a decision on step '{}'", step_id);
        };

        if let Some(decision) = parse_decision(&line) {
            return Ok(decision);
        }
    }
}

fn parse_decision(input: &str) -> Option<Decision> {
    match input.trim().to_ascii_lowercase().as_str() {
        "a" | "approve" | "y" | "yes" => Some(Decision::Approve),
        "r" | "reject" | "n" | "no" => Some(Decision::Reject),
        _ => None,
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<RunEvent>, run_id: RunId) {
    loop {
        match events.recv().await {
            Ok(event) if event.run_id == run_id => {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
