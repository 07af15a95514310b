mod args;
mod orchestrator;

use std::time::Duration;

use clap::Parser;
use common::{
    jobs::{JobHandle, JobStatus},
    utils::config::get_config,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    args::{Cli, Command},
    orchestrator::{search_id, Orchestrator},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    // Get config
    let config = get_config()?;

    let orchestrator = Orchestrator::from_config(&config).await?;

    match cli.command {
        Command::Load(args) => {
            let handle = orchestrator.start_load(&args.path).await?;
            info!(job_id = %handle.id(), path = %args.path.display(), "load started");
            let status = handle.wait().await;
            print_json(&handle.snapshot())?;
            exit_on_failure(&status);
        }
        Command::Search(args) => {
            let handle = orchestrator.start_search(&args.query);
            info!(job_id = %handle.id(), query = %args.query, "search started");
            let every = Duration::from_secs(args.poll_secs.max(1));
            let status = wait_with_progress(&orchestrator, &handle, every).await;
            let snapshot = handle.snapshot();
            match search_id(&handle) {
                Some(search_id) => print_json(&serde_json::json!({
                    "job": snapshot,
                    "artifacts": orchestrator.artifact_progress(&search_id).await?,
                }))?,
                None => print_json(&snapshot)?,
            }
            exit_on_failure(&status);
        }
        Command::Overview => {
            print_json(&orchestrator.get_overview().await?)?;
        }
        Command::ResetLock => {
            orchestrator.reset_lock().await?;
        }
        Command::DeleteSearch(args) => {
            let removed = orchestrator.delete_search(&args.search_id).await?;
            print_json(&serde_json::json!({
                "search_id": args.search_id,
                "artifacts_removed": removed,
            }))?;
        }
    }

    Ok(())
}

/// Waits for a search job, logging task counts and, once the search id is
/// known, every artifact's progress on each tick.
async fn wait_with_progress(
    orchestrator: &Orchestrator,
    handle: &JobHandle,
    every: Duration,
) -> JobStatus {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            status = handle.wait() => return status,
            _ = ticker.tick() => {
                let snapshot = handle.snapshot();
                for (task, counts) in &snapshot.tasks {
                    info!(
                        job_id = %snapshot.id,
                        task = %task,
                        dispatched = counts.dispatched,
                        succeeded = counts.succeeded,
                        failed = counts.failed,
                        "job progress"
                    );
                }
                let Some(search_id) = search_id(handle) else {
                    continue;
                };
                match orchestrator.artifact_progress(&search_id).await {
                    Ok(report) => {
                        for artifact in report {
                            info!(
                                search_id = %search_id,
                                artifact_id = %artifact.artifact_id,
                                format = %artifact.format,
                                status = artifact.status.as_str(),
                                progress = artifact.progress,
                                "artifact progress"
                            );
                        }
                    }
                    Err(err) => warn!(error = %err, "artifact progress unavailable"),
                }
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_on_failure(status: &JobStatus) {
    if let JobStatus::Failed(reason) = status {
        error!(%reason, "job failed");
        std::process::exit(1);
    }
}
