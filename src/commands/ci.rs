//! `xc ci build` / `xc ci run`

use anyhow::Result;
use colored::*;
use std::path::Path;

use crate::ci::{DockerCli, Orchestrator, RunOutcome, RunRequest};

#[derive(Clone, Debug)]
pub struct BuildArgs {
    pub target: Option<String>,
    pub rebuild: bool,
    pub run_after_build: bool,
}

pub fn handle_build(project_root: &Path, args: &BuildArgs) -> Result<()> {
    let engine = DockerCli::from_env();
    tracing::debug!(?engine, root = %project_root.display(), "starting CI run");

    let request = RunRequest {
        target: args.target.clone(),
        rebuild: args.rebuild,
        run_after_build: args.run_after_build,
        ..RunRequest::new(project_root)
    };

    let mut orchestrator = Orchestrator::new(engine);
    match orchestrator.run(&request)? {
        RunOutcome::Completed(summary) if summary.skipped > 0 => {
            println!(
                "{} {} inactive target(s) were not built",
                "ℹ".blue(),
                summary.skipped
            );
        }
        RunOutcome::Completed(_) => {}
        RunOutcome::AlreadyStarted => {
            println!("{} CI build already running in this process", "!".yellow());
        }
    }
    Ok(())
}
