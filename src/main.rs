//! # xcross CLI Entry Point
//!
//! This is the main executable for the `xc` command-line tool.
//! It parses CLI arguments using clap and routes commands to the handlers in
//! [`xcross::commands`].

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use xcross::ci::dispatch::find_project_root;
use xcross::commands;
use xcross::commands::target::TargetOp;
use xcross::config::CONFIG_FILE;
use xcross::logging;

#[derive(Parser)]
#[command(name = "xc")]
#[command(about = "Cross-compile C/C++ projects in containers", version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Show engine commands and cache decisions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build targets defined in xc-ci.toml
    Ci {
        #[command(subcommand)]
        op: CiOp,
    },
    /// Generate shell completion scripts
    Completion { shell: Shell },
}

#[derive(Subcommand)]
enum CiOp {
    /// Build all active targets, or one target by name
    Build {
        /// Build only this target (inactive targets included)
        #[arg(long)]
        target: Option<String>,
        /// Force image pull/rebuild even when cached
        #[arg(long)]
        rebuild: bool,
    },
    /// Build one target, then run its main executable
    Run {
        /// Target to build and run
        #[arg(long)]
        target: String,
        /// Force image pull/rebuild even when cached
        #[arg(long)]
        rebuild: bool,
    },
    /// Add a target interactively
    AddTarget,
    /// Remove targets by name; `rm-target list` opens a multi-select
    RmTarget {
        /// Target names (interactive picker when omitted)
        names: Vec<String>,
    },
    /// List configured targets
    Targets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    match &cli.command {
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
        Commands::Ci { op } => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            let root = find_project_root(&cwd);
            let config_path = root.join(CONFIG_FILE);

            match op {
                CiOp::Build { target, rebuild } => commands::ci::handle_build(
                    &root,
                    &commands::ci::BuildArgs {
                        target: target.clone(),
                        rebuild: *rebuild,
                        run_after_build: false,
                    },
                ),
                CiOp::Run { target, rebuild } => commands::ci::handle_build(
                    &root,
                    &commands::ci::BuildArgs {
                        target: Some(target.clone()),
                        rebuild: *rebuild,
                        run_after_build: true,
                    },
                ),
                CiOp::AddTarget => {
                    commands::target::handle_target_command(&config_path, &TargetOp::Add)
                }
                CiOp::RmTarget { names } => {
                    let op = if names.len() == 1 && names[0] == "list" {
                        TargetOp::RemoveList
                    } else {
                        TargetOp::Remove {
                            names: names.clone(),
                        }
                    };
                    commands::target::handle_target_command(&config_path, &op)
                }
                CiOp::Targets => {
                    commands::target::handle_target_command(&config_path, &TargetOp::List)
                }
            }
        }
    }
}
