//! Cross-compilation CI.
//!
//! [`Orchestrator::run`] loads `xc-ci.toml`, picks the targets to build and
//! takes each one through environment resolution, configure, build and
//! artifact staging, one target at a time. The first failing target stops the
//! run; outputs of targets that already finished stay on disk.

use anyhow::Result;
use colored::*;
use std::path::{Path, PathBuf};

pub mod artifacts;
pub mod cache;
pub mod dispatch;
pub mod engine;
mod error;
pub mod resolver;
pub mod script;
pub mod strategy;

pub use engine::{ContainerEngine, DockerCli};
pub use error::{CiError, ErrorCategory};

use crate::config::{CiConfig, CiTarget, Runner};
use cache::{CacheLayout, CacheLock};
use strategy::TargetContext;

/// Targets picked for one run.
#[derive(Debug)]
pub struct Selection<'a> {
    pub targets: Vec<&'a CiTarget>,
    /// Inactive targets left out of a build-all run.
    pub skipped: usize,
}

/// With a name, selects exactly that target whether or not it is active.
/// Without one, selects every active target in config order.
pub fn select_targets<'a>(config: &'a CiConfig, name: Option<&str>) -> Result<Selection<'a>, CiError> {
    if let Some(name) = name {
        let target = config
            .find_target(name)
            .ok_or_else(|| CiError::TargetNotFound(name.to_string()))?;
        return Ok(Selection {
            targets: vec![target],
            skipped: 0,
        });
    }

    let (targets, inactive): (Vec<&CiTarget>, Vec<&CiTarget>) =
        config.targets.iter().partition(|t| t.is_active());
    if targets.is_empty() {
        return Err(CiError::NoActiveTargets);
    }
    Ok(Selection {
        targets,
        skipped: inactive.len(),
    })
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub target: Option<String>,
    pub rebuild: bool,
    pub run_after_build: bool,
}

impl RunRequest {
    /// Request for the project at `project_root` using its `xc-ci.toml`.
    pub fn new(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config_path: project_root.join(crate::config::CONFIG_FILE),
            target: None,
            rebuild: false,
            run_after_build: false,
        }
    }

    fn command_label(&self) -> &'static str {
        if self.run_after_build { "xc ci run" } else { "xc ci build" }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub built: Vec<String>,
    pub skipped: usize,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// This orchestrator already ran once; nothing was done.
    AlreadyStarted,
}

/// Drives CI runs. One orchestrator executes at most one run.
pub struct Orchestrator<E: ContainerEngine> {
    engine: E,
    started: bool,
}

impl<E: ContainerEngine> Orchestrator<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            started: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn run(&mut self, request: &RunRequest) -> Result<RunOutcome> {
        if self.started {
            tracing::debug!("CI run already started in this process, ignoring");
            return Ok(RunOutcome::AlreadyStarted);
        }
        self.started = true;
        execute(&self.engine, request).map(RunOutcome::Completed)
    }
}

fn execute<E: ContainerEngine>(engine: &E, request: &RunRequest) -> Result<RunSummary> {
    let root = request.project_root.as_path();
    let config = CiConfig::load(&request.config_path)?;
    let selection = select_targets(&config, request.target.as_deref())?;

    if request.target.is_some() {
        for t in selection.targets.iter().filter(|t| !t.is_active()) {
            println!(
                "{} Target '{}' is inactive but was explicitly requested",
                "!".yellow(),
                t.name
            );
        }
    } else if selection.skipped > 0 {
        println!(
            "{} Skipping {} inactive target(s)",
            "ℹ".blue(),
            selection.skipped
        );
    }

    let output_root = {
        let p = Path::new(&config.output);
        if p.is_absolute() { p.to_path_buf() } else { root.join(p) }
    };
    cache::create_dir(&cache::cache_root(root))?;
    cache::create_dir(&output_root)?;

    for t in selection
        .targets
        .iter()
        .filter(|t| t.runner == Runner::Docker && t.docker.is_some())
    {
        CacheLayout::new(root, &t.name).ensure_pkg_cache()?;
    }

    println!(
        "{} Building {} target(s)...",
        "🚀".cyan(),
        selection.targets.len()
    );

    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "app".to_string());

    let mut built = Vec::new();
    for &target in &selection.targets {
        let ctx = TargetContext {
            target,
            settings: config.effective_settings(target),
            project_root: root.to_path_buf(),
            project_name: project_name.clone(),
            output_root: output_root.clone(),
            layout: CacheLayout::new(root, &target.name),
            force_refresh: request.rebuild,
            run_after_build: request.run_after_build,
        };
        if let Err(e) = build_target(engine, &ctx, request.command_label()) {
            println!("{} Target {} failed", "x".red(), target.name.bold());
            return Err(anyhow::Error::new(e).context(format!("failed to build target {}", target.name)));
        }
        built.push(target.name.clone());
    }

    println!();
    println!(
        "{} All {} target(s) built. Artifacts in {}",
        "✓".green(),
        built.len(),
        output_root.display()
    );

    Ok(RunSummary {
        built,
        skipped: selection.skipped,
        output_dir: output_root,
    })
}

fn build_target<E: ContainerEngine>(
    engine: &E,
    ctx: &TargetContext,
    command: &str,
) -> Result<(), CiError> {
    let target = ctx.target;
    println!();
    println!(
        "{} Target {} ({})",
        "▶".cyan(),
        target.name.bold(),
        target.describe_environment()
    );

    target.validate()?;
    let lock = CacheLock::acquire(&ctx.layout, command)?;
    tracing::debug!(lock = %lock.path().display(), target = %target.name, "holding cache lock");

    let mut strategy = strategy::for_target(target, &ctx.project_root, engine);
    strategy.resolve_environment(ctx)?;
    strategy.configure(ctx)?;
    strategy.build(ctx)?;
    let staged = strategy.collect_artifacts(ctx)?;
    if ctx.run_after_build {
        strategy.run_primary(ctx)?;
    }

    println!(
        "{} Target {} complete ({} artifact(s) in {})",
        "✓".green(),
        target.name,
        staged.len(),
        ctx.output_dir().display()
    );
    Ok(())
}
