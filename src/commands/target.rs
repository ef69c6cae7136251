//! Target management handlers
//!
//! Handles `xc ci add-target`, `xc ci rm-target` and `xc ci targets`, which
//! edit and display the target list in `xc-ci.toml`.

use anyhow::{Context, Result, anyhow, bail};
use colored::*;
use inquire::validator::Validation;
use inquire::{MultiSelect, Select, Text};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{
    CiConfig, CiTarget, DockerBuildConfig, DockerConfig, DockerMode, PullPolicy, Runner,
    is_valid_target_name,
};

const PLATFORMS: &[&str] = &["linux/amd64", "linux/arm64", "linux/arm/v7", "None"];
const BUILD_TYPES: &[&str] = &["Release", "Debug", "RelWithDebInfo", "MinSizeRel"];

/// Target subcommand operations
#[derive(Clone, Debug)]
pub enum TargetOp {
    /// Interactive wizard that appends one target
    Add,
    /// Remove by name; no names opens the numbered picker
    Remove { names: Vec<String> },
    /// Interactive multi-select removal
    RemoveList,
    /// Print the configured targets
    List,
}

pub fn handle_target_command(config_path: &Path, op: &TargetOp) -> Result<()> {
    match op {
        TargetOp::Add => add_target(config_path),
        TargetOp::Remove { names } if names.is_empty() => remove_interactive(config_path),
        TargetOp::Remove { names } => remove_by_name(config_path, names),
        TargetOp::RemoveList => remove_with_list(config_path),
        TargetOp::List => list_targets(config_path),
    }
}

/// Letters, digits, `-` and `_`; must not collide with an existing target.
pub fn check_target_name(name: &str, existing: &[String]) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Target name cannot be empty".into());
    }
    if !is_valid_target_name(name) {
        return Err("Use only letters, numbers, '-' and '_'".into());
    }
    if existing.iter().any(|e| e == name) {
        return Err(format!("Target '{}' already exists", name));
    }
    Ok(())
}

fn add_target(config_path: &Path) -> Result<()> {
    let mut config = CiConfig::load_or_default(config_path)?;
    let existing = config.target_names();

    println!("{} Add a CI build target", "🎯".cyan());
    println!("{}", "─".repeat(40).dimmed());

    let name = Text::new("Target name:")
        .with_help_message("e.g. linux-arm64")
        .with_validator(move |input: &str| {
            Ok::<_, inquire::CustomUserError>(match check_target_name(input, &existing) {
                Ok(()) => Validation::Valid,
                Err(msg) => Validation::Invalid(msg.into()),
            })
        })
        .prompt()?
        .trim()
        .to_string();

    let runner = match Select::new("Runner:", vec!["docker", "native"]).prompt()? {
        "native" => Runner::Native,
        _ => Runner::Docker,
    };

    let docker = if runner == Runner::Docker {
        Some(prompt_docker(&name)?)
    } else {
        None
    };

    let build_type = Select::new("Build type:", BUILD_TYPES.to_vec()).prompt()?;

    let target = CiTarget {
        name: name.clone(),
        runner,
        build_type: Some(build_type.to_string()),
        active: None,
        cmake_options: Vec::new(),
        build_options: Vec::new(),
        env: BTreeMap::new(),
        docker,
    };
    target.validate()?;

    config.add_target(target)?;
    config.save(config_path)?;
    println!(
        "{} Added target {} to {}",
        "✓".green(),
        name.bold(),
        config_path.display()
    );
    Ok(())
}

fn prompt_docker(name: &str) -> Result<DockerConfig> {
    let mode = match Select::new(
        "Docker mode:",
        vec![
            "pull   - use an image from a registry",
            "build  - build from a Dockerfile",
            "local  - use an image already on this machine",
        ],
    )
    .prompt()?
    .split_whitespace()
    .next()
    {
        Some("build") => DockerMode::Build,
        Some("local") => DockerMode::Local,
        _ => DockerMode::Pull,
    };

    let (image, build, pull_policy) = match mode {
        DockerMode::Build => {
            let dockerfile = Text::new("Dockerfile path:")
                .with_default(&format!("docker/Dockerfile.{}", name))
                .prompt()?;
            let build = DockerBuildConfig {
                context: None,
                dockerfile,
                args: BTreeMap::new(),
            };
            (name.to_string(), Some(build), PullPolicy::default())
        }
        DockerMode::Pull => {
            let image = Text::new("Image:").with_default("ubuntu:24.04").prompt()?;
            let policy = match Select::new("Pull policy:", vec!["ifNotPresent", "always", "never"])
                .prompt()?
            {
                "always" => PullPolicy::Always,
                "never" => PullPolicy::Never,
                _ => PullPolicy::IfNotPresent,
            };
            (image, None, policy)
        }
        DockerMode::Local => {
            let image = Text::new("Local image:").prompt()?;
            (image, None, PullPolicy::default())
        }
    };

    let platform = match Select::new("Platform:", PLATFORMS.to_vec()).prompt()? {
        "None" => None,
        p => Some(p.to_string()),
    };

    Ok(DockerConfig {
        mode,
        image,
        platform,
        pull_policy,
        build,
    })
}

fn remove_by_name(config_path: &Path, names: &[String]) -> Result<()> {
    let mut config = CiConfig::load(config_path)?;
    let removed = config.remove_targets(names);

    for name in names.iter().filter(|n| !removed.contains(n)) {
        println!("{} Target '{}' not found", "!".yellow(), name);
    }
    if removed.is_empty() {
        return Ok(());
    }
    config.save(config_path)?;
    for name in &removed {
        println!("{} Removed target {}", "✓".green(), name.bold());
    }
    Ok(())
}

/// Parses a picker answer such as `1,3` or `all` into sorted 0-based indices.
pub fn parse_selection(input: &str, count: usize) -> Result<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok((0..count).collect());
    }
    let mut picked = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let n: usize = part
            .parse()
            .with_context(|| format!("'{}' is not a target number", part))?;
        if n == 0 || n > count {
            bail!("{} is out of range (1-{})", n, count);
        }
        picked.push(n - 1);
    }
    if picked.is_empty() {
        bail!("No targets selected");
    }
    picked.sort_unstable();
    picked.dedup();
    Ok(picked)
}

fn remove_interactive(config_path: &Path) -> Result<()> {
    let config = CiConfig::load(config_path)?;
    if config.targets.is_empty() {
        println!("{} No targets configured", "!".yellow());
        return Ok(());
    }

    println!("{}", "Configured targets:".bold());
    for (i, t) in config.targets.iter().enumerate() {
        println!("  {}. {} ({})", i + 1, t.name, t.describe_environment());
    }
    let answer = Text::new("Targets to remove (e.g. 1,3 or all):").prompt()?;
    let indices = parse_selection(&answer, config.targets.len())?;
    let names: Vec<String> = indices
        .iter()
        .map(|&i| config.targets[i].name.clone())
        .collect();
    remove_by_name(config_path, &names)
}

fn remove_with_list(config_path: &Path) -> Result<()> {
    let config = CiConfig::load(config_path)?;
    if config.targets.is_empty() {
        println!("{} No targets configured", "!".yellow());
        return Ok(());
    }
    let names = MultiSelect::new("Select targets to remove:", config.target_names())
        .prompt()
        .map_err(|e| anyhow!("Selection cancelled: {}", e))?;
    if names.is_empty() {
        println!("{} Nothing selected", "ℹ".blue());
        return Ok(());
    }
    remove_by_name(config_path, &names)
}

fn list_targets(config_path: &Path) -> Result<()> {
    let config = CiConfig::load(config_path)?;
    println!("{} {}", "🎯".cyan(), "CI Targets".bold());
    println!("{}", "─".repeat(50).dimmed());
    if config.targets.is_empty() {
        println!("   (none) run {} to add one", "xc ci add-target".cyan());
        return Ok(());
    }
    for t in &config.targets {
        let name = if t.is_active() {
            t.name.green().bold()
        } else {
            t.name.dimmed()
        };
        let status = if t.is_active() { "" } else { " [inactive]" };
        println!(
            "   {} - {} {}{}",
            name,
            t.runner,
            t.describe_environment(),
            status.yellow()
        );
    }
    println!();
    println!("Output: {}", config.output.cyan());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_target_name() {
        let existing = vec!["linux-amd64".to_string()];
        assert!(check_target_name("linux_arm64", &existing).is_ok());
        assert!(check_target_name("linux-amd64", &existing).is_err());
        assert!(check_target_name("linux/arm64", &existing).is_err());
        assert!(check_target_name("  ", &existing).is_err());
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("1,3", 3).unwrap(), vec![0, 2]);
        assert_eq!(parse_selection(" 3 , 1, 3 ", 3).unwrap(), vec![0, 2]);
        assert_eq!(parse_selection("ALL", 2).unwrap(), vec![0, 1]);
        assert!(parse_selection("4", 3).is_err());
        assert!(parse_selection("0", 3).is_err());
        assert!(parse_selection("x", 3).is_err());
        assert!(parse_selection("", 3).is_err());
    }

    #[test]
    fn test_remove_by_name_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xc-ci.toml");
        std::fs::write(
            &path,
            "[[targets]]\nname = \"a\"\nrunner = \"native\"\n\n[[targets]]\nname = \"b\"\nrunner = \"native\"\n",
        )
        .unwrap();

        remove_by_name(&path, &["a".to_string(), "nope".to_string()]).unwrap();
        let config = CiConfig::load(&path).unwrap();
        assert_eq!(config.target_names(), vec!["b"]);
    }
}
