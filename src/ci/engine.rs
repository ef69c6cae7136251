//! Container engine access.
//!
//! Everything that talks to `docker` goes through [`ContainerEngine`] so the
//! resolver and strategies can be exercised without a daemon.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::CiError;

/// Environment variable selecting an alternative engine binary (e.g. `podman`).
pub const ENGINE_ENV: &str = "XC_CONTAINER_ENGINE";

#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuild {
    pub tag: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub platform: Option<String>,
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn rw(host: impl Into<PathBuf>, container: &str) -> Self {
        Self {
            host: host.into(),
            container: container.to_string(),
            read_only: false,
        }
    }

    pub fn ro(host: impl Into<PathBuf>, container: &str) -> Self {
        Self {
            read_only: true,
            ..Self::rw(host, container)
        }
    }

    fn to_arg(&self) -> String {
        let mut s = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            s.push_str(":ro");
        }
        s
    }
}

/// A throwaway container that runs one bash script.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub image: String,
    pub platform: Option<String>,
    pub mounts: Vec<Mount>,
    pub workdir: String,
    pub script: String,
}

pub trait ContainerEngine {
    fn image_exists(&self, image: &str) -> bool;
    fn pull(&self, image: &str, platform: Option<&str>) -> Result<(), CiError>;
    /// BuildKit build (`buildx build --load`).
    fn build(&self, spec: &ImageBuild) -> Result<(), CiError>;
    /// Classic builder, used when BuildKit is unavailable.
    fn build_legacy(&self, spec: &ImageBuild) -> Result<(), CiError>;
    fn run(&self, spec: &RunSpec) -> Result<(), CiError>;
}

/// Shells out to the docker CLI and streams its output.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    pub fn from_env() -> Self {
        match std::env::var(ENGINE_ENV) {
            Ok(p) if !p.trim().is_empty() => Self::new(p.trim()),
            _ => Self::default(),
        }
    }

    fn stream(&self, args: &[String]) -> Result<(), CiError> {
        let command = format!("{} {}", self.program, args.join(" "));
        tracing::debug!(%command, "running container engine");
        let status = Command::new(&self.program)
            .args(args)
            .status()
            .map_err(|source| CiError::EngineUnavailable {
                command: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(CiError::EngineFailed {
                command: short_command(&self.program, args),
                status: status.to_string(),
            })
        }
    }
}

impl ContainerEngine for DockerCli {
    fn image_exists(&self, image: &str) -> bool {
        let output = Command::new(&self.program)
            .args(["images", "-q", image])
            .stderr(Stdio::null())
            .output();
        let exists = matches!(output, Ok(out) if out.status.success() && !out.stdout.trim_ascii().is_empty());
        tracing::debug!(image, exists, "checked local image");
        exists
    }

    fn pull(&self, image: &str, platform: Option<&str>) -> Result<(), CiError> {
        self.stream(&pull_args(image, platform))
    }

    fn build(&self, spec: &ImageBuild) -> Result<(), CiError> {
        self.stream(&build_args(spec, true))
    }

    fn build_legacy(&self, spec: &ImageBuild) -> Result<(), CiError> {
        self.stream(&build_args(spec, false))
    }

    fn run(&self, spec: &RunSpec) -> Result<(), CiError> {
        self.stream(&run_args(spec))
    }
}

/// Error messages show the subcommand only; scripts can be hundreds of lines.
fn short_command(program: &str, args: &[String]) -> String {
    let sub: Vec<&str> = args
        .iter()
        .take_while(|a| !a.starts_with('-'))
        .map(String::as_str)
        .collect();
    format!("{} {}", program, sub.join(" "))
}

pub fn pull_args(image: &str, platform: Option<&str>) -> Vec<String> {
    let mut args = vec!["pull".to_string()];
    if let Some(p) = platform {
        args.push("--platform".into());
        args.push(p.to_string());
    }
    args.push(image.to_string());
    args
}

pub fn build_args(spec: &ImageBuild, buildkit: bool) -> Vec<String> {
    let mut args: Vec<String> = if buildkit {
        vec!["buildx".into(), "build".into()]
    } else {
        vec!["build".into()]
    };
    args.push("-f".into());
    args.push(spec.dockerfile.display().to_string());
    args.push("-t".into());
    args.push(spec.tag.clone());
    if let Some(p) = &spec.platform {
        args.push("--platform".into());
        args.push(p.clone());
    }
    for (k, v) in &spec.args {
        args.push("--build-arg".into());
        args.push(format!("{}={}", k, v));
    }
    if buildkit {
        args.push("--load".into());
    }
    args.push(spec.context.display().to_string());
    args
}

pub fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string()];
    if let Some(p) = &spec.platform {
        args.push("--platform".into());
        args.push(p.clone());
    }
    for m in &spec.mounts {
        args.push("-v".into());
        args.push(m.to_arg());
    }
    args.push("-w".into());
    args.push(spec.workdir.clone());
    args.push(spec.image.clone());
    args.push("bash".into());
    args.push("-c".into());
    args.push(spec.script.clone());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_build() -> ImageBuild {
        let mut args = BTreeMap::new();
        args.insert("UBUNTU".to_string(), "24.04".to_string());
        ImageBuild {
            tag: "xc/linux-arm64:abcdef012345".into(),
            dockerfile: PathBuf::from("/p/Dockerfile"),
            context: PathBuf::from("/p"),
            platform: Some("linux/arm64".into()),
            args,
        }
    }

    #[test]
    fn test_buildkit_args() {
        let args = build_args(&image_build(), true);
        assert_eq!(&args[..2], &["buildx", "build"]);
        assert!(args.contains(&"--load".to_string()));
        assert!(args.contains(&"UBUNTU=24.04".to_string()));
        assert_eq!(args.last().unwrap(), "/p");
    }

    #[test]
    fn test_legacy_args_have_no_load() {
        let args = build_args(&image_build(), false);
        assert_eq!(args[0], "build");
        assert!(!args.contains(&"--load".to_string()));
        assert!(args.contains(&"--platform".to_string()));
    }

    #[test]
    fn test_pull_args() {
        assert_eq!(pull_args("ubuntu:24.04", None), vec!["pull", "ubuntu:24.04"]);
        assert_eq!(
            pull_args("ubuntu:24.04", Some("linux/arm64")),
            vec!["pull", "--platform", "linux/arm64", "ubuntu:24.04"]
        );
    }

    #[test]
    fn test_run_args_mounts() {
        let spec = RunSpec {
            image: "img".into(),
            platform: None,
            mounts: vec![Mount::ro("/src", "/workspace"), Mount::rw("/out", "/output")],
            workdir: "/workspace".into(),
            script: "echo hi".into(),
        };
        let args = run_args(&spec);
        assert!(args.contains(&"/src:/workspace:ro".to_string()));
        assert!(args.contains(&"/out:/output".to_string()));
        assert_eq!(&args[args.len() - 3..], &["bash", "-c", "echo hi"]);
    }

    #[test]
    fn test_short_command_drops_flags_and_script() {
        let args = run_args(&RunSpec {
            image: "img".into(),
            platform: None,
            mounts: vec![],
            workdir: "/w".into(),
            script: "long script".into(),
        });
        assert_eq!(short_command("docker", &args), "docker run");
    }
}
