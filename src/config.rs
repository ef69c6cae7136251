//! Target configuration (`xc-ci.toml`).
//!
//! The file is loaded and saved as a whole document:
//!
//! ```toml
//! output = ".bin/ci"
//!
//! [build]
//! type = "Release"
//! optimization = "2"
//! jobs = 8
//!
//! [[targets]]
//! name = "linux-arm64"
//! runner = "docker"
//!
//! [targets.docker]
//! mode = "build"
//! image = "linux-arm64"
//! platform = "linux/arm64"
//!
//! [targets.docker.build]
//! dockerfile = "docker/Dockerfile.linux-arm64"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::ci::CiError;

pub const CONFIG_FILE: &str = "xc-ci.toml";
pub const DEFAULT_OUTPUT: &str = ".bin/ci";
const DEFAULT_BUILD_TYPE: &str = "Release";
const DEFAULT_OPTIMIZATION: &str = "2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiConfig {
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default)]
    pub build: BuildDefaults,
    #[serde(default)]
    pub targets: Vec<CiTarget>,
}

/// Global build defaults. Targets override these field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDefaults {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<String>,
    /// Parallel job count handed to the build tool (0 = tool default).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub jobs: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmake_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meson_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiTarget {
    pub name: String,
    #[serde(default)]
    pub runner: Runner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmake_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_options: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runner {
    #[default]
    #[serde(alias = "container")]
    Docker,
    Native,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    pub mode: DockerMode,
    /// Image reference for `pull`/`local`; a human label for `build`.
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<DockerBuildConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockerMode {
    Pull,
    Local,
    Build,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PullPolicy {
    Always,
    Never,
    #[default]
    #[serde(alias = "if_not_present", alias = "ifnotpresent")]
    IfNotPresent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerBuildConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub dockerfile: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

/// Per-target view of the build settings after applying overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub build_type: String,
    pub optimization: String,
    pub jobs: u32,
    pub cmake_args: Vec<String>,
    pub build_args: Vec<String>,
    pub meson_args: Vec<String>,
}

impl EffectiveSettings {
    /// Lower-case profile name used by Bazel configs and Meson build types.
    pub fn profile(&self) -> &'static str {
        if self.build_type.eq_ignore_ascii_case("debug") {
            "debug"
        } else {
            "release"
        }
    }
}

/// Target names become path components, image tags and shell words, so they
/// are limited to ASCII letters, digits, `-` and `_`.
pub fn is_valid_target_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            build: BuildDefaults {
                build_type: Some(DEFAULT_BUILD_TYPE.to_string()),
                optimization: Some(DEFAULT_OPTIMIZATION.to_string()),
                ..Default::default()
            },
            targets: Vec::new(),
        }
    }
}

impl CiConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CiError::ConfigNotFound(path.to_path_buf()).into());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Loads the file, or starts a fresh document when it does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: CiConfig = toml::from_str(content)?;
        config.check_targets()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize target config")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn find_target(&self, name: &str) -> Option<&CiTarget> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn add_target(&mut self, target: CiTarget) -> Result<()> {
        if self.find_target(&target.name).is_some() {
            return Err(CiError::DuplicateTarget(target.name).into());
        }
        self.targets.push(target);
        Ok(())
    }

    /// Removes every target whose name is listed. Returns the removed names in
    /// config order; names that match nothing are ignored.
    pub fn remove_targets<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<String> {
        let mut removed = Vec::new();
        self.targets.retain(|t| {
            if names.iter().any(|n| n.as_ref() == t.name) {
                removed.push(t.name.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    /// Applies per-target overrides on top of the global defaults.
    pub fn effective_settings(&self, target: &CiTarget) -> EffectiveSettings {
        let build_type = target
            .build_type
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.build.build_type.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| DEFAULT_BUILD_TYPE.to_string());

        let optimization = self
            .build
            .optimization
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_OPTIMIZATION.to_string());

        let cmake_args = if target.cmake_options.is_empty() {
            self.build.cmake_args.clone()
        } else {
            target.cmake_options.clone()
        };
        let build_args = if target.build_options.is_empty() {
            self.build.build_args.clone()
        } else {
            target.build_options.clone()
        };

        EffectiveSettings {
            build_type,
            optimization,
            jobs: self.build.jobs,
            cmake_args,
            build_args,
            meson_args: self.build.meson_args.clone(),
        }
    }

    fn check_targets(&self) -> Result<(), CiError> {
        let mut seen = std::collections::BTreeSet::new();
        for t in &self.targets {
            if !is_valid_target_name(&t.name) {
                return Err(CiError::InvalidTargetName(t.name.clone()));
            }
            if let Some(key) = t.env.keys().find(|k| !is_valid_env_key(k)) {
                return Err(CiError::InvalidEnvKey {
                    target: t.name.clone(),
                    key: key.clone(),
                });
            }
            if !seen.insert(t.name.as_str()) {
                return Err(CiError::DuplicateTarget(t.name.clone()));
            }
        }
        Ok(())
    }
}

impl CiTarget {
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }

    /// Checks the descriptor invariants that must hold before any build work.
    pub fn validate(&self) -> Result<(), CiError> {
        if self.runner == Runner::Docker {
            let docker = self
                .docker
                .as_ref()
                .ok_or_else(|| CiError::MissingContainer(self.name.clone()))?;
            match docker.mode {
                DockerMode::Build => match &docker.build {
                    Some(b) if !b.dockerfile.trim().is_empty() => {}
                    _ => return Err(CiError::MissingBuildSpec(self.name.clone())),
                },
                DockerMode::Pull | DockerMode::Local if docker.image.trim().is_empty() => {
                    return Err(CiError::MissingImage(self.name.clone()));
                }
                DockerMode::Pull | DockerMode::Local => {}
            }
        }
        Ok(())
    }

    pub fn platform(&self) -> Option<&str> {
        self.docker.as_ref().and_then(|d| d.platform.as_deref())
    }

    /// Short description for listings, e.g. `build linux-arm64 (linux/arm64)`.
    pub fn describe_environment(&self) -> String {
        match (&self.runner, &self.docker) {
            (Runner::Native, _) => "host".to_string(),
            (Runner::Docker, None) => "docker (unconfigured)".to_string(),
            (Runner::Docker, Some(d)) => {
                let mode = match d.mode {
                    DockerMode::Pull => "pull",
                    DockerMode::Local => "local",
                    DockerMode::Build => "build",
                };
                match &d.platform {
                    Some(p) => format!("{} {} ({})", mode, d.image, p),
                    None => format!("{} {}", mode, d.image),
                }
            }
        }
    }
}

impl std::fmt::Display for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Runner::Docker => write!(f, "docker"),
            Runner::Native => write!(f, "native"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str) -> CiTarget {
        CiTarget {
            name: name.to_string(),
            runner: Runner::Native,
            build_type: None,
            active: None,
            cmake_options: vec![],
            build_options: vec![],
            env: BTreeMap::new(),
            docker: None,
        }
    }

    #[test]
    fn test_parse_full_document() {
        let toml_str = r#"
output = "dist"

[build]
type = "Debug"
optimization = "3"
jobs = 4
cmake_args = ["-DFOO=ON"]

[[targets]]
name = "linux-arm64"
runner = "docker"
active = false

[targets.env]
CC = "clang"

[targets.docker]
mode = "build"
image = "arm64"
platform = "linux/arm64"
pull_policy = "never"

[targets.docker.build]
dockerfile = "Dockerfile.arm64"

[targets.docker.build.args]
GCC = "13"
"#;
        let config = CiConfig::parse(toml_str).unwrap();
        assert_eq!(config.output, "dist");
        assert_eq!(config.build.jobs, 4);
        let t = &config.targets[0];
        assert!(!t.is_active());
        assert_eq!(t.env.get("CC").map(String::as_str), Some("clang"));
        let docker = t.docker.as_ref().unwrap();
        assert_eq!(docker.mode, DockerMode::Build);
        assert_eq!(docker.pull_policy, PullPolicy::Never);
        assert_eq!(docker.build.as_ref().unwrap().args["GCC"], "13");
    }

    #[test]
    fn test_defaults_when_keys_missing() {
        let config = CiConfig::parse("[[targets]]\nname = \"a\"\n[targets.docker]\nmode = \"pull\"\nimage = \"ubuntu\"\n").unwrap();
        assert_eq!(config.output, DEFAULT_OUTPUT);
        let t = &config.targets[0];
        assert_eq!(t.runner, Runner::Docker);
        assert!(t.is_active());
        assert_eq!(t.docker.as_ref().unwrap().pull_policy, PullPolicy::IfNotPresent);
    }

    #[test]
    fn test_container_alias_and_pull_policy_spelling() {
        let config = CiConfig::parse(
            "[[targets]]\nname = \"a\"\nrunner = \"container\"\n[targets.docker]\nmode = \"pull\"\nimage = \"x\"\npull_policy = \"ifNotPresent\"\n",
        )
        .unwrap();
        assert_eq!(config.targets[0].runner, Runner::Docker);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = CiConfig::parse("[[targets]]\nname = \"a\"\n[targets.docker]\nmode = \"teleport\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = CiConfig::parse("[[targets]]\nname = \"a\"\nrunner = \"native\"\n[[targets]]\nname = \"a\"\nrunner = \"native\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_path_like_target_name_rejected() {
        for name in ["../../outside", "a/b", "a b", "a;rm", ""] {
            let doc = format!("[[targets]]\nname = {:?}\nrunner = \"native\"\n", name);
            let err = CiConfig::parse(&doc).unwrap_err();
            let ci = err.downcast_ref::<CiError>().unwrap();
            assert!(matches!(ci, CiError::InvalidTargetName(_)), "{name}");
            assert_eq!(ci.category(), crate::ci::ErrorCategory::Configuration);
        }
        assert!(CiConfig::parse("[[targets]]\nname = \"linux_arm-64\"\nrunner = \"native\"\n").is_ok());
    }

    #[test]
    fn test_env_keys_must_be_shell_names() {
        let doc = "[[targets]]\nname = \"a\"\nrunner = \"native\"\n[targets.env]\n\"X=1; touch /tmp/x; Y\" = \"v\"\n";
        let err = CiConfig::parse(doc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CiError>(),
            Some(CiError::InvalidEnvKey { .. })
        ));

        assert!(is_valid_env_key("CC"));
        assert!(is_valid_env_key("_PRIVATE_2"));
        assert!(!is_valid_env_key("2FAST"));
        assert!(!is_valid_env_key("A-B"));
        assert!(!is_valid_env_key(""));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = CiConfig::default();
        let mut t = target("linux-amd64");
        t.runner = Runner::Docker;
        t.env.insert("CXX".into(), "g++".into());
        t.docker = Some(DockerConfig {
            mode: DockerMode::Pull,
            image: "ghcr.io/acme/gcc:13".into(),
            platform: Some("linux/amd64".into()),
            pull_policy: PullPolicy::Always,
            build: None,
        });
        config.add_target(t).unwrap();
        config.add_target(target("host")).unwrap();
        config.save(&path).unwrap();

        let loaded = CiConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CiConfig::load(&dir.path().join(CONFIG_FILE)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CiError>(),
            Some(CiError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut config = CiConfig::default();
        for n in ["a", "b", "c"] {
            config.add_target(target(n)).unwrap();
        }
        let removed = config.remove_targets(&["b"]);
        assert_eq!(removed, vec!["b"]);
        assert_eq!(config.target_names(), vec!["a", "c"]);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut config = CiConfig::default();
        for n in ["a", "b", "c"] {
            config.add_target(target(n)).unwrap();
        }
        let removed = config.remove_targets(&["zzz"]);
        assert!(removed.is_empty());
        assert_eq!(config.target_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut config = CiConfig::default();
        config.add_target(target("a")).unwrap();
        assert!(config.add_target(target("a")).is_err());
    }

    #[test]
    fn test_effective_settings_override_field_by_field() {
        let mut config = CiConfig::default();
        config.build.cmake_args = vec!["-DGLOBAL=ON".into()];
        config.build.build_args = vec!["--verbose".into()];
        config.build.jobs = 6;

        let mut t = target("a");
        t.build_type = Some("Debug".into());
        t.cmake_options = vec!["-DLOCAL=ON".into()];

        let s = config.effective_settings(&t);
        assert_eq!(s.build_type, "Debug");
        assert_eq!(s.profile(), "debug");
        assert_eq!(s.cmake_args, vec!["-DLOCAL=ON"]);
        // no per-target build options, so the global list applies whole
        assert_eq!(s.build_args, vec!["--verbose"]);
        assert_eq!(s.jobs, 6);
    }

    #[test]
    fn test_effective_settings_fallbacks() {
        let config = CiConfig {
            output: DEFAULT_OUTPUT.into(),
            build: BuildDefaults::default(),
            targets: vec![],
        };
        let s = config.effective_settings(&target("a"));
        assert_eq!(s.build_type, "Release");
        assert_eq!(s.optimization, "2");
        assert_eq!(s.profile(), "release");
    }

    #[test]
    fn test_validate_container_requirements() {
        let mut t = target("a");
        t.runner = Runner::Docker;
        assert!(matches!(t.validate(), Err(CiError::MissingContainer(_))));

        t.docker = Some(DockerConfig {
            mode: DockerMode::Build,
            image: "label".into(),
            platform: None,
            pull_policy: PullPolicy::default(),
            build: None,
        });
        assert!(matches!(t.validate(), Err(CiError::MissingBuildSpec(_))));

        t.docker.as_mut().unwrap().build = Some(DockerBuildConfig {
            dockerfile: "Dockerfile".into(),
            ..Default::default()
        });
        assert!(t.validate().is_ok());

        let docker = t.docker.as_mut().unwrap();
        docker.mode = DockerMode::Pull;
        docker.image = " ".into();
        assert!(matches!(t.validate(), Err(CiError::MissingImage(_))));
        t.docker.as_mut().unwrap().mode = DockerMode::Local;
        assert!(matches!(t.validate(), Err(CiError::MissingImage(_))));
        t.docker.as_mut().unwrap().image = "acme/gcc:13".into();
        assert!(t.validate().is_ok());

        // native targets never need a container descriptor
        assert!(target("b").validate().is_ok());
    }
}
