use std::path::PathBuf;
use thiserror::Error;

/// Where a failure sits in the pipeline. Every category is fatal for the
/// target it happens in; the orchestrator aborts the run on the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Environment,
    Build,
    Artifact,
}

#[derive(Debug, Error)]
pub enum CiError {
    #[error(
        "{} not found.\n\n💡 Tip: Run 'xc ci add-target' to create one.",
        .0.display()
    )]
    ConfigNotFound(PathBuf),

    #[error("target '{0}' not found in xc-ci.toml")]
    TargetNotFound(String),

    #[error("target '{0}' is defined more than once")]
    DuplicateTarget(String),

    #[error("no active targets defined in xc-ci.toml")]
    NoActiveTargets,

    #[error("invalid target name '{0}': use only letters, numbers, '-' and '_'")]
    InvalidTargetName(String),

    #[error("target '{target}' has invalid env key '{key}': expected a shell variable name")]
    InvalidEnvKey { target: String, key: String },

    #[error("target '{0}' uses the docker runner but has no [targets.docker] section")]
    MissingContainer(String),

    #[error("target '{0}' uses mode = \"build\" but has no [targets.docker.build] dockerfile")]
    MissingBuildSpec(String),

    #[error("target '{0}' needs a non-empty docker image for pull and local modes")]
    MissingImage(String),

    #[error("failed to read Dockerfile {}: {source}", path.display())]
    DockerfileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image {0} not found locally and pull_policy is 'never'")]
    ImageNotPresent(String),

    #[error("local image {0} not found. Use 'docker pull' or 'docker build' to create it")]
    LocalImageMissing(String),

    #[error("`{command}` failed: {status}")]
    EngineFailed { command: String, status: String },

    #[error("could not start `{command}`: {source}")]
    EngineUnavailable {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache for target '{target}' is locked by another process: {holder}")]
    CacheLocked { target: String, holder: String },

    #[error("{step} failed: {status}")]
    BuildStep { step: String, status: String },

    #[error("failed to create {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CiError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CiError::ConfigNotFound(_)
            | CiError::TargetNotFound(_)
            | CiError::DuplicateTarget(_)
            | CiError::NoActiveTargets
            | CiError::InvalidTargetName(_)
            | CiError::InvalidEnvKey { .. }
            | CiError::MissingContainer(_)
            | CiError::MissingImage(_)
            | CiError::MissingBuildSpec(_) => ErrorCategory::Configuration,
            CiError::DockerfileUnreadable { .. }
            | CiError::ImageNotPresent(_)
            | CiError::LocalImageMissing(_)
            | CiError::EngineFailed { .. }
            | CiError::EngineUnavailable { .. }
            | CiError::CacheLocked { .. } => ErrorCategory::Environment,
            CiError::BuildStep { .. } => ErrorCategory::Build,
            CiError::OutputDir { .. } => ErrorCategory::Artifact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            CiError::MissingBuildSpec("a".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            CiError::ImageNotPresent("img".into()).category(),
            ErrorCategory::Environment
        );
        assert_eq!(
            CiError::BuildStep {
                step: "cmake configure".into(),
                status: "exit status: 1".into()
            }
            .category(),
            ErrorCategory::Build
        );
    }

    #[test]
    fn test_messages_name_the_subject() {
        let msg = CiError::LocalImageMissing("acme/gcc:13".into()).to_string();
        assert!(msg.contains("acme/gcc:13"));
        let msg = CiError::TargetNotFound("linux-riscv".into()).to_string();
        assert!(msg.contains("linux-riscv"));
    }
}
