//! Build strategies.
//!
//! The orchestrator drives every target through the same four steps;
//! each [`Strategy`] supplies its own implementation of them.

use colored::*;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::CiError;
use super::artifacts;
use super::cache::{self, CacheLayout};
use super::dispatch::{self, Strategy};
use super::engine::{ContainerEngine, Mount, RunSpec};
use super::resolver;
use super::script;
use crate::config::{CiTarget, EffectiveSettings};

/// Everything a strategy needs to know about the target it is building.
#[derive(Debug, Clone)]
pub struct TargetContext<'a> {
    pub target: &'a CiTarget,
    pub settings: EffectiveSettings,
    pub project_root: PathBuf,
    /// Used to find the binary for build-then-run.
    pub project_name: String,
    /// Absolute output root; the target writes to `<root>/<name>`.
    pub output_root: PathBuf,
    pub layout: CacheLayout,
    pub force_refresh: bool,
    pub run_after_build: bool,
}

impl TargetContext<'_> {
    pub fn output_dir(&self) -> PathBuf {
        self.output_root.join(&self.target.name)
    }
}

pub trait BuildStrategy {
    fn kind(&self) -> Strategy;

    /// Makes the build environment available (image pulled or built, host
    /// toolchain assumed).
    fn resolve_environment(&mut self, ctx: &TargetContext) -> Result<(), CiError>;

    /// Prepares the configured build tree. Skipped when already configured.
    fn configure(&mut self, ctx: &TargetContext) -> Result<(), CiError>;

    fn build(&mut self, ctx: &TargetContext) -> Result<(), CiError>;

    /// Stages outputs into the target's output directory and returns them.
    fn collect_artifacts(&mut self, ctx: &TargetContext) -> Result<Vec<PathBuf>, CiError>;

    /// Launches the primary binary once the build is done.
    fn run_primary(&mut self, _ctx: &TargetContext) -> Result<(), CiError> {
        println!(
            "  {} Run after build is not supported for {} projects; build only",
            "!".yellow(),
            self.kind()
        );
        Ok(())
    }
}

/// Picks the strategy for a target from its runner and the project markers.
pub fn for_target<'e>(
    target: &CiTarget,
    project_root: &Path,
    engine: &'e dyn ContainerEngine,
) -> Box<dyn BuildStrategy + 'e> {
    let kind = dispatch::classify(target.runner, dispatch::ProjectMarkers::probe(project_root));
    tracing::debug!(target = %target.name, strategy = %kind, "selected build strategy");
    match kind {
        Strategy::CMake => Box::new(CmakeContainer::new(engine)),
        Strategy::Bazel => Box::new(BazelContainer::new(engine)),
        Strategy::Meson => Box::new(MesonContainer::new(engine)),
        Strategy::NativeCMake => Box::new(NativeCmake),
    }
}

/// A one-shot container that runs a generated build script.
struct ContainerRun<'e> {
    engine: &'e dyn ContainerEngine,
    image: Option<String>,
    mounts: Vec<Mount>,
    script: String,
}

impl<'e> ContainerRun<'e> {
    fn new(engine: &'e dyn ContainerEngine) -> Self {
        Self {
            engine,
            image: None,
            mounts: Vec::new(),
            script: String::new(),
        }
    }

    fn resolve(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        let image =
            resolver::resolve_image(ctx.target, &ctx.project_root, ctx.force_refresh, self.engine)?;
        self.image = Some(image);
        Ok(())
    }

    /// Source read-only at `/workspace`, the output root at `/output`, plus
    /// the strategy's own cache mounts. The target's output directory is
    /// created on the host first.
    fn mount(&mut self, ctx: &TargetContext, extra: Vec<Mount>) -> Result<(), CiError> {
        cache::create_dir(&ctx.output_dir())?;
        self.mounts = vec![
            Mount::ro(&ctx.project_root, script::WORKSPACE),
            Mount::rw(&ctx.output_root, script::OUTPUT_ROOT),
        ];
        self.mounts.extend(extra);
        Ok(())
    }

    fn execute(&self, ctx: &TargetContext, kind: Strategy) -> Result<(), CiError> {
        let image = self
            .image
            .clone()
            .ok_or_else(|| CiError::MissingContainer(ctx.target.name.clone()))?;
        println!("  {} Building with {} in {}...", "🔨".cyan(), kind, image);
        let spec = RunSpec {
            image,
            platform: ctx.target.platform().map(str::to_string),
            mounts: self.mounts.clone(),
            workdir: script::WORKSPACE.to_string(),
            script: self.script.clone(),
        };
        self.engine.run(&spec).map_err(|e| match e {
            CiError::EngineFailed { status, .. } => CiError::BuildStep {
                step: format!("{} build", kind),
                status,
            },
            other => other,
        })
    }
}

fn staged(ctx: &TargetContext) -> Vec<PathBuf> {
    let files = artifacts::list_staged(&ctx.output_dir());
    if files.is_empty() {
        println!("  {} No artifacts were staged", "!".yellow());
    }
    files
}

pub struct CmakeContainer<'e> {
    run: ContainerRun<'e>,
}

impl<'e> CmakeContainer<'e> {
    pub fn new(engine: &'e dyn ContainerEngine) -> Self {
        Self {
            run: ContainerRun::new(engine),
        }
    }
}

impl BuildStrategy for CmakeContainer<'_> {
    fn kind(&self) -> Strategy {
        Strategy::CMake
    }

    fn resolve_environment(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        self.run.resolve(ctx)
    }

    fn configure(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        let build_dir = ctx.layout.ensure_build_dir()?;
        ctx.layout.ensure_pkg_cache()?;
        self.run.mount(
            ctx,
            vec![
                Mount::rw(build_dir, script::CMAKE_BUILD_DIR),
                Mount::rw(ctx.layout.pkg_cache_dir(), script::PKG_CACHE),
            ],
        )?;
        let kind = dispatch::detect_project_kind(&ctx.project_root);
        tracing::debug!(?kind, "detected CMake project kind");
        let run_project = ctx.run_after_build.then_some(ctx.project_name.as_str());
        self.run.script = script::cmake_script(
            &ctx.target.name,
            &ctx.target.env,
            &ctx.settings,
            kind,
            run_project,
        );
        Ok(())
    }

    fn build(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        self.run.execute(ctx, self.kind())
    }

    fn collect_artifacts(&mut self, ctx: &TargetContext) -> Result<Vec<PathBuf>, CiError> {
        Ok(staged(ctx))
    }

    /// The generated script already ran the binary.
    fn run_primary(&mut self, _ctx: &TargetContext) -> Result<(), CiError> {
        Ok(())
    }
}

pub struct BazelContainer<'e> {
    run: ContainerRun<'e>,
}

impl<'e> BazelContainer<'e> {
    pub fn new(engine: &'e dyn ContainerEngine) -> Self {
        Self {
            run: ContainerRun::new(engine),
        }
    }
}

impl BuildStrategy for BazelContainer<'_> {
    fn kind(&self) -> Strategy {
        Strategy::Bazel
    }

    fn resolve_environment(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        self.run.resolve(ctx)
    }

    fn configure(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        let output_base = ctx.layout.ensure_build_dir()?;
        let repo_cache = ctx.layout.ensure_bazel_repo_cache()?;
        self.run.mount(
            ctx,
            vec![
                Mount::rw(output_base, script::BAZEL_OUTPUT_BASE),
                Mount::rw(repo_cache, script::BAZEL_REPO_CACHE),
            ],
        )?;
        self.run.script = script::bazel_script(&ctx.target.name, &ctx.target.env, &ctx.settings);
        Ok(())
    }

    fn build(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        self.run.execute(ctx, self.kind())
    }

    fn collect_artifacts(&mut self, ctx: &TargetContext) -> Result<Vec<PathBuf>, CiError> {
        Ok(staged(ctx))
    }
}

pub struct MesonContainer<'e> {
    run: ContainerRun<'e>,
}

impl<'e> MesonContainer<'e> {
    pub fn new(engine: &'e dyn ContainerEngine) -> Self {
        Self {
            run: ContainerRun::new(engine),
        }
    }
}

impl BuildStrategy for MesonContainer<'_> {
    fn kind(&self) -> Strategy {
        Strategy::Meson
    }

    fn resolve_environment(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        self.run.resolve(ctx)
    }

    fn configure(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        let build_dir = ctx.layout.ensure_build_dir()?;
        let subprojects = ctx.layout.ensure_meson_subprojects()?;
        // wraps are downloaded into subprojects/, so it overlays the read-only source
        self.run.mount(
            ctx,
            vec![
                Mount::rw(subprojects, &format!("{}/subprojects", script::WORKSPACE)),
                Mount::rw(build_dir, script::MESON_BUILD_DIR),
            ],
        )?;
        self.run.script = script::meson_script(&ctx.target.name, &ctx.target.env, &ctx.settings);
        Ok(())
    }

    fn build(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        self.run.execute(ctx, self.kind())
    }

    fn collect_artifacts(&mut self, ctx: &TargetContext) -> Result<Vec<PathBuf>, CiError> {
        Ok(staged(ctx))
    }
}

/// Host CMake. The cache build directory doubles as the CMake binary dir.
pub struct NativeCmake;

/// Configure arguments for a host build, using vcpkg when `VCPKG_ROOT` is set.
pub fn native_configure_args(ctx: &TargetContext, vcpkg_root: Option<&Path>) -> Vec<String> {
    let toolchain = vcpkg_root
        .map(|root| root.join("scripts/buildsystems/vcpkg.cmake"))
        .filter(|tc| tc.is_file())
        .map(|tc| tc.display().to_string());
    script::cmake_configure_args(
        &ctx.project_root.display().to_string(),
        &ctx.layout.build_dir().display().to_string(),
        &ctx.settings,
        toolchain.as_deref(),
    )
}

pub fn native_build_args(ctx: &TargetContext) -> Vec<String> {
    script::cmake_build_args(&ctx.layout.build_dir().display().to_string(), &ctx.settings)
}

/// True once a previous run left a configured build tree behind.
pub fn is_configured(build_dir: &Path) -> bool {
    build_dir.join(script::CONFIGURED_MARKER).is_file()
}

fn run_step(step: &str, program: &str, args: &[String], ctx: &TargetContext) -> Result<(), CiError> {
    tracing::debug!(step, command = %format!("{} {}", program, args.join(" ")), "running build step");
    let status = Command::new(program)
        .args(args)
        .envs(&ctx.target.env)
        .current_dir(&ctx.project_root)
        .status()
        .map_err(|e| CiError::BuildStep {
            step: step.to_string(),
            status: format!("could not start {}: {}", program, e),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(CiError::BuildStep {
            step: step.to_string(),
            status: status.to_string(),
        })
    }
}

impl BuildStrategy for NativeCmake {
    fn kind(&self) -> Strategy {
        Strategy::NativeCMake
    }

    fn resolve_environment(&mut self, _ctx: &TargetContext) -> Result<(), CiError> {
        println!("  {} Building natively on the host", "✓".green());
        Ok(())
    }

    fn configure(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        let build_dir = ctx.layout.ensure_build_dir()?;
        if is_configured(&build_dir) {
            println!("  {} Build directory already configured, skipping setup", "✓".green());
            return Ok(());
        }
        println!("  {} Configuring CMake (Ninja)...", "⚙".cyan());
        let vcpkg_root = std::env::var_os("VCPKG_ROOT").map(PathBuf::from);
        run_step(
            "cmake configure",
            "cmake",
            &native_configure_args(ctx, vcpkg_root.as_deref()),
            ctx,
        )
    }

    fn build(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        println!("  {} Building...", "🔨".cyan());
        run_step("cmake build", "cmake", &native_build_args(ctx), ctx)
    }

    fn collect_artifacts(&mut self, ctx: &TargetContext) -> Result<Vec<PathBuf>, CiError> {
        let out = ctx.output_dir();
        cache::create_dir(&out)?;
        let kind = dispatch::detect_project_kind(&ctx.project_root);
        let files = artifacts::collect_native(&ctx.layout.build_dir(), &out, kind)
            .map_err(|source| CiError::OutputDir { path: out, source })?;
        if files.is_empty() {
            println!("  {} No artifacts were staged", "!".yellow());
        }
        Ok(files)
    }

    fn run_primary(&mut self, ctx: &TargetContext) -> Result<(), CiError> {
        let build_dir = ctx.layout.build_dir();
        let Some(exe) = artifacts::find_primary_binary(&ctx.output_dir(), &build_dir, &ctx.project_name)
        else {
            println!(
                "  {} No executable found to run (searched for {} in {} and {})",
                "!".yellow(),
                ctx.project_name,
                ctx.output_dir().display(),
                build_dir.display()
            );
            return Ok(());
        };
        println!("  {} Executing: {}", "▶".cyan(), exe.display());
        println!("{}", "─".repeat(40).dimmed());
        let status = Command::new(&exe)
            .envs(&ctx.target.env)
            .current_dir(&ctx.project_root)
            .status()
            .map_err(|e| CiError::BuildStep {
                step: format!("run {}", exe.display()),
                status: e.to_string(),
            })?;
        println!("{}", "─".repeat(40).dimmed());
        println!("  Process exited with code: {}", status.code().unwrap_or(-1));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::resolver::tests::FakeEngine;
    use crate::config::{DockerConfig, DockerMode, PullPolicy, Runner};
    use std::collections::BTreeMap;
    use std::fs;

    fn docker_target() -> CiTarget {
        CiTarget {
            name: "linux-amd64".into(),
            runner: Runner::Docker,
            build_type: None,
            active: None,
            cmake_options: vec![],
            build_options: vec![],
            env: BTreeMap::new(),
            docker: Some(DockerConfig {
                mode: DockerMode::Pull,
                image: "acme/gcc:13".into(),
                platform: Some("linux/amd64".into()),
                pull_policy: PullPolicy::IfNotPresent,
                build: None,
            }),
        }
    }

    fn context<'a>(target: &'a CiTarget, root: &Path) -> TargetContext<'a> {
        TargetContext {
            target,
            settings: crate::config::CiConfig::default().effective_settings(target),
            project_root: root.to_path_buf(),
            project_name: "demo".into(),
            output_root: root.join(".bin/ci"),
            layout: CacheLayout::new(root, &target.name),
            force_refresh: false,
            run_after_build: false,
        }
    }

    fn drive(strategy: &mut (dyn BuildStrategy + '_), ctx: &TargetContext) {
        strategy.resolve_environment(ctx).unwrap();
        strategy.configure(ctx).unwrap();
        strategy.build(ctx).unwrap();
        strategy.collect_artifacts(ctx).unwrap();
    }

    #[test]
    fn test_cmake_container_mounts_and_platform() {
        let dir = tempfile::tempdir().unwrap();
        let target = docker_target();
        let ctx = context(&target, dir.path());
        let engine = FakeEngine::default();

        let mut strategy = for_target(&target, dir.path(), &engine);
        assert_eq!(strategy.kind(), Strategy::CMake);
        drive(strategy.as_mut(), &ctx);

        let runs = engine.runs.borrow();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.image, "acme/gcc:13");
        assert_eq!(run.platform.as_deref(), Some("linux/amd64"));
        assert!(run.mounts.contains(&Mount::ro(dir.path(), "/workspace")));
        assert!(run.mounts.contains(&Mount::rw(ctx.layout.build_dir(), "/tmp/build")));
        assert!(run.mounts.contains(&Mount::rw(ctx.layout.pkg_cache_dir(), "/tmp/.pkg_cache")));
        assert!(run.script.contains("cmake --build /tmp/build"));
        assert!(ctx.output_dir().is_dir());
        for sub in ctx.layout.pkg_cache_subdirs() {
            assert!(sub.is_dir());
        }
    }

    #[test]
    fn test_bazel_marker_selects_bazel_mounts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("MODULE.bazel"), "module(name = \"demo\")").unwrap();
        let target = docker_target();
        let ctx = context(&target, dir.path());
        let engine = FakeEngine::default();

        let mut strategy = for_target(&target, dir.path(), &engine);
        assert_eq!(strategy.kind(), Strategy::Bazel);
        drive(strategy.as_mut(), &ctx);

        let run = &engine.runs.borrow()[0];
        assert!(run.mounts.contains(&Mount::rw(ctx.layout.bazel_repo_cache(), "/bazel-repo-cache")));
        assert!(run.script.contains("bazel --output_base=/bazel-cache"));
    }

    #[test]
    fn test_meson_mounts_subprojects() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("meson.build"), "project('demo', 'cpp')").unwrap();
        let target = docker_target();
        let ctx = context(&target, dir.path());
        let engine = FakeEngine::default();

        let mut strategy = for_target(&target, dir.path(), &engine);
        assert_eq!(strategy.kind(), Strategy::Meson);
        drive(strategy.as_mut(), &ctx);

        assert!(dir.path().join("subprojects").is_dir());
        let run = &engine.runs.borrow()[0];
        assert!(run.mounts.contains(&Mount::rw(dir.path().join("subprojects"), "/workspace/subprojects")));
    }

    #[test]
    fn test_container_run_failure_is_build_error() {
        struct FailingRun(FakeEngine);
        impl ContainerEngine for FailingRun {
            fn image_exists(&self, image: &str) -> bool {
                self.0.image_exists(image)
            }
            fn pull(&self, image: &str, platform: Option<&str>) -> Result<(), CiError> {
                self.0.pull(image, platform)
            }
            fn build(&self, spec: &crate::ci::engine::ImageBuild) -> Result<(), CiError> {
                self.0.build(spec)
            }
            fn build_legacy(&self, spec: &crate::ci::engine::ImageBuild) -> Result<(), CiError> {
                self.0.build_legacy(spec)
            }
            fn run(&self, _spec: &RunSpec) -> Result<(), CiError> {
                Err(CiError::EngineFailed {
                    command: "docker run".into(),
                    status: "exit status: 2".into(),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let target = docker_target();
        let ctx = context(&target, dir.path());
        let engine = FailingRun(FakeEngine::default());
        let mut strategy = CmakeContainer::new(&engine);
        strategy.resolve_environment(&ctx).unwrap();
        strategy.configure(&ctx).unwrap();
        let err = strategy.build(&ctx).unwrap_err();
        assert_eq!(err.category(), crate::ci::ErrorCategory::Build);
    }

    #[test]
    fn test_output_dir_conflict_is_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = docker_target();
        let ctx = context(&target, dir.path());
        fs::create_dir_all(&ctx.output_root).unwrap();
        fs::write(ctx.output_dir(), "not a directory").unwrap();
        let engine = FakeEngine::default();

        let mut strategy = CmakeContainer::new(&engine);
        strategy.resolve_environment(&ctx).unwrap();
        let err = strategy.configure(&ctx).unwrap_err();
        assert_eq!(err.category(), crate::ci::ErrorCategory::Artifact);
        assert!(engine.runs.borrow().is_empty());
    }

    #[test]
    fn test_native_args_and_guard() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = docker_target();
        target.runner = Runner::Native;
        target.docker = None;
        let ctx = context(&target, dir.path());

        let conf = native_configure_args(&ctx, None);
        assert_eq!(conf[0..2], ["-G", "Ninja"]);
        assert!(conf.contains(&ctx.layout.build_dir().display().to_string()));
        assert!(conf.contains(&"-DCMAKE_BUILD_TYPE=Release".to_string()));

        let build = native_build_args(&ctx);
        assert_eq!(build[0], "--build");

        let build_dir = ctx.layout.ensure_build_dir().unwrap();
        assert!(!is_configured(&build_dir));
        fs::write(build_dir.join("build.ninja"), "").unwrap();
        assert!(is_configured(&build_dir));

        // configured trees skip the configure step entirely
        NativeCmake.configure(&ctx).unwrap();
    }
}
