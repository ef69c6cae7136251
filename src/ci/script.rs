//! Build script generation.
//!
//! Every function here is pure string construction. The scripts run inside the
//! resolved container with the project mounted read-only at [`WORKSPACE`] and
//! the target's persistent cache mounted at a fixed path, so rerunning a
//! script against an already-configured cache skips straight to the build.

use std::collections::BTreeMap;

use super::artifacts;
use super::dispatch::ProjectKind;
use crate::config::EffectiveSettings;

pub const WORKSPACE: &str = "/workspace";
pub const OUTPUT_ROOT: &str = "/output";
pub const CMAKE_BUILD_DIR: &str = "/tmp/build";
pub const PKG_CACHE: &str = "/tmp/.pkg_cache";
pub const BAZEL_OUTPUT_BASE: &str = "/bazel-cache";
pub const BAZEL_REPO_CACHE: &str = "/bazel-repo-cache";
pub const MESON_BUILD_DIR: &str = "/tmp/builddir";

/// Present once a Ninja-generating configure step has completed.
pub const CONFIGURED_MARKER: &str = "build.ninja";

const VCPKG_TOOLCHAIN: &str = "/opt/vcpkg/scripts/buildsystems/vcpkg.cmake";

/// Single-quotes `s` for POSIX shells.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn join_quoted(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `export` lines for the target's environment, in key order.
pub fn env_exports(env: &BTreeMap<String, String>) -> String {
    if env.is_empty() {
        return String::new();
    }
    let mut out = String::from("# Target environment\n");
    for (k, v) in env {
        out.push_str(&format!("export {}={}\n", k, shell_quote(v)));
    }
    out
}

/// Output directory for a target as seen from inside the container.
pub fn container_output(target: &str) -> String {
    format!("{}/{}", OUTPUT_ROOT, target)
}

/// Arguments for the CMake configure step (without the `cmake` program).
pub fn cmake_configure_args(
    source_dir: &str,
    build_dir: &str,
    settings: &EffectiveSettings,
    toolchain_file: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "-G".to_string(),
        "Ninja".to_string(),
        "-B".to_string(),
        build_dir.to_string(),
        "-S".to_string(),
        source_dir.to_string(),
        format!("-DCMAKE_BUILD_TYPE={}", settings.build_type),
    ];
    if let Some(tc) = toolchain_file {
        args.push(format!("-DCMAKE_TOOLCHAIN_FILE={}", tc));
    }
    if !settings.optimization.is_empty() {
        args.push(format!("-DCMAKE_CXX_FLAGS=-O{}", settings.optimization));
    }
    args.extend(settings.cmake_args.iter().cloned());
    args
}

/// Arguments for the CMake build step (without the `cmake` program).
pub fn cmake_build_args(build_dir: &str, settings: &EffectiveSettings) -> Vec<String> {
    let mut args = vec![
        "--build".to_string(),
        build_dir.to_string(),
        "--config".to_string(),
        settings.build_type.clone(),
    ];
    if settings.jobs > 0 {
        args.push("--parallel".into());
        args.push(settings.jobs.to_string());
    }
    args.extend(settings.build_args.iter().cloned());
    args
}

fn pkg_cache_exports() -> String {
    format!(
        r#"export VCPKG_ROOT=/opt/vcpkg
export PATH="${{VCPKG_ROOT}}:${{PATH}}"
export VCPKG_FEATURE_FLAGS=manifests
export VCPKG_DISABLE_REGISTRY_UPDATE=1
export VCPKG_DISABLE_METRICS=1
export VCPKG_KEEP_ENV_VARS="VCPKG_DISABLE_REGISTRY_UPDATE;VCPKG_FEATURE_FLAGS;VCPKG_INSTALLED_DIR;VCPKG_DOWNLOADS;VCPKG_BUILDTREES_ROOT;VCPKG_BINARY_SOURCES"
export VCPKG_INSTALLED_DIR={cache}/installed
export VCPKG_DOWNLOADS={cache}/downloads
export VCPKG_BUILDTREES_ROOT={cache}/buildtrees
export VCPKG_BINARY_SOURCES="files,{cache}/binary,readwrite"
mkdir -p "$VCPKG_INSTALLED_DIR" "$VCPKG_DOWNLOADS" "$VCPKG_BUILDTREES_ROOT" {cache}/binary
"#,
        cache = PKG_CACHE
    )
}

/// Skips `configure` when `build_dir` already holds a configured tree.
fn guarded_configure(build_dir: &str, configure: &str, label: &str) -> String {
    format!(
        r#"if [ -f {build_dir}/{CONFIGURED_MARKER} ]; then
    echo "  Build directory already configured, skipping setup."
else
    echo "  Configuring {label}..."
    {configure}
fi
"#
    )
}

/// Locates and runs the project's main binary after a CMake build.
fn run_after_build(target: &str, project: &str) -> String {
    let out = container_output(target);
    let build = CMAKE_BUILD_DIR;
    format!(
        r#"
echo ""
echo "  Running {project}..."
EXEC_PATH=""
if [ -x "{out}/{project}" ]; then
    EXEC_PATH="{out}/{project}"
elif [ -x "{build}/{project}" ]; then
    EXEC_PATH="{build}/{project}"
else
    for f in $(find {build} -maxdepth 3 -type f -executable ! -name "*_test*" ! -name "*_bench*" \
            ! -name "*.a" ! -name "*.so" ! -name "a.out" ! -path "*/CMakeFiles/*" 2>/dev/null | head -5); do
        if file "$f" 2>/dev/null | grep -qE "ELF.*(executable|pie)"; then
            EXEC_PATH="$f"
            break
        fi
    done
fi
if [ -n "$EXEC_PATH" ]; then
    echo "  Executing: $EXEC_PATH"
    echo "----------------------------------------"
    EXIT_CODE=0
    "$EXEC_PATH" || EXIT_CODE=$?
    echo "----------------------------------------"
    echo "  Process exited with code: $EXIT_CODE"
else
    echo "  No executable found to run"
    echo "  Searched for: {project} in {out} and {build}"
fi
"#
    )
}

/// Configure, build and stage a CMake + vcpkg project. `run_project` appends
/// the build-then-run step for a binary of that name.
pub fn cmake_script(
    target: &str,
    env: &BTreeMap<String, String>,
    settings: &EffectiveSettings,
    kind: ProjectKind,
    run_project: Option<&str>,
) -> String {
    let mut configure_args =
        cmake_configure_args(WORKSPACE, CMAKE_BUILD_DIR, settings, Some(VCPKG_TOOLCHAIN));
    configure_args.push("-DVCPKG_DISABLE_REGISTRY_UPDATE=ON".into());
    let configure = format!("cmake {}", join_quoted(&configure_args));
    let build = format!("cmake {}", join_quoted(&cmake_build_args(CMAKE_BUILD_DIR, settings)));
    let out = container_output(target);

    let mut script = String::from("#!/bin/bash\nset -e\n");
    script.push_str(&env_exports(env));
    script.push_str(&pkg_cache_exports());
    script.push('\n');
    script.push_str(&guarded_configure(CMAKE_BUILD_DIR, &configure, "CMake (Ninja)"));
    script.push_str(&format!("\necho \"  Building...\"\n{build}\n"));
    script.push_str(&format!("\necho \"  Copying artifacts...\"\nmkdir -p {out}\n"));
    script.push_str(&artifacts::cmake_copy_snippet(CMAKE_BUILD_DIR, &out, kind));
    script.push_str("\necho \"  Build complete!\"\n");
    if let Some(project) = run_project {
        script.push_str(&run_after_build(target, project));
    }
    script
}

/// Builds every Bazel target with the output base and repository cache kept
/// on mounted volumes, then stages the final outputs.
pub fn bazel_script(
    target: &str,
    env: &BTreeMap<String, String>,
    settings: &EffectiveSettings,
) -> String {
    let out = container_output(target);
    let mut build = vec![
        "build".to_string(),
        format!("--config={}", settings.profile()),
        "--symlink_prefix=/dev/null".to_string(),
        "--spawn_strategy=local".to_string(),
        format!("--repository_cache={}", BAZEL_REPO_CACHE),
    ];
    if settings.jobs > 0 {
        build.push(format!("--jobs={}", settings.jobs));
    }
    build.extend(settings.build_args.iter().cloned());
    build.push("//...".into());

    let mut script = String::from("#!/bin/bash\nset -e\n");
    script.push_str(&env_exports(env));
    script.push_str(&format!(
        r#"export HOME=/root
echo "  Building with Bazel..."
bazel --output_base={BAZEL_OUTPUT_BASE} {build}

echo "  Copying artifacts..."
mkdir -p {out}
"#,
        build = join_quoted(&build)
    ));
    script.push_str(&artifacts::bazel_copy_snippet(BAZEL_OUTPUT_BASE, &out));
    script.push_str("\necho \"  Build complete!\"\n");
    script
}

/// Configures Meson into the persistent build directory once, then compiles.
pub fn meson_script(
    target: &str,
    env: &BTreeMap<String, String>,
    settings: &EffectiveSettings,
) -> String {
    let out = container_output(target);
    let mut setup = vec![
        "setup".to_string(),
        MESON_BUILD_DIR.to_string(),
        format!("--buildtype={}", settings.profile()),
    ];
    setup.extend(settings.meson_args.iter().cloned());
    let setup = format!("meson {}", join_quoted(&setup));

    let mut compile = format!("meson compile -C {}", MESON_BUILD_DIR);
    if settings.jobs > 0 {
        compile.push_str(&format!(" -j {}", settings.jobs));
    }

    let mut script = String::from("#!/bin/bash\nset -e\n");
    script.push_str(&env_exports(env));
    script.push_str(&format!("mkdir -p {MESON_BUILD_DIR}\n"));
    script.push_str(&guarded_configure(MESON_BUILD_DIR, &setup, "Meson"));
    script.push_str(&format!("\necho \"  Building...\"\n{compile}\n"));
    script.push_str(&format!("\necho \"  Copying artifacts...\"\nmkdir -p {out}\n"));
    script.push_str(&artifacts::meson_copy_snippet(MESON_BUILD_DIR, &out));
    script.push_str("\necho \"  Build complete!\"\n");
    script
}
