//! Artifact collection.
//!
//! Container builds stage their outputs from inside the container with the
//! `find` snippets below; native builds are scanned and copied here. Either way
//! only `<output>/<target>/` is written, and a build that produces nothing to
//! copy still succeeds.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::dispatch::ProjectKind;

const LIB_PATTERNS: &str = r#"\( -name "lib*.a" -o -name "lib*.so" -o -name "lib*.dylib" \)"#;

/// Executables and libraries from a CMake build tree, plus CTest results.
pub fn cmake_copy_snippet(build_dir: &str, out_dir: &str, kind: ProjectKind) -> String {
    let libs = format!(
        r#"find {build_dir} -maxdepth 2 -type f {LIB_PATTERNS} \
    ! -path "*/CMakeFiles/*" \
    -exec cp {{}} {out_dir}/ \; 2>/dev/null || true"#
    );
    if kind == ProjectKind::Library {
        return format!("# Libraries (static and shared)\n{libs}");
    }
    format!(
        r#"# Executables (skip CMake internals and scripts)
find {build_dir} -maxdepth 2 -type f -executable \
    ! -name "CMake*" ! -name "*.py" ! -name "*.sh" ! -name "*.sample" ! -name "a.out" \
    ! -name "*.cmake" ! -path "*/CMakeFiles/*" \
    -exec cp {{}} {out_dir}/ \; 2>/dev/null || true
# Libraries (static and shared)
{libs}
# CTest results
if [ -f {build_dir}/Testing/TAG ]; then
    mkdir -p {out_dir}/test_results
    cp -r {build_dir}/Testing/* {out_dir}/test_results/ 2>/dev/null || true
fi"#
    )
}

/// Final binaries and libraries from `bazel-bin`, skipping intermediates.
pub fn bazel_copy_snippet(output_base: &str, out_dir: &str) -> String {
    format!(
        r#"find "{output_base}" -path "*/bin/*" -type f -executable \
    ! -name "*.o" ! -name "*.d" ! -name "*.a" ! -name "*.so" ! -name "*.dylib" \
    ! -name "*.runfiles*" ! -name "*.params" ! -name "*.sh" ! -name "*.py" \
    ! -name "*.repo_mapping" ! -name "*.cppmap" ! -name "MANIFEST" \
    ! -name "*.pic.o" ! -name "*.pic.d" \
    -exec cp {{}} {out_dir}/ \; 2>/dev/null || true
find "{output_base}" -path "*/bin/*" -type f \( -name "lib*.a" -o -name "lib*.so" \) \
    ! -name "*.pic.a" \
    -exec cp {{}} {out_dir}/ \; 2>/dev/null || true"#
    )
}

/// Meson keeps executables next to their `meson.build` (usually `src/`).
pub fn meson_copy_snippet(build_dir: &str, out_dir: &str) -> String {
    format!(
        r#"if [ -d "{build_dir}/src" ]; then
    find {build_dir}/src -maxdepth 1 -type f -executable \
        ! -name "*.so" ! -name "*.dylib" ! -name "*.a" ! -name "*.p" ! -name "*_test" \
        -exec cp {{}} {out_dir}/ \; 2>/dev/null || true
fi
find {build_dir} -maxdepth 1 -type f -executable \
    ! -name "*.so" ! -name "*.dylib" ! -name "*.a" ! -name "*.p" ! -name "build.ninja" ! -name "*.json" \
    -exec cp {{}} {out_dir}/ \; 2>/dev/null || true
find {build_dir} -maxdepth 2 -type f \( -name "*.a" -o -name "*.so" -o -name "*.dylib" \) \
    -exec cp {{}} {out_dir}/ \; 2>/dev/null || true
ls -la {out_dir}/ 2>/dev/null || echo "  (no artifacts found)""#
    )
}

fn is_build_noise(name: &str) -> bool {
    name.starts_with("CMake")
        || [".ninja", ".cmake", ".txt", ".json", ".log"]
            .iter()
            .any(|ext| name.ends_with(ext))
}

fn is_library(name: &str) -> bool {
    name.starts_with("lib")
        && [".a", ".so", ".dylib"]
            .iter()
            .any(|ext| name.ends_with(ext) || name.contains(&format!("{ext}.")))
        || name.ends_with(".lib")
        || name.ends_with(".dll")
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "exe")
}

/// Magic-number check for ELF, Mach-O and PE images.
pub fn looks_like_native_binary(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    let Ok(mut f) = fs::File::open(path) else {
        return false;
    };
    if f.read_exact(&mut magic).is_err() {
        return false;
    }
    matches!(
        magic,
        [0x7f, b'E', b'L', b'F']
            | [0xcf, 0xfa, 0xed, 0xfe]
            | [0xce, 0xfa, 0xed, 0xfe]
            | [0xca, 0xfe, 0xba, 0xbe]
            | [b'M', b'Z', _, _]
    )
}

/// Copies executables, libraries and CTest results out of a host build tree.
/// Library projects stage libraries only. Returns the staged files.
pub fn collect_native(
    build_dir: &Path,
    out_dir: &Path,
    kind: ProjectKind,
) -> std::io::Result<Vec<PathBuf>> {
    let mut staged = Vec::new();

    let walker = WalkDir::new(build_dir)
        .min_depth(1)
        .max_depth(2)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != "CMakeFiles" && !name.starts_with('.')
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_build_noise(&name) {
            continue;
        }
        let path = entry.path();
        let wanted = match kind {
            ProjectKind::Library => is_library(&name),
            ProjectKind::Executable => is_library(&name) || is_executable(path),
        };
        if !wanted {
            continue;
        }
        let dest = out_dir.join(&name);
        // fs::copy carries the permission bits over
        match fs::copy(path, &dest) {
            Ok(_) => staged.push(dest),
            Err(e) => tracing::debug!(file = %path.display(), error = %e, "skipped artifact"),
        }
    }

    let testing = build_dir.join("Testing");
    if kind == ProjectKind::Executable && testing.join("TAG").is_file() {
        let results = out_dir.join("test_results");
        for entry in WalkDir::new(&testing).into_iter().filter_map(|e| e.ok()) {
            let Ok(rel) = entry.path().strip_prefix(&testing) else {
                continue;
            };
            let dest = results.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else if fs::copy(entry.path(), &dest).is_ok() {
                staged.push(dest);
            }
        }
    }

    Ok(staged)
}

/// Files currently staged in a target's output directory.
pub fn list_staged(out_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(out_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Finds the binary to launch for `ci run`: the project-named file in the
/// output or build directory, else the first native executable in the build
/// tree that is not a test or benchmark.
pub fn find_primary_binary(out_dir: &Path, build_dir: &Path, project_name: &str) -> Option<PathBuf> {
    let exe_name = if cfg!(windows) {
        format!("{project_name}.exe")
    } else {
        project_name.to_string()
    };
    for candidate in [out_dir.join(&exe_name), build_dir.join(&exe_name)] {
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }

    WalkDir::new(build_dir)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != "CMakeFiles")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            !name.contains("_test")
                && !name.contains("_bench")
                && name != "a.out"
                && !is_library(&name)
                && is_executable(p)
                && looks_like_native_binary(p)
        })
}
