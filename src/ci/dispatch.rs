//! Build-system detection.
//!
//! Marker files at the project root pick the build system; the runner decides
//! whether it happens in a container or on the host.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{CONFIG_FILE, Runner};

pub const BAZEL_MARKER: &str = "MODULE.bazel";
pub const MESON_MARKER: &str = "meson.build";
pub const CMAKE_MARKER: &str = "CMakeLists.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// CMake + vcpkg inside a container.
    CMake,
    Bazel,
    Meson,
    /// CMake directly on the host.
    NativeCMake,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::CMake => "cmake",
            Strategy::Bazel => "bazel",
            Strategy::Meson => "meson",
            Strategy::NativeCMake => "native cmake",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectMarkers {
    pub bazel: bool,
    pub meson: bool,
}

impl ProjectMarkers {
    pub fn probe(project_root: &Path) -> Self {
        Self {
            bazel: project_root.join(BAZEL_MARKER).is_file(),
            meson: project_root.join(MESON_MARKER).is_file(),
        }
    }
}

/// Picks the strategy. Bazel wins over Meson; anything else is CMake.
/// Native runners always use host CMake.
pub fn classify(runner: Runner, markers: ProjectMarkers) -> Strategy {
    match runner {
        Runner::Native => Strategy::NativeCMake,
        Runner::Docker if markers.bazel => Strategy::Bazel,
        Runner::Docker if markers.meson => Strategy::Meson,
        Runner::Docker => Strategy::CMake,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    Executable,
    Library,
}

/// Reads `CMakeLists.txt` to tell executables from libraries. Test-only
/// executables do not make a project an executable one. Unreadable or
/// ambiguous files count as executables.
pub fn detect_project_kind(project_root: &Path) -> ProjectKind {
    let Ok(content) = fs::read_to_string(project_root.join(CMAKE_MARKER)) else {
        return ProjectKind::Executable;
    };
    project_kind_from_cmake(&content)
}

fn project_kind_from_cmake(content: &str) -> ProjectKind {
    let has_library = content.contains("add_library");
    if content.contains("add_executable") {
        let main_exe = content.lines().map(str::trim).any(|line| {
            line.starts_with("add_executable(") && !line.contains("_test")
        });
        if main_exe || !has_library {
            return ProjectKind::Executable;
        }
        return ProjectKind::Library;
    }
    if has_library {
        ProjectKind::Library
    } else {
        ProjectKind::Executable
    }
}

/// Walks up from `start` to the first directory holding the target config or a
/// build-system marker. Falls back to `start`.
pub fn find_project_root(start: &Path) -> PathBuf {
    let markers = [CONFIG_FILE, CMAKE_MARKER, BAZEL_MARKER, MESON_MARKER];
    start
        .ancestors()
        .find(|dir| markers.iter().any(|m| dir.join(m).exists()))
        .unwrap_or(start)
        .to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority() {
        let both = ProjectMarkers {
            bazel: true,
            meson: true,
        };
        assert_eq!(classify(Runner::Docker, both), Strategy::Bazel);
        assert_eq!(
            classify(
                Runner::Docker,
                ProjectMarkers {
                    bazel: false,
                    meson: true
                }
            ),
            Strategy::Meson
        );
        assert_eq!(
            classify(Runner::Docker, ProjectMarkers::default()),
            Strategy::CMake
        );
    }

    #[test]
    fn test_native_ignores_markers() {
        let both = ProjectMarkers {
            bazel: true,
            meson: true,
        };
        assert_eq!(classify(Runner::Native, both), Strategy::NativeCMake);
    }

    #[test]
    fn test_probe_markers() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ProjectMarkers::probe(dir.path()), ProjectMarkers::default());
        fs::write(dir.path().join(MESON_MARKER), "project('x', 'cpp')").unwrap();
        let markers = ProjectMarkers::probe(dir.path());
        assert!(markers.meson);
        assert!(!markers.bazel);
    }

    #[test]
    fn test_project_kind() {
        assert_eq!(
            project_kind_from_cmake("add_executable(app src/main.cpp)"),
            ProjectKind::Executable
        );
        assert_eq!(
            project_kind_from_cmake("add_library(core src/core.cpp)"),
            ProjectKind::Library
        );
        assert_eq!(
            project_kind_from_cmake(
                "add_library(core src/core.cpp)\nadd_executable(core_tests tests/t.cpp)"
            ),
            ProjectKind::Library
        );
        assert_eq!(
            project_kind_from_cmake("project(empty)"),
            ProjectKind::Executable
        );
    }

    #[test]
    fn test_find_project_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CMAKE_MARKER), "").unwrap();
        let nested = dir.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested), dir.path());
    }
}
