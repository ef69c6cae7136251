//! Persistent per-target build caches under `<project>/.cache/ci`.
//!
//! Directories are created lazily and never pruned here.
//!
//! ```text
//! .cache/ci/
//! ├── <target>/                 build-system state and objects
//! │   └── .pkg_cache/           vcpkg: installed, downloads, buildtrees, binary
//! ├── <target>.lock             advisory lock held while the target builds
//! └── bazel_repo_cache/         shared by every Bazel target
//! ```

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::CiError;

pub const CACHE_ROOT: &str = ".cache/ci";
const PKG_CACHE_DIR: &str = ".pkg_cache";
const BAZEL_REPO_CACHE: &str = "bazel_repo_cache";
const SUBPROJECTS_DIR: &str = "subprojects";

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLayout {
    root: PathBuf,
    project_root: PathBuf,
    target: String,
}

impl CacheLayout {
    pub fn new(project_root: &Path, target: &str) -> Self {
        Self {
            root: cache_root(project_root),
            project_root: project_root.to_path_buf(),
            target: target.to_string(),
        }
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join(&self.target)
    }

    pub fn pkg_cache_dir(&self) -> PathBuf {
        self.build_dir().join(PKG_CACHE_DIR)
    }

    /// `installed`, `downloads`, `buildtrees`, `binary`, in that order.
    pub fn pkg_cache_subdirs(&self) -> [PathBuf; 4] {
        let base = self.pkg_cache_dir();
        ["installed", "downloads", "buildtrees", "binary"].map(|d| base.join(d))
    }

    pub fn bazel_repo_cache(&self) -> PathBuf {
        self.root.join(BAZEL_REPO_CACHE)
    }

    pub fn meson_subprojects(&self) -> PathBuf {
        self.project_root.join(SUBPROJECTS_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(format!("{}.lock", self.target))
    }

    pub fn ensure_build_dir(&self) -> Result<PathBuf, CiError> {
        let dir = self.build_dir();
        create_dir(&dir)?;
        Ok(dir)
    }

    pub fn ensure_pkg_cache(&self) -> Result<(), CiError> {
        for dir in self.pkg_cache_subdirs() {
            create_dir(&dir)?;
        }
        Ok(())
    }

    pub fn ensure_bazel_repo_cache(&self) -> Result<PathBuf, CiError> {
        let dir = self.bazel_repo_cache();
        create_dir(&dir)?;
        Ok(dir)
    }

    pub fn ensure_meson_subprojects(&self) -> Result<PathBuf, CiError> {
        let dir = self.meson_subprojects();
        create_dir(&dir)?;
        Ok(dir)
    }
}

pub fn cache_root(project_root: &Path) -> PathBuf {
    project_root.join(CACHE_ROOT)
}

pub(crate) fn create_dir(dir: &Path) -> Result<(), CiError> {
    fs::create_dir_all(dir).map_err(|source| CiError::OutputDir {
        path: dir.to_path_buf(),
        source,
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    command: String,
}

/// Exclusive advisory lock on one target's cache. Released on drop.
#[derive(Debug)]
pub struct CacheLock {
    _file: File,
    path: PathBuf,
}

impl CacheLock {
    pub fn acquire(layout: &CacheLayout, command: &str) -> Result<Self, CiError> {
        let path = layout.lock_path();
        if let Some(parent) = path.parent() {
            create_dir(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| CiError::OutputDir {
                path: path.clone(),
                source,
            })?;

        if let Err(e) = try_lock_exclusive(&file) {
            let holder = if e.kind() == io::ErrorKind::WouldBlock {
                read_owner(&path)
            } else {
                e.to_string()
            };
            return Err(CiError::CacheLocked {
                target: layout.target.clone(),
                holder,
            });
        }

        write_owner(&file, command);
        tracing::debug!(lock = %path.display(), "acquired cache lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_owner(mut file: &File, command: &str) {
    let owner = LockOwner {
        pid: std::process::id(),
        command: command.to_string(),
    };
    // Owner metadata only feeds the contention message.
    if let Ok(json) = serde_json::to_string(&owner) {
        let _ = file.set_len(0);
        let _ = file.write_all(json.as_bytes());
        let _ = file.flush();
    }
}

fn read_owner(path: &Path) -> String {
    let mut contents = String::new();
    if let Ok(mut f) = File::open(path)
        && f.read_to_string(&mut contents).is_ok()
        && let Ok(owner) = serde_json::from_str::<LockOwner>(&contents)
    {
        return format!("{} (PID {})", owner.command, owner.pid);
    }
    format!("unknown process (lock file {})", path.display())
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::fd::AsFd;
    flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}
