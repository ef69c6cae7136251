//! Environment resolution: turns a target's `[targets.docker]` section into a
//! runnable image reference.

use colored::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use super::CiError;
use super::engine::{ContainerEngine, ImageBuild};
use crate::config::{CiTarget, DockerMode, PullPolicy};

/// Namespace for images produced by `mode = "build"`.
pub const IMAGE_NAMESPACE: &str = "xc";
const HASH_LEN: usize = 12;

/// Hash of the Dockerfile bytes followed by the build args in key order.
///
/// Args are sorted before hashing so the result never depends on the order a
/// map happens to iterate in.
pub fn content_hash<'a, I>(dockerfile: &[u8], args: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut pairs: Vec<(&String, &String)> = args.into_iter().collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    hasher.update(dockerfile);
    for (k, v) in pairs {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

pub fn image_tag(target_name: &str, hash: &str) -> String {
    format!("{}/{}:{}", IMAGE_NAMESPACE, target_name, hash)
}

fn resolve_path(project_root: &Path, p: &str) -> PathBuf {
    let path = Path::new(p);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

/// Returns the image the target's build should run in.
///
/// `force_refresh` forces a pull in pull mode and a rebuild in build mode.
pub fn resolve_image<E: ContainerEngine + ?Sized>(
    target: &CiTarget,
    project_root: &Path,
    force_refresh: bool,
    engine: &E,
) -> Result<String, CiError> {
    let docker = target
        .docker
        .as_ref()
        .ok_or_else(|| CiError::MissingContainer(target.name.clone()))?;

    match docker.mode {
        DockerMode::Pull => {
            let image = docker.image.as_str();
            let present = engine.image_exists(image);
            let should_pull = match docker.pull_policy {
                PullPolicy::Always => true,
                PullPolicy::Never if !present => {
                    return Err(CiError::ImageNotPresent(image.to_string()));
                }
                PullPolicy::Never => false,
                PullPolicy::IfNotPresent => !present,
            };

            if should_pull || force_refresh {
                println!("  {} Pulling Docker image: {}...", "⬇".cyan(), image);
                engine.pull(image, docker.platform.as_deref())?;
                println!("  {} Docker image {} pulled", "✓".green(), image);
            } else {
                println!("  {} Docker image {} already present", "✓".green(), image);
            }
            Ok(image.to_string())
        }

        DockerMode::Local => {
            let image = docker.image.as_str();
            if !engine.image_exists(image) {
                return Err(CiError::LocalImageMissing(image.to_string()));
            }
            println!("  {} Using local Docker image: {}", "✓".green(), image);
            Ok(image.to_string())
        }

        DockerMode::Build => {
            let build = docker
                .build
                .as_ref()
                .filter(|b| !b.dockerfile.trim().is_empty())
                .ok_or_else(|| CiError::MissingBuildSpec(target.name.clone()))?;

            let dockerfile = resolve_path(project_root, &build.dockerfile);
            let bytes = fs::read(&dockerfile).map_err(|source| CiError::DockerfileUnreadable {
                path: dockerfile.clone(),
                source,
            })?;

            let tag = image_tag(&target.name, &content_hash(&bytes, &build.args));

            if !force_refresh && engine.image_exists(&tag) {
                println!(
                    "  {} Docker image {} already exists (hash match)",
                    "✓".green(),
                    tag
                );
                return Ok(tag);
            }

            let context = build
                .context
                .as_deref()
                .filter(|c| !c.is_empty())
                .map(|c| resolve_path(project_root, c))
                .unwrap_or_else(|| project_root.to_path_buf());

            let spec = ImageBuild {
                tag: tag.clone(),
                dockerfile,
                context,
                platform: docker.platform.clone(),
                args: build.args.clone(),
            };

            println!("  {} Building Docker image: {}...", "🐳".blue(), tag);
            if let Err(e) = engine.build(&spec) {
                tracing::debug!(error = %e, "buildx failed");
                println!(
                    "  {} docker buildx failed, trying regular docker build...",
                    "!".yellow()
                );
                engine.build_legacy(&spec)?;
            }
            println!("  {} Docker image {} built", "✓".green(), tag);
            Ok(tag)
        }
    }
}
