//! # xcross - Cross-compilation CI for C/C++ projects
//!
//! xcross builds one C/C++ project for many targets from a single
//! `xc-ci.toml`. Each target names a build environment (a pulled, local or
//! content-hashed built container image, or the host) and is built with the
//! project's own build system: CMake with vcpkg, Bazel or Meson.
//!
//! ## Quick Start
//!
//! ```bash
//! # Describe a target interactively
//! xc ci add-target
//!
//! # Build every active target into .bin/ci/<target>/
//! xc ci build
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Target descriptor store (`xc-ci.toml`)
//! - [`ci`] - Environment resolution, strategies, artifacts and the orchestrator
//! - [`commands`] - CLI command handlers

/// CI orchestration: resolver, dispatcher, scripts, artifacts.
pub mod ci;

/// CLI command handlers extracted from main.
pub mod commands;

/// Target configuration parsing (`xc-ci.toml`).
pub mod config;

/// Tracing subscriber setup.
pub mod logging;
