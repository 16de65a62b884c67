//! # Coverage report driver
//!
//! Produces an llvm-cov report for a cargo workspace in four blocking steps:
//!
//! 1. run `cargo test` with `-C instrument-coverage`, writing raw `.profraw`
//!    files under `target/coverage/raw`
//! 2. merge them with `llvm-profdata merge -sparse`
//! 3. list the instrumented test binaries with
//!    `cargo test --no-run --message-format=json`
//! 4. render with `llvm-cov show --format=html`
//!
//! ```bash
//! coverage_report                    # full pipeline with defaults
//! coverage_report report -- -p imged # forward args to cargo test
//! coverage_report clean
//! coverage_report doctor
//! ```
//!
//! ## Tool discovery
//!
//! `llvm-profdata` and `llvm-cov` come from `LLVM_PROFDATA`/`LLVM_COV`, the
//! active rustup toolchain's `llvm-tools` component, `PATH`, or Homebrew, in
//! that order. `rustfilt` is optional.

pub mod clean;
pub mod config;
pub mod discovery;
pub mod doctor;
pub mod error;
pub mod pipeline;
pub mod steps;
pub mod toolchain;

use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

pub use config::{Args, ReportConfig, ReportFormat};
pub use error::{DiscoveryError, PipelineError, ToolchainError};
pub use pipeline::{Exec, Pipeline, ReportSummary, SystemExec};
pub use steps::Step;

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Workspace root as reported by cargo.
pub fn locate_workspace_root(cargo: &std::path::Path) -> Result<PathBuf> {
    let output = Command::new(cargo)
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to locate workspace root")?;
    if !output.status.success() {
        bail!(
            "cargo locate-project failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let cargo_toml = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    cargo_toml
        .parent()
        .map(|p| p.to_path_buf())
        .with_context(|| format!("unexpected manifest path {}", cargo_toml.display()))
}

/// The configured root, or the one cargo reports, as an absolute path.
///
/// Cargo runs inside the root, so a relative root would otherwise be applied
/// twice to the paths handed to it.
pub fn resolve_root(config: &ReportConfig) -> Result<PathBuf> {
    let root = match &config.workspace_root {
        Some(root) => root.clone(),
        None => {
            let cargo = toolchain::find_cargo()?;
            locate_workspace_root(&cargo)?
        }
    };
    std::fs::canonicalize(&root)
        .with_context(|| format!("Workspace root {} is not accessible", root.display()))
}
