//! Command lines for each external invocation of the pipeline.
//!
//! Builders only assemble `Command`s; [`crate::pipeline`] decides when to
//! spawn them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ReportConfig;
use crate::toolchain::Toolchain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Instrumented `cargo test`.
    Test,
    /// `llvm-profdata merge`.
    Merge,
    /// `cargo test --no-run --message-format=json`.
    Discover,
    /// `llvm-cov show`.
    Render,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Merge => "merge",
            Self::Discover => "discover",
            Self::Render => "render",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Step a: run the whole suite with instrumentation on.
pub fn test_command(toolchain: &Toolchain, config: &ReportConfig) -> Command {
    let mut cmd = Command::new(&toolchain.cargo);
    cmd.arg("test")
        .args(&config.cargo_args)
        .env("RUSTFLAGS", &config.rustflags)
        .env("LLVM_PROFILE_FILE", config.profile_file_pattern());
    in_workspace(&mut cmd, config);
    cmd
}

/// Step b: fold raw profiles into one sparse indexed profile.
pub fn merge_command(toolchain: &Toolchain, raw_profiles: &[PathBuf], output: &Path) -> Command {
    let mut cmd = Command::new(&toolchain.llvm.profdata);
    cmd.arg("merge")
        .arg("-sparse")
        .args(raw_profiles)
        .arg("-o")
        .arg(output);
    cmd
}

/// Step c: rebuild (a no-op after step a) and list test artifacts as JSON.
///
/// `RUSTFLAGS` must match step a or cargo recompiles uninstrumented binaries.
pub fn discover_command(toolchain: &Toolchain, config: &ReportConfig) -> Command {
    let mut cmd = Command::new(&toolchain.cargo);
    cmd.args(["test", "--no-run", "--message-format=json"])
        .args(&config.cargo_args)
        .env("RUSTFLAGS", &config.rustflags);
    in_workspace(&mut cmd, config);
    cmd
}

/// Step d: render the report from the merged profile and discovered objects.
pub fn render_command(
    toolchain: &Toolchain,
    config: &ReportConfig,
    object_args: &[String],
) -> Command {
    let mut cmd = Command::new(&toolchain.llvm.cov);
    cmd.arg("show").args(object_args);
    if config.color {
        cmd.arg("--use-color");
    }
    cmd.arg(prefixed("--instr-profile=", &config.profdata))
        .arg(format!(
            "--ignore-filename-regex={}",
            config.ignore_filename_regex
        ));
    if let Some(demangler) = &toolchain.demangler {
        cmd.arg(prefixed("-Xdemangler=", demangler));
    }
    cmd.arg("--show-line-counts-or-regions")
        .arg("--show-instantiations")
        .arg(format!("--format={}", config.format.as_str()))
        .arg(prefixed("--output-dir=", &config.output_dir));
    in_workspace(&mut cmd, config);
    cmd
}

fn in_workspace(cmd: &mut Command, config: &ReportConfig) {
    if let Some(root) = &config.workspace_root {
        cmd.current_dir(root);
    }
}

fn prefixed(flag: &str, path: &Path) -> std::ffi::OsString {
    let mut arg = std::ffi::OsString::from(flag);
    arg.push(path);
    arg
}
