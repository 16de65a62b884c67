//! Discovery of the external tools the report pipeline drives.
//!
//! LLVM tools are looked up in this order:
//! 1. `LLVM_PROFDATA` / `LLVM_COV` environment overrides
//! 2. rustup's `llvm-tools` component for the active toolchain
//! 3. `PATH`
//! 4. Homebrew LLVM

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::ToolchainError;

pub const PROFDATA_OVERRIDE_VAR: &str = "LLVM_PROFDATA";
pub const COV_OVERRIDE_VAR: &str = "LLVM_COV";

const HOMEBREW_LLVM_DIRS: [&str; 2] = [
    "/opt/homebrew/opt/llvm/bin", // ARM64 Macs
    "/usr/local/opt/llvm/bin",    // Intel Macs
];

/// Resolved locations of every tool the pipeline spawns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub cargo: PathBuf,
    pub llvm: LlvmToolchain,
    /// `None` when the demangler is not installed; the report then shows
    /// mangled symbol names.
    pub demangler: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlvmToolchain {
    pub profdata: PathBuf,
    pub cov: PathBuf,
    pub source: ToolchainSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainSource {
    Override, // LLVM_PROFDATA / LLVM_COV
    Rustup,   // llvm-tools component
    System,   // PATH
    Homebrew,
}

impl fmt::Display for ToolchainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => write!(f, "environment override"),
            Self::Rustup => write!(f, "Rust toolchain (rustup)"),
            Self::System => write!(f, "System LLVM"),
            Self::Homebrew => write!(f, "Homebrew LLVM"),
        }
    }
}

impl Toolchain {
    /// Locate cargo, the LLVM tools and (optionally) `demangler`.
    pub fn detect(demangler: &str) -> Result<Self, ToolchainError> {
        let cargo = find_cargo()?;
        let llvm = detect_llvm_toolchain()?;
        let demangler = find_demangler(demangler);
        Ok(Self {
            cargo,
            llvm,
            demangler,
        })
    }
}

pub fn find_cargo() -> Result<PathBuf, ToolchainError> {
    // Set by cargo itself when we run as `cargo run` or a cargo subcommand.
    if let Some(cargo) = env::var_os("CARGO").map(PathBuf::from) {
        if cargo.exists() {
            return Ok(cargo);
        }
    }
    which::which("cargo").map_err(|_| ToolchainError::CargoNotFound)
}

pub fn find_demangler(name: &str) -> Option<PathBuf> {
    match which::which(name) {
        Ok(path) => Some(path),
        Err(_) => {
            warn!(
                demangler = name,
                "demangler not found; symbols will be shown mangled (cargo install {name})"
            );
            None
        }
    }
}

pub fn detect_llvm_toolchain() -> Result<LlvmToolchain, ToolchainError> {
    if let Some(toolchain) = detect_override_toolchain()? {
        return Ok(toolchain);
    }
    if let Some(toolchain) = detect_rustup_toolchain() {
        return Ok(toolchain);
    }
    if let Some(toolchain) = detect_system_toolchain() {
        return Ok(toolchain);
    }
    if let Some(toolchain) = detect_homebrew_toolchain() {
        return Ok(toolchain);
    }
    Err(ToolchainError::LlvmToolsNotFound)
}

/// Both overrides must be set for this source to apply; a set override that
/// points nowhere is an error rather than a silent fallback.
fn detect_override_toolchain() -> Result<Option<LlvmToolchain>, ToolchainError> {
    let profdata = env::var_os(PROFDATA_OVERRIDE_VAR).map(PathBuf::from);
    let cov = env::var_os(COV_OVERRIDE_VAR).map(PathBuf::from);

    for (var, path) in [(PROFDATA_OVERRIDE_VAR, &profdata), (COV_OVERRIDE_VAR, &cov)] {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ToolchainError::BadOverride {
                    var,
                    path: path.clone(),
                });
            }
        }
    }

    match (profdata, cov) {
        (Some(profdata), Some(cov)) => {
            info!(
                profdata = %profdata.display(),
                cov = %cov.display(),
                "Using LLVM tools from environment"
            );
            Ok(Some(LlvmToolchain {
                profdata,
                cov,
                source: ToolchainSource::Override,
            }))
        }
        _ => Ok(None),
    }
}

fn detect_rustup_toolchain() -> Option<LlvmToolchain> {
    let rustup_home = env::var_os("RUSTUP_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".rustup")))?;

    let output = Command::new("rustup")
        .args(["show", "active-toolchain"])
        .output()
        .ok()?;
    if !output.status.success() {
        debug!("rustup show active-toolchain failed");
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let toolchain_name = stdout.split_whitespace().next()?;

    find_in_rustup_home(&rustup_home, toolchain_name)
}

/// Look for `llvm-profdata` and `llvm-cov` inside one rustup toolchain.
pub fn find_in_rustup_home(rustup_home: &Path, toolchain_name: &str) -> Option<LlvmToolchain> {
    let toolchain_dir = rustup_home.join("toolchains").join(toolchain_name);
    let patterns = [
        toolchain_dir.join("lib/rustlib/*/bin"),
        toolchain_dir.join("lib/rustlib/*/llvm-tools-preview/bin"),
    ];

    for pattern in patterns {
        let Some(pattern) = pattern.to_str() else {
            continue;
        };
        let Ok(entries) = glob::glob(pattern) else {
            continue;
        };
        for dir in entries.flatten() {
            if let Some(toolchain) = pair_in_dir(&dir, ToolchainSource::Rustup) {
                info!(dir = %dir.display(), "Found Rust LLVM tools");
                return Some(toolchain);
            }
        }
    }
    None
}

fn detect_system_toolchain() -> Option<LlvmToolchain> {
    let profdata = which::which("llvm-profdata").ok()?;
    let cov = which::which("llvm-cov").ok()?;
    info!(
        profdata = %profdata.display(),
        cov = %cov.display(),
        "Found system LLVM tools"
    );
    Some(LlvmToolchain {
        profdata,
        cov,
        source: ToolchainSource::System,
    })
}

fn detect_homebrew_toolchain() -> Option<LlvmToolchain> {
    HOMEBREW_LLVM_DIRS
        .iter()
        .find_map(|dir| pair_in_dir(Path::new(dir), ToolchainSource::Homebrew))
}

fn pair_in_dir(dir: &Path, source: ToolchainSource) -> Option<LlvmToolchain> {
    let profdata = dir.join(exe_name("llvm-profdata"));
    let cov = dir.join(exe_name("llvm-cov"));
    (profdata.exists() && cov.exists()).then_some(LlvmToolchain {
        profdata,
        cov,
        source,
    })
}

fn exe_name(tool: &str) -> String {
    format!("{tool}{}", env::consts::EXE_SUFFIX)
}
