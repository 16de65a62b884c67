//! Test binary discovery from cargo's JSON build output.
//!
//! `cargo test --no-run --message-format=json` prints one JSON record per
//! line. Records for compiled test targets carry `"profile": {"test": true}`
//! and the list of files the target produced. This module turns that stream
//! into the `--object <path>` argument list consumed by `llvm-cov`.
//!
//! Nothing here spawns a process.

use serde::Deserialize;

use crate::error::DiscoveryError;

/// Flag literal that precedes every object path handed to `llvm-cov`.
pub const OBJECT_FLAG: &str = "--object";

/// Substring identifying macOS debug-symbol bundles, which are not executables.
pub const DEBUG_BUNDLE_MARKER: &str = ".dSYM";

/// One line of cargo's JSON build output.
///
/// Cargo emits several message kinds (`compiler-artifact`, `compiler-message`,
/// `build-script-executed`, `build-finished`); every field is optional so all
/// of them deserialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildRecord {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub profile: Option<BuildProfile>,
    #[serde(default)]
    pub filenames: Vec<String>,
    #[serde(default)]
    pub executable: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildProfile {
    #[serde(default)]
    pub test: bool,
}

impl BuildRecord {
    pub fn is_test_profile(&self) -> bool {
        self.profile.as_ref().map_or(false, |p| p.test)
    }
}

/// Parse a line-delimited JSON stream. Blank lines are skipped.
pub fn parse_build_records(stream: &str) -> Result<Vec<BuildRecord>, DiscoveryError> {
    stream
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|source| DiscoveryError::MalformedRecord { line: idx + 1, source })
        })
        .collect()
}

/// Output files of every record marked as a test profile, in stream order.
pub fn test_binaries(records: &[BuildRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.is_test_profile())
        .flat_map(|r| r.filenames.iter().cloned())
        .collect()
}

pub fn is_debug_bundle(path: &str) -> bool {
    path.contains(DEBUG_BUNDLE_MARKER)
}

/// Interleave [`OBJECT_FLAG`] with each path: N paths become 2N tokens.
pub fn object_args<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    paths
        .into_iter()
        .flat_map(|p| [OBJECT_FLAG.to_string(), p.into()])
        .collect()
}

/// Paths worth handing to `llvm-cov`: test outputs minus debug-symbol bundles.
pub fn object_paths(records: &[BuildRecord]) -> Vec<String> {
    test_binaries(records)
        .into_iter()
        .filter(|p| !is_debug_bundle(p))
        .collect()
}

pub fn object_paths_from_stream(stream: &str) -> Result<Vec<String>, DiscoveryError> {
    let records = parse_build_records(stream)?;
    Ok(object_paths(&records))
}

/// [`object_paths_from_stream`] for raw process output.
pub fn object_paths_from_bytes(stdout: &[u8]) -> Result<Vec<String>, DiscoveryError> {
    let stream = std::str::from_utf8(stdout).map_err(DiscoveryError::NotUtf8)?;
    object_paths_from_stream(stream)
}

/// The whole step: build output in, `llvm-cov` object arguments out.
pub fn object_args_from_stream(stream: &str) -> Result<Vec<String>, DiscoveryError> {
    Ok(object_args(object_paths_from_stream(stream)?))
}
