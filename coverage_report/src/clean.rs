//! Removal of coverage artifacts left by earlier runs.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{ReportConfig, DEFAULT_TARGET_DIR};
use crate::error::{PipelineError, PipelineResult};

/// Delete the raw profile directory, the merged profile and the report
/// directory, then sweep stray `.profraw` files under the cargo target
/// directory.
///
/// Returns every path that was removed. Paths that do not exist are skipped.
/// Nothing is removed unless every configured path passes
/// [`check_removable`].
pub fn clean(root: &Path, config: &ReportConfig) -> PipelineResult<Vec<PathBuf>> {
    info!(root = %root.display(), target = %config.target_dir.display(), "Cleaning coverage data");
    for path in [&config.raw_profile_dir, &config.output_dir, &config.profdata] {
        check_removable(path, config)?;
    }
    let mut removed = Vec::new();

    for dir in [&config.raw_profile_dir, &config.output_dir] {
        if remove_dir_if_present(dir)? {
            removed.push(dir.clone());
        }
    }
    if remove_file_if_present(&config.profdata)? {
        removed.push(config.profdata.clone());
    }

    let stray: Vec<PathBuf> = WalkDir::new(&config.target_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "profraw"))
        .map(|e| e.into_path())
        .collect();
    for path in stray {
        if remove_file_if_present(&path)? {
            removed.push(path);
        }
    }

    info!(removed = removed.len(), "Coverage data cleaned");
    Ok(removed)
}

/// Refuse to delete `path` when it is the workspace root or one of its
/// ancestors. Paths outside both `<root>/target` and the configured target
/// directory are refused too, unless `force` is set.
///
/// Paths are compared after lexical normalization; symlinks are not resolved.
pub fn check_removable(path: &Path, config: &ReportConfig) -> PipelineResult<()> {
    let root = normalize(config.workspace_root.as_deref().unwrap_or(Path::new("")));
    let candidate = normalize(path);

    if root.starts_with(&candidate) {
        return Err(PipelineError::UnsafeRemoval {
            path: path.to_path_buf(),
            reason: "it is the workspace root or one of its ancestors",
        });
    }
    if config.force {
        return Ok(());
    }
    let inside_target = [root.join(DEFAULT_TARGET_DIR), normalize(&config.target_dir)]
        .iter()
        .any(|target| candidate.starts_with(target) && candidate != *target);
    if !inside_target {
        return Err(PipelineError::UnsafeRemoval {
            path: path.to_path_buf(),
            reason: "it is outside the cargo target directory (pass --force to allow)",
        });
    }
    Ok(())
}

/// Drop `.` and fold `..` into its parent without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

fn remove_dir_if_present(path: &Path) -> PipelineResult<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed directory");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(PipelineError::io(path, err)),
    }
}

fn remove_file_if_present(path: &Path) -> PipelineResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed file");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(PipelineError::io(path, err)),
    }
}
