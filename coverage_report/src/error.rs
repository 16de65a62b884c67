use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

use crate::steps::Step;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to launch {step} step ({program}): {source}")]
    Spawn {
        step: Step,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{step} step failed with {status}")]
    StepFailed { step: Step, status: ExitStatus },
    #[error("no raw profiles were written to {0:?}; did the instrumented test run execute?")]
    NoRawProfiles(PathBuf),
    #[error("no instrumented test binaries were discovered; nothing to render")]
    NoTestBinaries,
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("refusing to remove {path:?}: {reason}")]
    UnsafeRemoval { path: PathBuf, reason: &'static str },
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The step this error is attributed to, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Spawn { step, .. } | Self::StepFailed { step, .. } => Some(*step),
            Self::NoRawProfiles(_) => Some(Step::Merge),
            Self::NoTestBinaries | Self::Discovery(_) => Some(Step::Discover),
            Self::Io { .. } | Self::UnsafeRemoval { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("build record on line {line} is not valid JSON: {source}")]
    MalformedRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("build output is not valid UTF-8")]
    NotUtf8(#[source] std::str::Utf8Error),
}

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error(
        "could not find llvm-profdata and llvm-cov; run: rustup component add llvm-tools-preview"
    )]
    LlvmToolsNotFound,
    #[error("{var} points at {path:?}, which does not exist")]
    BadOverride { var: &'static str, path: PathBuf },
    #[error("cargo not found in PATH")]
    CargoNotFound,
}
