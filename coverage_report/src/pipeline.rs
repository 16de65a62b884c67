//! The four-step coverage pipeline.
//!
//! ```text
//! prepare -> test -> merge -> discover -> render
//! ```
//!
//! Every step blocks until its process exits and its exit status is checked
//! before the next one starts. The only tolerated failure is a failing test
//! run when `allow_test_failures` is set.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::time::Instant;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::clean::check_removable;
use crate::config::ReportConfig;
use crate::discovery;
use crate::error::{PipelineError, PipelineResult};
use crate::steps::{self, Step};
use crate::toolchain::Toolchain;

/// Runs external commands. The real implementation spawns processes; tests
/// substitute a recorder.
pub trait Exec {
    /// Run to completion with inherited stdio.
    fn status(&mut self, cmd: &mut Command) -> io::Result<ExitStatus>;
    /// Run to completion capturing stdout; stderr stays inherited.
    fn output(&mut self, cmd: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExec;

impl Exec for SystemExec {
    fn status(&mut self, cmd: &mut Command) -> io::Result<ExitStatus> {
        cmd.status()
    }

    fn output(&mut self, cmd: &mut Command) -> io::Result<Output> {
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit()).output()
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    /// Test binaries handed to the renderer.
    pub objects: Vec<PathBuf>,
    pub profdata: PathBuf,
    pub output_dir: PathBuf,
    /// Whether the instrumented test run exited successfully.
    pub tests_passed: bool,
}

impl ReportSummary {
    pub fn index_html(&self) -> PathBuf {
        self.output_dir.join("index.html")
    }
}

pub struct Pipeline<E: Exec = SystemExec> {
    config: ReportConfig,
    toolchain: Toolchain,
    exec: E,
}

impl Pipeline<SystemExec> {
    pub fn new(config: ReportConfig, toolchain: Toolchain) -> Self {
        Self::with_exec(config, toolchain, SystemExec)
    }
}

impl<E: Exec> Pipeline<E> {
    pub fn with_exec(config: ReportConfig, toolchain: Toolchain, exec: E) -> Self {
        Self {
            config,
            toolchain,
            exec,
        }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    pub fn into_exec(self) -> E {
        self.exec
    }

    pub fn run(&mut self) -> PipelineResult<ReportSummary> {
        let start = Instant::now();
        info!(
            output_dir = %self.config.output_dir.display(),
            llvm = %self.toolchain.llvm.source,
            "Starting coverage report"
        );

        self.prepare()?;
        let tests_passed = self.timed(Step::Test, Self::run_tests)?;
        self.timed(Step::Merge, Self::merge_profiles)?;
        let objects = self.timed(Step::Discover, Self::discover_objects)?;
        self.timed(Step::Render, |this| this.render(&objects))?;

        info!(
            elapsed_secs = start.elapsed().as_secs_f32(),
            objects = objects.len(),
            "Coverage report complete"
        );

        Ok(ReportSummary {
            objects,
            profdata: self.config.profdata.clone(),
            output_dir: self.config.output_dir.clone(),
            tests_passed,
        })
    }

    fn timed<T>(
        &mut self,
        step: Step,
        f: impl FnOnce(&mut Self) -> PipelineResult<T>,
    ) -> PipelineResult<T> {
        let start = Instant::now();
        info!(%step, "Step started");
        let result = f(self);
        match &result {
            Ok(_) => info!(%step, elapsed_secs = start.elapsed().as_secs_f32(), "Step finished"),
            Err(err) => warn!(%step, error = %err, "Step failed"),
        }
        result
    }

    /// Stale raw profiles from an earlier run would be merged into this one.
    fn prepare(&mut self) -> PipelineResult<()> {
        let raw_dir = &self.config.raw_profile_dir;
        check_removable(raw_dir, &self.config)?;
        match fs::remove_dir_all(raw_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(PipelineError::io(raw_dir, err)),
        }
        fs::create_dir_all(raw_dir).map_err(|err| PipelineError::io(raw_dir, err))?;
        for path in [&self.config.profdata, &self.config.output_dir] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
            }
        }
        Ok(())
    }

    fn run_tests(&mut self) -> PipelineResult<bool> {
        let mut cmd = steps::test_command(&self.toolchain, &self.config);
        let status = self.spawn_status(Step::Test, &mut cmd)?;
        if status.success() {
            return Ok(true);
        }
        if self.config.allow_test_failures {
            warn!(%status, "Instrumented test run failed; continuing with partial coverage");
            return Ok(false);
        }
        Err(PipelineError::StepFailed {
            step: Step::Test,
            status,
        })
    }

    fn merge_profiles(&mut self) -> PipelineResult<()> {
        let raw_profiles = raw_profiles_in(&self.config.raw_profile_dir);
        if raw_profiles.is_empty() {
            return Err(PipelineError::NoRawProfiles(
                self.config.raw_profile_dir.clone(),
            ));
        }
        info!(count = raw_profiles.len(), "Merging raw profiles");

        let mut cmd = steps::merge_command(&self.toolchain, &raw_profiles, &self.config.profdata);
        let status = self.spawn_status(Step::Merge, &mut cmd)?;
        if !status.success() {
            return Err(PipelineError::StepFailed {
                step: Step::Merge,
                status,
            });
        }

        if !self.config.keep_raw_profiles {
            for path in &raw_profiles {
                if let Err(err) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %err, "Failed to remove raw profile");
                }
            }
        }
        Ok(())
    }

    fn discover_objects(&mut self) -> PipelineResult<Vec<PathBuf>> {
        let mut cmd = steps::discover_command(&self.toolchain, &self.config);
        let output = self
            .exec
            .output(&mut cmd)
            .map_err(|source| spawn_error(Step::Discover, &cmd, source))?;
        if !output.status.success() {
            return Err(PipelineError::StepFailed {
                step: Step::Discover,
                status: output.status,
            });
        }

        let objects: Vec<PathBuf> = discovery::object_paths_from_bytes(&output.stdout)?
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if objects.is_empty() {
            return Err(PipelineError::NoTestBinaries);
        }
        info!(count = objects.len(), "Discovered instrumented test binaries");
        Ok(objects)
    }

    fn render(&mut self, objects: &[PathBuf]) -> PipelineResult<()> {
        let object_args = discovery::object_args(objects.iter().map(|p| p.display().to_string()));
        let mut cmd = steps::render_command(&self.toolchain, &self.config, &object_args);
        let status = self.spawn_status(Step::Render, &mut cmd)?;
        if !status.success() {
            return Err(PipelineError::StepFailed {
                step: Step::Render,
                status,
            });
        }
        Ok(())
    }

    fn spawn_status(&mut self, step: Step, cmd: &mut Command) -> PipelineResult<ExitStatus> {
        self.exec
            .status(cmd)
            .map_err(|source| spawn_error(step, cmd, source))
    }
}

fn spawn_error(step: Step, cmd: &Command, source: io::Error) -> PipelineError {
    PipelineError::Spawn {
        step,
        program: cmd.get_program().to_string_lossy().into_owned(),
        source,
    }
}

/// `.profraw` files directly or transitively under `dir`, sorted for a
/// stable merge order.
pub fn raw_profiles_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "profraw"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}
