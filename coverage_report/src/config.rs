use std::path::{Path, PathBuf};

use clap::{Args as ClapArgs, ValueEnum};

pub const DEFAULT_RAW_PROFILE_DIR: &str = "target/coverage/raw";
pub const DEFAULT_PROFDATA: &str = "target/coverage/tests.profdata";
pub const DEFAULT_OUTPUT_DIR: &str = "target/coverage/html";
/// Dependency caches and toolchain sources; their coverage is not ours to report.
pub const DEFAULT_IGNORE_FILENAME_REGEX: &str =
    r"/\.cargo/registry|/\.cargo/git|/rustc/|/\.rustup/toolchains";
pub const DEFAULT_DEMANGLER: &str = "rustfilt";
pub const DEFAULT_TARGET_DIR: &str = "target";

/// `%p` (pid) and `%m` (binary signature) keep concurrent test binaries from
/// clobbering each other's profile.
pub const RAW_PROFILE_PATTERN: &str = "tests-%p-%m.profraw";
pub const INSTRUMENT_FLAG: &str = "-C instrument-coverage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Html,
    Text,
}

impl ReportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Text => "text",
        }
    }
}

/// Options shared by every subcommand.
#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
    /// Workspace to measure (defaults to `cargo locate-project --workspace`)
    #[arg(long, value_name = "PATH", env = "COVERAGE_WORKSPACE_ROOT", global = true)]
    pub workspace_root: Option<PathBuf>,

    /// Directory receiving raw .profraw files from the instrumented run
    #[arg(
        long,
        value_name = "PATH",
        env = "COVERAGE_RAW_DIR",
        default_value = DEFAULT_RAW_PROFILE_DIR,
        global = true
    )]
    pub raw_profile_dir: PathBuf,

    /// Merged profile-data file
    #[arg(
        long,
        value_name = "PATH",
        env = "COVERAGE_PROFDATA",
        default_value = DEFAULT_PROFDATA,
        global = true
    )]
    pub profdata: PathBuf,

    /// Report output directory
    #[arg(
        short = 'o',
        long,
        value_name = "PATH",
        env = "COVERAGE_OUTPUT_DIR",
        default_value = DEFAULT_OUTPUT_DIR,
        global = true
    )]
    pub output_dir: PathBuf,

    /// Source files matching this regex are left out of the report
    #[arg(
        long,
        env = "COVERAGE_IGNORE_REGEX",
        default_value = DEFAULT_IGNORE_FILENAME_REGEX,
        global = true
    )]
    pub ignore_filename_regex: String,

    /// Symbol demangler passed to llvm-cov
    #[arg(long, env = "COVERAGE_DEMANGLER", default_value = DEFAULT_DEMANGLER, global = true)]
    pub demangler: String,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Html, global = true)]
    pub format: ReportFormat,

    /// Disable ANSI color in the rendered report
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Keep going when the instrumented test run fails
    #[arg(long, global = true)]
    pub allow_test_failures: bool,

    /// Leave raw .profraw files in place after merging
    #[arg(long, global = true)]
    pub keep_raw_profiles: bool,

    /// Allow removing coverage directories that live outside the cargo target directory
    #[arg(long, global = true)]
    pub force: bool,

    /// Extra arguments for `cargo test`; filled from the `report` subcommand.
    #[arg(skip)]
    pub cargo_args: Vec<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            workspace_root: None,
            raw_profile_dir: PathBuf::from(DEFAULT_RAW_PROFILE_DIR),
            profdata: PathBuf::from(DEFAULT_PROFDATA),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            ignore_filename_regex: DEFAULT_IGNORE_FILENAME_REGEX.to_string(),
            demangler: DEFAULT_DEMANGLER.to_string(),
            format: ReportFormat::Html,
            no_color: false,
            allow_test_failures: false,
            keep_raw_profiles: false,
            force: false,
            cargo_args: Vec::new(),
        }
    }
}

/// Resolved settings for one run. Paths are still relative until
/// [`ReportConfig::rooted`] anchors them to a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub workspace_root: Option<PathBuf>,
    pub raw_profile_dir: PathBuf,
    pub profdata: PathBuf,
    pub output_dir: PathBuf,
    pub ignore_filename_regex: String,
    pub demangler: String,
    pub format: ReportFormat,
    pub color: bool,
    pub allow_test_failures: bool,
    pub keep_raw_profiles: bool,
    pub force: bool,
    pub cargo_args: Vec<String>,
    /// `RUSTFLAGS` for both cargo invocations.
    pub rustflags: String,
    /// Cargo's build directory, from `CARGO_TARGET_DIR` when set.
    pub target_dir: PathBuf,
}

impl From<Args> for ReportConfig {
    fn from(value: Args) -> Self {
        let existing = std::env::var("RUSTFLAGS").ok();
        let target_dir = std::env::var_os("CARGO_TARGET_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR));
        Self {
            workspace_root: value.workspace_root,
            raw_profile_dir: value.raw_profile_dir,
            profdata: value.profdata,
            output_dir: value.output_dir,
            ignore_filename_regex: value.ignore_filename_regex,
            demangler: value.demangler,
            format: value.format,
            color: !value.no_color,
            allow_test_failures: value.allow_test_failures,
            keep_raw_profiles: value.keep_raw_profiles,
            force: value.force,
            cargo_args: value.cargo_args,
            rustflags: instrumented_rustflags(existing.as_deref()),
            target_dir,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self::from(Args::default())
    }
}

impl ReportConfig {
    /// Anchor every relative path at `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        self.raw_profile_dir = root.join(&self.raw_profile_dir);
        self.profdata = root.join(&self.profdata);
        self.output_dir = root.join(&self.output_dir);
        self.target_dir = root.join(&self.target_dir);
        self.workspace_root = Some(root.to_path_buf());
        self
    }

    /// Value for `LLVM_PROFILE_FILE`.
    pub fn profile_file_pattern(&self) -> PathBuf {
        self.raw_profile_dir.join(RAW_PROFILE_PATTERN)
    }
}

/// Append the instrumentation flag to whatever `RUSTFLAGS` the caller set,
/// unless those flags already turn coverage on.
pub fn instrumented_rustflags(existing: Option<&str>) -> String {
    let flags = existing.map(str::trim).unwrap_or_default();
    if flags.is_empty() {
        INSTRUMENT_FLAG.to_string()
    } else if coverage_enabled(flags) {
        flags.to_string()
    } else {
        format!("{flags} {INSTRUMENT_FLAG}")
    }
}

/// Whether the last `instrument-coverage` codegen option in `flags` enables
/// it. rustc lets later codegen options override earlier ones.
fn coverage_enabled(flags: &str) -> bool {
    let mut tokens = flags.split_whitespace();
    let mut enabled = false;
    while let Some(token) = tokens.next() {
        let option = match token {
            "-C" | "--codegen" => tokens.next(),
            other => other
                .strip_prefix("--codegen=")
                .or_else(|| other.strip_prefix("-C")),
        };
        let Some(option) = option else { continue };
        let (name, value) = option.split_once('=').unwrap_or((option, ""));
        if name == "instrument-coverage" {
            enabled = !matches!(value, "no" | "n" | "off" | "false");
        }
    }
    enabled
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use clap::Parser;
    use serial_test::serial;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: Args,
    }

    #[test]
    fn instrumented_rustflags__unset__then_only_instrument_flag() {
        assert_eq!(instrumented_rustflags(None), "-C instrument-coverage");
        assert_eq!(instrumented_rustflags(Some("  ")), "-C instrument-coverage");
    }

    #[test]
    fn instrumented_rustflags__existing_flags__then_appended() {
        assert_eq!(
            instrumented_rustflags(Some("-C target-cpu=native")),
            "-C target-cpu=native -C instrument-coverage"
        );
    }

    #[test]
    fn instrumented_rustflags__already_instrumented__then_unchanged() {
        assert_eq!(
            instrumented_rustflags(Some("-Cinstrument-coverage")),
            "-Cinstrument-coverage"
        );
    }

    #[test]
    fn instrumented_rustflags__explicitly_disabled__then_instrument_flag_appended() {
        assert_eq!(
            instrumented_rustflags(Some("-C instrument-coverage=off")),
            "-C instrument-coverage=off -C instrument-coverage"
        );
        assert_eq!(
            instrumented_rustflags(Some("-Cinstrument-coverage=no")),
            "-Cinstrument-coverage=no -C instrument-coverage"
        );
    }

    #[test]
    fn instrumented_rustflags__enabled_then_disabled__then_last_option_wins() {
        assert_eq!(
            instrumented_rustflags(Some("-Cinstrument-coverage --codegen=instrument-coverage=false")),
            "-Cinstrument-coverage --codegen=instrument-coverage=false -C instrument-coverage"
        );
        assert_eq!(
            instrumented_rustflags(Some("--codegen instrument-coverage=all")),
            "--codegen instrument-coverage=all"
        );
    }

    #[test]
    fn instrumented_rustflags__name_inside_other_value__then_appended() {
        assert_eq!(
            instrumented_rustflags(Some("--cfg instrument-coverage")),
            "--cfg instrument-coverage -C instrument-coverage"
        );
    }

    #[test]
    #[serial]
    fn args__no_arguments__then_hardcoded_defaults() {
        let cli = TestCli::try_parse_from(["coverage_report"]).unwrap();
        let config = ReportConfig::from(cli.args);

        assert_eq!(config.raw_profile_dir, PathBuf::from(DEFAULT_RAW_PROFILE_DIR));
        assert_eq!(config.profdata, PathBuf::from(DEFAULT_PROFDATA));
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.ignore_filename_regex, DEFAULT_IGNORE_FILENAME_REGEX);
        assert_eq!(config.demangler, "rustfilt");
        assert_eq!(config.format, ReportFormat::Html);
        assert!(config.color);
        assert!(!config.allow_test_failures);
        assert!(!config.keep_raw_profiles);
        assert!(!config.force);
        assert!(config.cargo_args.is_empty());
    }

    #[test]
    #[serial]
    fn args__overrides_and_cargo_args__then_carried_into_config() {
        let mut cli = TestCli::try_parse_from([
            "coverage_report",
            "--output-dir",
            "cov",
            "--format",
            "text",
            "--no-color",
            "--allow-test-failures",
        ])
        .unwrap();
        cli.args.cargo_args = vec!["--workspace".to_string(), "--all-features".to_string()];
        let config = ReportConfig::from(cli.args);

        assert_eq!(config.output_dir, PathBuf::from("cov"));
        assert_eq!(config.format, ReportFormat::Text);
        assert!(!config.color);
        assert!(config.allow_test_failures);
        assert_eq!(config.cargo_args, vec!["--workspace", "--all-features"]);
    }

    #[test]
    #[serial]
    fn report_config__rustflags_env__then_instrument_flag_appended() {
        std::env::set_var("RUSTFLAGS", "-D warnings");
        let config = ReportConfig::default();
        std::env::remove_var("RUSTFLAGS");

        assert_eq!(config.rustflags, "-D warnings -C instrument-coverage");
    }

    #[test]
    #[serial]
    fn report_config__rooted__then_relative_paths_anchored() {
        let config = ReportConfig::default().rooted(Path::new("/work/imged"));

        assert_eq!(config.workspace_root, Some(PathBuf::from("/work/imged")));
        assert_eq!(config.profdata, PathBuf::from("/work/imged/target/coverage/tests.profdata"));
        assert_eq!(config.output_dir, PathBuf::from("/work/imged/target/coverage/html"));
        assert_eq!(
            config.profile_file_pattern(),
            PathBuf::from("/work/imged/target/coverage/raw/tests-%p-%m.profraw")
        );
    }

    #[test]
    #[serial]
    fn report_config__cargo_target_dir_env__then_target_dir_follows_it() {
        std::env::set_var("CARGO_TARGET_DIR", "build");
        let relative = ReportConfig::default().rooted(Path::new("/work/imged"));
        std::env::set_var("CARGO_TARGET_DIR", "/cache/target");
        let absolute = ReportConfig::default().rooted(Path::new("/work/imged"));
        std::env::remove_var("CARGO_TARGET_DIR");
        let unset = ReportConfig::default().rooted(Path::new("/work/imged"));

        assert_eq!(relative.target_dir, PathBuf::from("/work/imged/build"));
        assert_eq!(absolute.target_dir, PathBuf::from("/cache/target"));
        assert_eq!(unset.target_dir, PathBuf::from("/work/imged/target"));
    }

    #[test]
    #[serial]
    fn report_config__rooted_with_absolute_path__then_absolute_path_kept() {
        let mut config = ReportConfig::default();
        config.output_dir = PathBuf::from("/srv/coverage");
        let config = config.rooted(Path::new("/work/imged"));

        assert_eq!(config.output_dir, PathBuf::from("/srv/coverage"));
    }
}
