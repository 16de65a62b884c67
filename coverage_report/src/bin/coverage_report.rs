use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use coverage_report::{
    clean, doctor, init_tracing, resolve_root, toolchain::Toolchain, Args, Pipeline,
    ReportConfig, ReportFormat,
};

/// Instrumented test run, profile merge and llvm-cov report for a cargo workspace.
#[derive(Parser)]
#[command(name = "coverage_report")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    args: Args,

    /// Defaults to `report`
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests with instrumentation, merge profiles and render the report
    Report {
        /// Arguments forwarded to both `cargo test` invocations
        #[arg(last = true)]
        cargo_args: Vec<String>,
    },
    /// Remove raw profiles, merged profile data and the rendered report
    Clean,
    /// Check that cargo, llvm-profdata, llvm-cov and the demangler are available
    Doctor {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut args = cli.args;
    match cli.command.unwrap_or(Commands::Report {
        cargo_args: Vec::new(),
    }) {
        Commands::Report { cargo_args } => {
            args.cargo_args = cargo_args;
            report(ReportConfig::from(args))
        }
        Commands::Clean => {
            let config = ReportConfig::from(args);
            let root = resolve_root(&config)?;
            let removed = clean::clean(&root, &config.rooted(&root))?;
            println!("Removed {} coverage artifact(s).", removed.len());
            Ok(())
        }
        Commands::Doctor { json } => {
            let report = doctor::run_checks(&args.demangler);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
            if !report.is_healthy() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn report(config: ReportConfig) -> Result<()> {
    let toolchain = Toolchain::detect(&config.demangler).context("Tool discovery failed")?;
    let root = resolve_root(&config)?;
    info!(root = %root.display(), "Using workspace");

    let mut pipeline = Pipeline::new(config.rooted(&root), toolchain);
    let summary = pipeline
        .run()
        .with_context(|| format!("Coverage report for {} failed", root.display()))?;

    if !summary.tests_passed {
        warn!("Report was generated from a failing test run");
    }
    match pipeline.config().format {
        ReportFormat::Html => {
            println!("Coverage report saved to: {}", summary.index_html().display())
        }
        ReportFormat::Text => {
            println!("Coverage report saved to: {}", summary.output_dir.display())
        }
    }
    Ok(())
}
