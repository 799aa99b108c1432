//! covpipe - Coverage Pipeline Runner CLI
//!
//! Builds kcov, runs the project's test binary under it and uploads the
//! coverage to Codecov. Running `covpipe` without arguments performs the
//! whole job with the built-in defaults.
//!
//! ## Commands
//!
//! - `run`: execute the pipeline (default)
//! - `plan`: print the resolved steps without running anything
//! - `discover`: print the test executable that would be instrumented

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use covpipe_core::{
    discover_executable, init_tracing, CoveragePipeline, HttpFetcher, OutputMode, PipelineConfig,
    PipelineReport,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "covpipe")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build kcov, collect test coverage and upload it to Codecov", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "COVPIPE_VERBOSE", value_parser = BoolishValueParser::new())]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "COVPIPE_JSON_LOGS", value_parser = BoolishValueParser::new())]
    json: bool,

    /// Write the run report as JSON to this file
    #[arg(long, global = true, env = "COVPIPE_REPORT")]
    report: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full coverage pipeline
    Run,

    /// Print the steps and commands a run would execute
    Plan,

    /// Print the test executable a run would instrument
    Discover,
}

/// Configuration layered over the defaults (or over `--config`).
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    /// JSON configuration file
    #[arg(long, global = true, env = "COVPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory (default: current directory)
    #[arg(long, global = true, env = "COVPIPE_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Glob matching the test executable, relative to the working directory
    #[arg(long, global = true, env = "COVPIPE_PATTERN")]
    pattern: Option<String>,

    /// Pick the most recently modified executable when several match
    #[arg(long, global = true, env = "COVPIPE_PICK_NEWEST", value_parser = BoolishValueParser::new())]
    pick_newest: bool,

    /// Coverage tool source archive
    #[arg(long, global = true, env = "COVPIPE_ARCHIVE_URL")]
    archive_url: Option<String>,

    /// Expected SHA-256 of the archive
    #[arg(long, global = true, env = "COVPIPE_ARCHIVE_SHA256")]
    archive_sha256: Option<String>,

    /// Staging install directory
    #[arg(long, global = true, env = "COVPIPE_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Coverage output directory
    #[arg(long, global = true, env = "COVPIPE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Comma-separated path patterns excluded from instrumentation
    #[arg(long, global = true, env = "COVPIPE_EXCLUDE", value_delimiter = ',')]
    exclude: Option<Vec<String>>,

    /// Uploader bootstrap script
    #[arg(long, global = true, env = "COVPIPE_UPLOADER_URL")]
    uploader_url: Option<String>,

    /// Stop after instrumentation
    #[arg(long, global = true, env = "COVPIPE_SKIP_UPLOAD", value_parser = BoolishValueParser::new())]
    skip_upload: bool,

    /// Capture command output instead of streaming it
    #[arg(long, global = true, env = "COVPIPE_QUIET_COMMANDS", value_parser = BoolishValueParser::new())]
    quiet_commands: bool,
}

impl ConfigOverrides {
    fn load(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(workdir) = &self.workdir {
            config.work_dir = workdir.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.discovery_pattern = pattern.clone();
        }
        if self.pick_newest {
            config.pick_newest = true;
        }
        if let Some(url) = &self.archive_url {
            config.archive_url = url.clone();
        }
        if let Some(digest) = &self.archive_sha256 {
            config.archive_sha256 = Some(digest.clone());
        }
        if let Some(dir) = &self.staging_dir {
            config.staging_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(exclude) = &self.exclude {
            config.exclude_patterns = exclude
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(url) = &self.uploader_url {
            config.uploader_url = url.clone();
        }
        if self.skip_upload {
            config.skip_upload = true;
        }
        if self.quiet_commands {
            config.output = OutputMode::Capture;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = cli.overrides.load()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(config, cli.report).await,
        Commands::Plan => cmd_plan(config),
        Commands::Discover => cmd_discover(config),
    }
}

async fn cmd_run(config: PipelineConfig, report_path: Option<PathBuf>) -> Result<ExitCode> {
    let fetcher = Arc::new(HttpFetcher::new().context("Failed to create HTTP client")?);
    let pipeline = CoveragePipeline::new(config, fetcher);

    let report = pipeline.run().await.context("Invalid configuration")?;

    if let Some(path) = report_path {
        write_report(&report, &path)?;
        info!(path = %path.display(), "Wrote run report");
    }

    if let Some(failure) = &report.failure {
        error!(
            step = %failure.step,
            kind = %failure.kind,
            "Coverage pipeline aborted: {}",
            failure.message
        );
    } else if let Some(dir) = &report.coverage_dir {
        println!("Coverage written to {}", dir.display());
    }

    Ok(exit_code(&report))
}

fn cmd_plan(config: PipelineConfig) -> Result<ExitCode> {
    config.validate().context("Invalid configuration")?;
    let pipeline = CoveragePipeline::new(
        config,
        Arc::new(HttpFetcher::new().context("Failed to create HTTP client")?),
    );

    for (index, planned) in pipeline.plan()?.iter().enumerate() {
        println!("{}. {}", index + 1, planned.step);
        for action in &planned.actions {
            println!("   {}", action);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_discover(config: PipelineConfig) -> Result<ExitCode> {
    let config = config.with_absolute_work_dir()?;
    match discover_executable(&config.work_dir, &config.discovery_pattern, config.pick_newest) {
        Ok(path) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "Discovery failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn write_report(report: &PipelineReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

fn exit_code(report: &PipelineReport) -> ExitCode {
    // PipelineReport::exit_code is always in 0..=255.
    ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1))
}
