//! Pipeline configuration
//!
//! Defaults reproduce the classic kcov + Codecov CI job. A JSON file may
//! override any subset of fields; the CLI layers `COVPIPE_*` environment
//! variables and flags on top.

use crate::error::{PipelineError, Result};
use crate::stage::{OutputMode, Step};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// kcov release built by default.
pub const DEFAULT_ARCHIVE_URL: &str = "https://github.com/SimonKagstrom/kcov/archive/v38.tar.gz";

/// Codecov bash uploader.
pub const DEFAULT_UPLOADER_URL: &str = "https://codecov.io/bash";

/// Test binaries produced by `cargo test` for the schema compiler.
pub const DEFAULT_DISCOVERY_PATTERN: &str = "target/debug/deps/carta_schema-*";

/// Configuration for one coverage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory every relative path below is resolved against.
    pub work_dir: PathBuf,

    /// Coverage tool source release (`.tar.gz`).
    pub archive_url: String,

    /// Expected SHA-256 of the archive (hex). Unchecked when unset.
    pub archive_sha256: Option<String>,

    /// File name the archive is downloaded to.
    pub archive_file: String,

    /// Build directory, relative to the unpacked source tree.
    pub build_subdir: String,

    /// Configure command, run in the build directory.
    pub configure_command: Vec<String>,

    /// Compile command, run in the build directory.
    pub build_command: Vec<String>,

    /// Install command, run in the build directory.
    pub install_command: Vec<String>,

    /// Surrogate install root (`DESTDIR`). Never cleaned up.
    pub staging_dir: PathBuf,

    /// Location of the installed tool, relative to `staging_dir`.
    pub tool_path: PathBuf,

    /// Glob, relative to `work_dir`, matching the test executable.
    pub discovery_pattern: String,

    /// Resolve multiple matches to the most recently modified one.
    pub pick_newest: bool,

    /// Path patterns excluded from instrumentation.
    pub exclude_patterns: Vec<String>,

    /// Extra coverage tool arguments, before the output directory.
    pub tool_args: Vec<String>,

    /// Coverage output root; each run writes to `<output_dir>/<executable name>`.
    pub output_dir: PathBuf,

    /// Uploader bootstrap script.
    pub uploader_url: String,

    /// Interpreter the bootstrap script is piped into.
    pub uploader_shell: Vec<String>,

    /// Arguments passed to the bootstrap script.
    pub uploader_args: Vec<String>,

    /// Stop after instrumentation.
    pub skip_upload: bool,

    /// Timeout for configure/build/install commands (0 = none).
    pub build_timeout_secs: u64,

    /// Timeout for the coverage tool (0 = none).
    pub instrument_timeout_secs: u64,

    /// Timeout for the uploader (0 = none).
    pub upload_timeout_secs: u64,

    /// Output handling for every external command.
    pub output: OutputMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            archive_sha256: None,
            archive_file: "kcov.tar.gz".to_string(),
            build_subdir: "build".to_string(),
            configure_command: strings(&["cmake", ".."]),
            build_command: strings(&["make"]),
            install_command: strings(&["make", "install", "DESTDIR={staging_dir}"]),
            staging_dir: PathBuf::from("kcov-build"),
            tool_path: PathBuf::from("usr/local/bin/kcov"),
            discovery_pattern: DEFAULT_DISCOVERY_PATTERN.to_string(),
            pick_newest: false,
            exclude_patterns: strings(&["/.cargo", "/usr/lib"]),
            tool_args: strings(&["--verify"]),
            output_dir: PathBuf::from("target/cov"),
            uploader_url: DEFAULT_UPLOADER_URL.to_string(),
            uploader_shell: strings(&["bash", "-s", "--"]),
            uploader_args: Vec::new(),
            skip_upload: false,
            build_timeout_secs: 0,
            instrument_timeout_secs: 0,
            upload_timeout_secs: 600,
            output: OutputMode::Inherit,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(PipelineError::io(format!("reading {}", path.display())))?;
        serde_json::from_str(&content).map_err(|source| PipelineError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check that every value the pipeline needs is present.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("archive_url", self.archive_url.trim().is_empty()),
            ("archive_file", self.archive_file.trim().is_empty()),
            ("discovery_pattern", self.discovery_pattern.trim().is_empty()),
            ("build_command", self.build_command.is_empty()),
            ("install_command", self.install_command.is_empty()),
            ("staging_dir", self.staging_dir.as_os_str().is_empty()),
            ("tool_path", self.tool_path.as_os_str().is_empty()),
            ("output_dir", self.output_dir.as_os_str().is_empty()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(PipelineError::Config(format!("{} must not be empty", field)));
        }

        if !self.skip_upload {
            if self.uploader_url.trim().is_empty() {
                return Err(PipelineError::Config(
                    "uploader_url must not be empty".to_string(),
                ));
            }
            if self.uploader_shell.is_empty() {
                return Err(PipelineError::Config(
                    "uploader_shell must not be empty".to_string(),
                ));
            }
        }

        if let Some(digest) = &self.archive_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(PipelineError::Config(format!(
                    "archive_sha256 is not a SHA-256 hex digest: {}",
                    digest
                )));
            }
        }

        Ok(())
    }

    /// Copy of this configuration with `work_dir` made absolute.
    ///
    /// Commands run from inside the build tree, so every path handed to them
    /// must be absolute.
    pub fn with_absolute_work_dir(&self) -> Result<Self> {
        let mut config = self.clone();
        if config.work_dir.is_relative() {
            let cwd = std::env::current_dir()
                .map_err(PipelineError::io("resolving the current directory"))?;
            config.work_dir = cwd.join(&config.work_dir);
        }
        Ok(config)
    }

    /// Resolve a configured path against `work_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(&self.archive_file)
    }

    pub fn staging_path(&self) -> PathBuf {
        self.resolve(&self.staging_dir)
    }

    /// Installed coverage tool.
    pub fn tool_binary(&self) -> PathBuf {
        self.staging_path().join(&self.tool_path)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    /// Timeout for a step's external commands.
    pub fn timeout_for(&self, step: Step) -> u64 {
        match step {
            Step::Build | Step::Install => self.build_timeout_secs,
            Step::Instrument => self.instrument_timeout_secs,
            Step::Upload => self.upload_timeout_secs,
            _ => 0,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
