//! Error types for the coverage pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure category of a pipeline step.
///
/// Every kind is handled the same way (the run stops), the category only
/// shows up in logs and in the JSON report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Configuration rejected before any step ran.
    Config,
    /// Downloading or unpacking the coverage tool archive failed.
    Fetch,
    /// Configuring, compiling, installing, or cleaning up the tool failed.
    Build,
    /// No test executable (or more than one) matched the discovery pattern.
    Discovery,
    /// The coverage tool itself failed.
    Instrumentation,
    /// Fetching or running the uploader bootstrap script failed.
    Upload,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Build => "build",
            ErrorKind::Discovery => "discovery",
            ErrorKind::Instrumentation => "instrumentation",
            ErrorKind::Upload => "upload",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while running the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to fetch {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Archive checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Failed to unpack {archive}: {reason}", archive = .path.display())]
    Unpack { path: PathBuf, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {stage} has empty command")]
    EmptyCommand { stage: String },

    #[error("Stage {stage} could not be started: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {stage} timed out after {timeout_secs} seconds")]
    Timeout { stage: String, timeout_secs: u64 },

    #[error("Stage {stage} exited with code {exit_code}")]
    StageFailed { stage: String, exit_code: i32 },

    #[error("Coverage tool not found at {tool} after install", tool = .0.display())]
    ToolMissing(PathBuf),

    #[error("Invalid discovery pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("No executable matches {pattern}")]
    NoExecutable { pattern: String },

    #[error("{count} executables match {pattern}: {list}", count = .candidates.len(), list = display_paths(.candidates))]
    AmbiguousExecutable {
        pattern: String,
        candidates: Vec<PathBuf>,
    },

    #[error("Invalid JSON in {file}: {source}", file = .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// Build a closure that wraps an `io::Error` with a message.
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> PipelineError {
        let context = context.into();
        move |source| PipelineError::Io { context, source }
    }

    /// Exit code of the external command behind this error, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PipelineError::StageFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
