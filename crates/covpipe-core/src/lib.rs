//! covpipe - Coverage Pipeline Runner
//!
//! Runs a CI coverage job end to end:
//! - Downloads, builds and installs kcov into a local staging directory
//! - Finds the compiled test executable
//! - Runs it under kcov and uploads the results through the Codecov bootstrap script
//!
//! The steps run strictly in order and the first failure ends the run.

pub mod config;
pub mod discover;
pub mod error;
pub mod fakes;
pub mod fetch;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod unpack;
pub mod upload;

// Re-export key types
pub use config::PipelineConfig;
pub use discover::discover_executable;
pub use error::{ErrorKind, PipelineError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use pipeline::{CoveragePipeline, PlannedStep};
pub use report::{PipelineReport, StepFailure, StepOutcome, StepRecord};
pub use runner::{CiRunner, StageResult};
pub use stage::{OutputMode, StageConfig, Step};
pub use telemetry::init_tracing;
