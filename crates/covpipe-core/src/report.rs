//! Run report: which steps ran, how long they took, and where the run stopped.

use crate::error::{ErrorKind, PipelineError};
use crate::stage::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    Skipped,
}

/// One executed (or skipped) step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
    pub duration_ms: u64,
}

/// Why the run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: Step,
    pub kind: ErrorKind,
    pub message: String,

    /// Exit code of the failing external command, when there was one.
    pub exit_code: Option<i32>,
}

impl StepFailure {
    pub fn new(step: Step, error: &PipelineError) -> Self {
        Self {
            step,
            kind: step.error_kind(),
            message: error.to_string(),
            exit_code: error.exit_code(),
        }
    }
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Whether every step passed (skipped steps count as passed).
    pub success: bool,

    /// Steps in execution order. Nothing after a failed step appears here.
    pub steps: Vec<StepRecord>,

    /// SHA-256 of the downloaded archive.
    pub archive_sha256: Option<String>,

    /// Discovered test executable.
    pub executable: Option<PathBuf>,

    /// Directory the coverage tool wrote to.
    pub coverage_dir: Option<PathBuf>,

    pub failure: Option<StepFailure>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            steps: Vec::new(),
            archive_sha256: None,
            executable: None,
            coverage_dir: None,
            failure: None,
            duration_ms: 0,
        }
    }

    pub fn record_pass(&mut self, step: Step, duration_ms: u64) {
        self.steps.push(StepRecord {
            step,
            outcome: StepOutcome::Passed,
            duration_ms,
        });
    }

    pub fn record_skip(&mut self, step: Step) {
        self.steps.push(StepRecord {
            step,
            outcome: StepOutcome::Skipped,
            duration_ms: 0,
        });
    }

    pub fn record_failure(&mut self, step: Step, duration_ms: u64, error: &PipelineError) {
        self.steps.push(StepRecord {
            step,
            outcome: StepOutcome::Failed,
            duration_ms,
        });
        self.failure = Some(StepFailure::new(step, error));
    }

    /// Seal the report once no more steps will run.
    pub fn finish(mut self) -> Self {
        let now = Utc::now();
        self.success = self.failure.is_none();
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.finished_at = Some(now);
        self
    }

    /// Number of steps that passed.
    pub fn passed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Passed)
            .count()
    }

    /// Whether `step` ran (passed or failed).
    pub fn ran(&self, step: Step) -> bool {
        self.steps
            .iter()
            .any(|s| s.step == step && s.outcome != StepOutcome::Skipped)
    }

    pub fn failed_step(&self) -> Option<Step> {
        self.failure.as_ref().map(|f| f.step)
    }

    /// Process exit code for this run.
    ///
    /// 0 on success; otherwise the failing command's exit code when it fits
    /// in 1..=255, else 1.
    pub fn exit_code(&self) -> i32 {
        match &self.failure {
            None => 0,
            Some(failure) => match failure.exit_code {
                Some(code) if (1..=255).contains(&code) => code,
                _ => 1,
            },
        }
    }
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_failure(code: i32) -> PipelineError {
        PipelineError::StageFailed {
            stage: "build".to_string(),
            exit_code: code,
        }
    }

    #[test]
    fn test_report_success() {
        let mut report = PipelineReport::new();
        report.record_pass(Step::Fetch, 10);
        report.record_pass(Step::Unpack, 5);
        let report = report.finish();

        assert!(report.success);
        assert_eq!(report.passed_count(), 2);
        assert_eq!(report.exit_code(), 0);
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_report_failure() {
        let mut report = PipelineReport::new();
        report.record_pass(Step::Fetch, 10);
        report.record_failure(Step::Build, 20, &stage_failure(2));
        let report = report.finish();

        assert!(!report.success);
        assert_eq!(report.failed_step(), Some(Step::Build));
        assert_eq!(report.failure.as_ref().unwrap().kind, ErrorKind::Build);
        assert_eq!(report.exit_code(), 2);
        assert!(report.ran(Step::Build));
        assert!(!report.ran(Step::Install));
    }

    #[test]
    fn test_exit_code_falls_back_to_one() {
        let mut no_status = PipelineReport::new();
        no_status.record_failure(Step::Instrument, 1, &stage_failure(-1));
        assert_eq!(no_status.finish().exit_code(), 1);

        let mut discovery = PipelineReport::new();
        discovery.record_failure(
            Step::Discover,
            1,
            &PipelineError::NoExecutable {
                pattern: "x".to_string(),
            },
        );
        assert_eq!(discovery.finish().exit_code(), 1);
    }

    #[test]
    fn test_exit_code_keeps_signal_status() {
        let mut report = PipelineReport::new();
        report.record_failure(Step::Build, 1, &stage_failure(137));
        assert_eq!(report.finish().exit_code(), 137);
    }

    #[test]
    fn test_skipped_step_not_counted_as_ran() {
        let mut report = PipelineReport::new();
        report.record_skip(Step::Upload);
        let report = report.finish();
        assert!(report.success);
        assert!(!report.ran(Step::Upload));
        assert_eq!(report.passed_count(), 0);
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = PipelineReport::new();
        report.record_failure(
            Step::Discover,
            3,
            &PipelineError::NoExecutable {
                pattern: "target/debug/deps/carta_schema-*".to_string(),
            },
        );
        let json = serde_json::to_value(report.finish()).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["steps"][0]["step"], "discover");
        assert_eq!(json["steps"][0]["outcome"], "failed");
        assert_eq!(json["failure"]["kind"], "discovery");
        assert!(json["failure"]["exit_code"].is_null());
    }
}
