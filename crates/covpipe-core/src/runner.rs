//! External command execution.

use crate::error::{PipelineError, Result};
use crate::stage::{OutputMode, StageConfig};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success). A child killed by signal N reports 128 + N,
    /// the way a shell does.
    pub exit_code: i32,

    /// Captured stdout (empty unless the stage captures output).
    pub stdout: String,

    /// Captured stderr (empty unless the stage captures output).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Runs one external command.
pub struct CiRunner;

impl CiRunner {
    /// Execute a single stage and return the result.
    ///
    /// A nonzero exit is reported through `StageResult`; failing to spawn the
    /// command or hitting the timeout is an error.
    pub async fn execute_stage(config: &StageConfig) -> Result<StageResult> {
        let start = Instant::now();

        let Some((exe, args)) = config.command.split_first() else {
            return Err(PipelineError::EmptyCommand {
                stage: config.name.clone(),
            });
        };

        debug!(stage = %config.name, command = %config.command_line(), "Spawning");

        let mut command = Command::new(exe);
        command.args(args).envs(&config.env).kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        command.stdin(if config.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        match config.output {
            OutputMode::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Inherit => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
            stage: config.name.clone(),
            source,
        })?;

        // Stdin is fed concurrently with output collection.
        let feeder = match (&config.stdin, child.stdin.take()) {
            (Some(data), Some(mut stdin)) => {
                let data = data.clone();
                let stage = config.name.clone();
                Some(tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&data).await {
                        debug!(stage = %stage, error = %e, "Child closed stdin early");
                    }
                }))
            }
            _ => None,
        };

        let waited = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: config.name.clone(),
                timeout_secs: config.timeout_secs,
            })?
        } else {
            child.wait_with_output().await
        };
        let output =
            waited.map_err(PipelineError::io(format!("waiting for stage {}", config.name)))?;

        if let Some(feeder) = feeder {
            let _ = feeder.await;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = exit_code_of(output.status);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let success = output.status.success();

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success,
        })
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
