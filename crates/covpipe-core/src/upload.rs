//! Coverage upload through the uploader bootstrap script.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::fetch::Fetcher;
use crate::runner::{CiRunner, StageResult};
use crate::stage::{StageConfig, Step};
use tracing::info;

/// Build the stage that pipes `script` into the configured shell.
pub fn upload_stage(config: &PipelineConfig, script: Vec<u8>) -> StageConfig {
    let mut command = config.uploader_shell.clone();
    command.extend(config.uploader_args.iter().cloned());

    StageConfig::custom(Step::Upload.name(), command, config.timeout_for(Step::Upload))
        .in_dir(&config.work_dir)
        .with_stdin(script)
        .with_output(config.output)
}

/// Fetch the bootstrap script and run it from the working directory.
///
/// The script inherits the process environment, so tokens and CI metadata
/// (`CODECOV_TOKEN`, `CI`, ...) reach it unchanged.
pub async fn upload(fetcher: &dyn Fetcher, config: &PipelineConfig) -> Result<StageResult> {
    info!(url = %config.uploader_url, "Fetching uploader script");
    let script = fetcher.fetch_bytes(&config.uploader_url).await?;
    if script.is_empty() {
        return Err(PipelineError::Fetch {
            url: config.uploader_url.clone(),
            reason: "uploader script is empty".to_string(),
        });
    }

    let stage = upload_stage(config, script);
    info!(command = %stage.command_line(), "Running uploader");
    let result = CiRunner::execute_stage(&stage).await?;
    if !result.passed() {
        return Err(PipelineError::StageFailed {
            stage: stage.name,
            exit_code: result.exit_code,
        });
    }
    Ok(result)
}
