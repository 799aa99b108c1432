//! Coverage pipeline orchestration.

use crate::config::PipelineConfig;
use crate::discover::discover_executable;
use crate::error::{PipelineError, Result};
use crate::fetch::{fetch_archive, Fetcher};
use crate::report::PipelineReport;
use crate::runner::CiRunner;
use crate::stage::{StageConfig, Step, TemplateVars};
use crate::unpack::unpack_archive;
use crate::upload::{upload, upload_stage};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One entry of [`CoveragePipeline::plan`].
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub step: Step,

    /// What the step does, with commands rendered as they will run.
    pub actions: Vec<String>,
}

/// Coverage pipeline: build the coverage tool, instrument the test binary,
/// upload the results.
pub struct CoveragePipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
}

impl CoveragePipeline {
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { config, fetcher }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The ordered steps with their resolved commands. Runs nothing.
    ///
    /// The source tree is only known after unpacking and shows up as
    /// `<source>`; the test executable as `<executable>`.
    pub fn plan(&self) -> Result<Vec<PlannedStep>> {
        let config = self.config.with_absolute_work_dir()?;
        let source_dir = PathBuf::from("<source>");
        let build_dir = source_dir.join(&config.build_subdir);
        let vars = template_vars(&config, &source_dir, &build_dir);
        let executable = PathBuf::from("<executable>");

        let mut plan = Vec::with_capacity(Step::ALL.len());
        for step in Step::ALL {
            let actions = match step {
                Step::Fetch => {
                    let mut actions = vec![format!(
                        "download {} -> {}",
                        config.archive_url,
                        config.archive_path().display()
                    )];
                    if let Some(digest) = &config.archive_sha256 {
                        actions.push(format!("verify sha256 {}", digest));
                    }
                    actions
                }
                Step::Unpack => vec![format!(
                    "extract {} into {}",
                    config.archive_path().display(),
                    config.work_dir.display()
                )],
                Step::Build => build_stages(&config, &vars, &build_dir)
                    .iter()
                    .map(|s| s.command_line())
                    .collect(),
                Step::Install => vec![
                    install_stage(&config, &vars, &build_dir).command_line(),
                    format!("expect {}", config.tool_binary().display()),
                ],
                Step::Clean => vec![
                    format!("remove {}", source_dir.display()),
                    format!("remove {}", config.archive_path().display()),
                ],
                Step::Discover => vec![format!(
                    "glob {} under {}{}",
                    config.discovery_pattern,
                    config.work_dir.display(),
                    if config.pick_newest { " (newest wins)" } else { "" }
                )],
                Step::Instrument => {
                    vec![instrument_stage(&config, &executable).command_line()]
                }
                Step::Upload if config.skip_upload => vec!["skipped".to_string()],
                Step::Upload => vec![
                    format!("download {}", config.uploader_url),
                    format!(
                        "pipe into {}",
                        upload_stage(&config, Vec::new()).command_line()
                    ),
                ],
            };
            plan.push(PlannedStep { step, actions });
        }
        Ok(plan)
    }

    /// Execute every step in order, stopping at the first failure.
    ///
    /// Step failures are reported in the returned `PipelineReport`; `Err` is
    /// only returned for configuration problems found before any step runs.
    pub async fn run(&self) -> Result<PipelineReport> {
        self.config.validate()?;
        let config = self.config.with_absolute_work_dir()?;
        let mut report = PipelineReport::new();

        info!(run_id = %report.run_id, work_dir = %config.work_dir.display(), "Starting coverage pipeline");

        let archive = config.archive_path();

        let Some(digest) = run_step(&mut report, Step::Fetch, async {
            fetch_archive(
                self.fetcher.as_ref(),
                &config.archive_url,
                &archive,
                config.archive_sha256.as_deref(),
            )
            .await
        })
        .await
        else {
            return Ok(report.finish());
        };
        report.archive_sha256 = Some(digest);

        let Some(source_dir) = run_step(&mut report, Step::Unpack, async {
            unpack_archive(&archive, &config.work_dir).await
        })
        .await
        else {
            return Ok(report.finish());
        };

        let build_dir = source_dir.join(&config.build_subdir);
        let vars = template_vars(&config, &source_dir, &build_dir);

        let built = run_step(&mut report, Step::Build, async {
            tokio::fs::create_dir_all(&build_dir)
                .await
                .map_err(PipelineError::io(format!("creating {}", build_dir.display())))?;
            for stage in build_stages(&config, &vars, &build_dir) {
                run_command(&stage).await?;
            }
            Ok::<(), PipelineError>(())
        })
        .await;
        if built.is_none() {
            return Ok(report.finish());
        }

        let installed = run_step(&mut report, Step::Install, async {
            run_command(&install_stage(&config, &vars, &build_dir)).await?;
            let tool = config.tool_binary();
            if !tool.is_file() {
                return Err(PipelineError::ToolMissing(tool));
            }
            Ok::<(), PipelineError>(())
        })
        .await;
        if installed.is_none() {
            return Ok(report.finish());
        }

        let cleaned = run_step(&mut report, Step::Clean, async {
            remove_source(&source_dir, &archive).await
        })
        .await;
        if cleaned.is_none() {
            return Ok(report.finish());
        }

        let Some(executable) = run_step(&mut report, Step::Discover, async {
            discover_executable(&config.work_dir, &config.discovery_pattern, config.pick_newest)
        })
        .await
        else {
            return Ok(report.finish());
        };
        report.executable = Some(executable.clone());

        let Some(coverage_dir) = run_step(&mut report, Step::Instrument, async {
            let stage = instrument_stage(&config, &executable);
            let out = coverage_dir_for(&config, &executable);
            tokio::fs::create_dir_all(&out)
                .await
                .map_err(PipelineError::io(format!("creating {}", out.display())))?;
            run_command(&stage).await?;
            Ok::<PathBuf, PipelineError>(out)
        })
        .await
        else {
            return Ok(report.finish());
        };
        report.coverage_dir = Some(coverage_dir);

        if config.skip_upload {
            info!("Skipping upload");
            report.record_skip(Step::Upload);
        } else {
            run_step(&mut report, Step::Upload, async {
                upload(self.fetcher.as_ref(), &config).await
            })
            .await;
        }

        let report = report.finish();
        if report.success {
            info!(run_id = %report.run_id, duration_ms = report.duration_ms, "Coverage pipeline completed successfully");
        } else {
            info!(run_id = %report.run_id, "Coverage pipeline failed");
        }
        Ok(report)
    }
}

/// Run one step, recording its outcome. `None` means the step failed.
async fn run_step<T, F>(report: &mut PipelineReport, step: Step, work: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    info!(step = %step, "Executing step");
    let start = Instant::now();
    let result = work.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(value) => {
            info!(step = %step, duration_ms, "Step passed");
            report.record_pass(step, duration_ms);
            Some(value)
        }
        Err(e) => {
            error!(step = %step, kind = %step.error_kind(), error = %e, "Step failed");
            report.record_failure(step, duration_ms, &e);
            None
        }
    }
}

/// Run an external command; a nonzero exit is an error.
async fn run_command(stage: &StageConfig) -> Result<()> {
    info!(stage = %stage.name, command = %stage.command_line(), "Running");
    let result = CiRunner::execute_stage(stage).await?;
    debug!(stage = %stage.name, duration_ms = result.duration_ms, exit_code = result.exit_code, "Finished");

    if !result.passed() {
        if !result.stderr.is_empty() {
            warn!(stage = %stage.name, stderr = %result.stderr.trim_end(), "Command output");
        }
        return Err(PipelineError::StageFailed {
            stage: stage.name.clone(),
            exit_code: result.exit_code,
        });
    }
    Ok(())
}

fn template_vars(config: &PipelineConfig, source_dir: &Path, build_dir: &Path) -> TemplateVars {
    TemplateVars::new()
        .set("work_dir", config.work_dir.to_string_lossy())
        .set("source_dir", source_dir.to_string_lossy())
        .set("build_dir", build_dir.to_string_lossy())
        .set("staging_dir", config.staging_path().to_string_lossy())
}

/// Configure and compile commands; an empty configure command is skipped.
fn build_stages(config: &PipelineConfig, vars: &TemplateVars, build_dir: &Path) -> Vec<StageConfig> {
    let timeout = config.timeout_for(Step::Build);
    let mut stages = Vec::new();
    if !config.configure_command.is_empty() {
        stages.push(
            StageConfig::from_template("configure", &config.configure_command, vars, timeout)
                .in_dir(build_dir)
                .with_output(config.output),
        );
    }
    stages.push(
        StageConfig::from_template("compile", &config.build_command, vars, timeout)
            .in_dir(build_dir)
            .with_output(config.output),
    );
    stages
}

fn install_stage(config: &PipelineConfig, vars: &TemplateVars, build_dir: &Path) -> StageConfig {
    StageConfig::from_template(
        Step::Install.name(),
        &config.install_command,
        vars,
        config.timeout_for(Step::Install),
    )
    .in_dir(build_dir)
    .with_output(config.output)
}

fn coverage_dir_for(config: &PipelineConfig, executable: &Path) -> PathBuf {
    let name = executable
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "coverage".into());
    config.output_path().join(name)
}

/// `kcov --exclude-pattern=<patterns> <tool args> <output dir> <executable>`
fn instrument_stage(config: &PipelineConfig, executable: &Path) -> StageConfig {
    let mut command = vec![config.tool_binary().to_string_lossy().into_owned()];
    if !config.exclude_patterns.is_empty() {
        command.push(format!(
            "--exclude-pattern={}",
            config.exclude_patterns.join(",")
        ));
    }
    command.extend(config.tool_args.iter().cloned());
    command.push(coverage_dir_for(config, executable).to_string_lossy().into_owned());
    command.push(executable.to_string_lossy().into_owned());

    StageConfig::custom(
        Step::Instrument.name(),
        command,
        config.timeout_for(Step::Instrument),
    )
    .in_dir(&config.work_dir)
    .with_output(config.output)
}

async fn remove_source(source_dir: &Path, archive: &Path) -> Result<()> {
    info!(source = %source_dir.display(), "Removing source tree");
    tokio::fs::remove_dir_all(source_dir)
        .await
        .map_err(PipelineError::io(format!("removing {}", source_dir.display())))?;
    match tokio::fs::remove_file(archive).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::Io {
            context: format!("removing {}", archive.display()),
            source: e,
        }),
    }
}
