//! Pipeline steps and external command configuration.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// The eight steps of a coverage run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Download the coverage tool release archive.
    Fetch,

    /// Extract the archive into the working directory.
    Unpack,

    /// Configure and compile the tool.
    Build,

    /// Install the tool into the staging directory.
    Install,

    /// Remove the unpacked source tree and the archive.
    Clean,

    /// Find the test executable to instrument.
    Discover,

    /// Run the test executable under the coverage tool.
    Instrument,

    /// Hand the coverage data to the uploader bootstrap script.
    Upload,
}

impl Step {
    /// All steps in execution order.
    pub const ALL: [Step; 8] = [
        Step::Fetch,
        Step::Unpack,
        Step::Build,
        Step::Install,
        Step::Clean,
        Step::Discover,
        Step::Instrument,
        Step::Upload,
    ];

    /// Get the step name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Fetch => "fetch",
            Step::Unpack => "unpack",
            Step::Build => "build",
            Step::Install => "install",
            Step::Clean => "clean",
            Step::Discover => "discover",
            Step::Instrument => "instrument",
            Step::Upload => "upload",
        }
    }

    /// Failure category reported when this step fails.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Step::Fetch | Step::Unpack => ErrorKind::Fetch,
            Step::Build | Step::Install | Step::Clean => ErrorKind::Build,
            Step::Discover => ErrorKind::Discovery,
            Step::Instrument => ErrorKind::Instrumentation,
            Step::Upload => ErrorKind::Upload,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What happens to a command's stdout and stderr.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Stream to the parent's stdout/stderr (CI log).
    #[default]
    Inherit,

    /// Collect into the `StageResult`.
    Capture,
}

/// Configuration for one external command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Directory to run in (inherits the current directory if unset).
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables.
    pub env: BTreeMap<String, String>,

    /// Bytes written to the child's stdin before it is closed.
    #[serde(skip)]
    pub stdin: Option<Vec<u8>>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,

    /// Output handling.
    pub output: OutputMode,
}

impl StageConfig {
    /// Create a custom stage configuration.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
            env: BTreeMap::new(),
            stdin: None,
            timeout_secs,
            output: OutputMode::default(),
        }
    }

    /// Create a stage from a command template, expanding `{placeholders}`.
    pub fn from_template(
        name: impl Into<String>,
        template: &[String],
        vars: &TemplateVars,
        timeout_secs: u64,
    ) -> Self {
        let command = template.iter().map(|arg| vars.expand(arg)).collect();
        Self::custom(name, command, timeout_secs)
    }

    /// Run in the given directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Feed `data` to the child's stdin.
    pub fn with_stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    /// Set output handling.
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// The command line as a POSIX shell would need it typed, for logs and
    /// plans.
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| shell_quote(arg.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Single-quote `arg` unless it only holds characters the shell reads literally.
fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Values substituted into command templates.
///
/// `{name}` is replaced by the value registered under `name`; unknown
/// placeholders are left as-is.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.vars.insert(name, value.into());
        self
    }

    pub fn expand(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (name, value) in &self.vars {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}
