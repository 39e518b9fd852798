use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::utils::write_atomically;

const FILE_PLACEHOLDER: &str = "{file}";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Test runner unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to write test source to {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Outcome of one test run. A failing suite is still a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    /// Process exit code, -1 when killed by a signal or the timeout
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Runs a test file and reports pass/fail
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Write `source` to `target_file` (replacing it) and run it
    async fn execute(&self, source: &str, target_file: &Path) -> Result<ExecutionReport>;
}

/// Runs an external test command such as `python -m pytest {file} -v`
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRunner {
    /// `args` may contain `{file}`; otherwise the file is appended
    pub fn new<S: Into<String>>(program: S, args: Vec<String>, timeout: Duration) -> Self {
        CommandRunner {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        match &config.command {
            Some(command) => {
                let mut parts = command.split_whitespace().map(String::from);
                let program = parts
                    .next()
                    .ok_or_else(|| RunnerError::Unavailable("empty runner command".into()))?;
                Ok(CommandRunner::new(program, parts.collect(), config.timeout))
            }
            None => {
                let (program, args) = config.framework.default_command();
                Ok(CommandRunner::new(
                    program,
                    args.iter().map(|arg| arg.to_string()).collect(),
                    config.timeout,
                ))
            }
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for a run against `target_file`
    pub fn command_args(&self, target_file: &Path) -> Vec<String> {
        let file = target_file.display().to_string();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &file))
            .collect();

        if !self.args.iter().any(|arg| arg.contains(FILE_PLACEHOLDER)) {
            args.push(file);
        }
        args
    }
}

#[async_trait]
impl TestRunner for CommandRunner {
    async fn execute(&self, source: &str, target_file: &Path) -> Result<ExecutionReport> {
        write_atomically(target_file, source).map_err(|err| RunnerError::WriteFailed {
            path: target_file.to_path_buf(),
            source: err,
        })?;

        let args = self.command_args(target_file);
        debug!(program = %self.program, ?args, "spawning test run");

        let started = Instant::now();
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Unavailable(format!("cannot start `{}`: {}", self.program, e)))?;

        // Dropping the wait future on timeout drops the child, which kills it
        let waited = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let report = match waited {
            Ok(Ok(output)) => ExecutionReport {
                succeeded: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
                duration_ms,
            },
            Ok(Err(e)) => {
                return Err(RunnerError::Unavailable(format!(
                    "waiting for `{}`: {}",
                    self.program, e
                )))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "test run timed out");
                ExecutionReport {
                    succeeded: false,
                    stdout: String::new(),
                    stderr: format!("test run timed out after {:?}", self.timeout),
                    exit_code: -1,
                    timed_out: true,
                    duration_ms,
                }
            }
        };

        info!(
            succeeded = report.succeeded,
            exit_code = report.exit_code,
            duration_ms,
            "test run finished"
        );
        Ok(report)
    }
}
