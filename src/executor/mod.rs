//! Command execution abstraction for kagami.
//!
//! This module provides:
//! - [`CommandSpec`]: Specification for commands to execute
//! - [`ExecutionResult`]: Result of command execution
//! - [`CommandExecutor`]: Trait for command execution strategies
//! - [`RealCommandExecutor`]: Production implementation using `std::process::Command`

mod pipe;
mod real;

use std::process::ExitStatus;

use anyhow::Result;
use camino::Utf8PathBuf;

use crate::error::KagamiError;

pub use real::RealCommandExecutor;

/// Formats string arguments into a space-separated, debug-quoted string.
///
/// Used by error messages to consistently format command arguments
/// (e.g., `"--variant=minbase" "/work/chroot"`).
pub(crate) fn format_command_args(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("{:?}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Specification for a command to be executed
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The command to execute (e.g., "debootstrap")
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Working directory (optional, defaults to current directory)
    pub cwd: Option<Utf8PathBuf>,
    /// Environment variables to set (in addition to inherited environment)
    pub env: Vec<(String, String)>,
    /// Bytes written to the child's standard input before waiting on it
    pub stdin: Option<Vec<u8>>,
    /// Collect stdout into [`ExecutionResult::stdout`] instead of logging it
    pub capture_stdout: bool,
}

impl CommandSpec {
    /// Creates a new CommandSpec with command and args
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
            env: Vec::new(),
            stdin: None,
            capture_stdout: false,
        }
    }

    /// Sets the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: Utf8PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Adds an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds multiple environment variables.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Feeds the given bytes to the command's standard input.
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Captures standard output instead of streaming it to the log.
    #[must_use]
    pub fn capturing(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Returns the command line as a list of strings, command first.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.command.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Result of command execution
#[derive(Debug)]
pub struct ExecutionResult {
    /// Exit status of the command
    pub status: ExitStatus,
    /// Captured standard output (empty unless `capture_stdout` was set)
    pub stdout: Vec<u8>,
}

impl ExecutionResult {
    /// Returns true if the command executed successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Returns the exit code if available
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Returns captured stdout decoded as UTF-8 (lossy).
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Trait for command execution.
///
/// Implementations must be `Send + Sync` so the executor can be shared
/// as `Arc<dyn CommandExecutor>` with a build running on a background thread.
pub trait CommandExecutor: Send + Sync {
    /// Executes a command with the given specification.
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult>;

    /// Executes a command and turns a non-zero exit status into
    /// [`KagamiError::Execution`].
    fn execute_checked(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let result = self.execute(spec)?;
        if !result.success() {
            return Err(KagamiError::execution(spec, result.status.to_string()).into());
        }
        Ok(result)
    }
}
