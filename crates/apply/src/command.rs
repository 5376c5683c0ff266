//! External command invocation behind an injectable runner.

use std::fmt;
use std::process::Stdio;

use hoist_core::{HoistError, HoistResult};
use tracing::debug;

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmCommand {
    program: String,
    args: Vec<String>,
}

impl HelmCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for HelmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            if a.is_empty() || a.contains(char::is_whitespace) {
                write!(f, " '{}'", a)?;
            } else {
                write!(f, " {}", a)?;
            }
        }
        Ok(())
    }
}

/// Runs commands for steps and executors.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with inherited stdout/stderr.
    async fn run(&self, cmd: &HelmCommand) -> HoistResult<()>;

    /// Run to completion and capture stdout.
    async fn output(&self, cmd: &HelmCommand) -> HoistResult<Vec<u8>>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    fn command(cmd: &HelmCommand) -> tokio::process::Command {
        let mut c = tokio::process::Command::new(cmd.program());
        c.args(cmd.get_args());
        c
    }
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, cmd: &HelmCommand) -> HoistResult<()> {
        debug!(command = %cmd, "running");
        let status = Self::command(cmd)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| HoistError::command(cmd, format!("spawn: {}", e)))?;
        if !status.success() {
            return Err(HoistError::command(cmd, format!("exited with {}", status)));
        }
        Ok(())
    }

    async fn output(&self, cmd: &HelmCommand) -> HoistResult<Vec<u8>> {
        debug!(command = %cmd, "running (captured)");
        let out = Self::command(cmd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HoistError::command(cmd, format!("spawn: {}", e)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let msg = if stderr.is_empty() { format!("exited with {}", out.status) } else { stderr };
            return Err(HoistError::command(cmd, msg));
        }
        Ok(out.stdout)
    }
}
