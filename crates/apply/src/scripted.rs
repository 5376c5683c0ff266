//! Command runner that records instead of spawning.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hoist_core::{HoistError, HoistResult};

use crate::command::{CommandRunner, HelmCommand};

#[derive(Default)]
struct Script {
    calls: Vec<HelmCommand>,
    fail_on: Vec<String>,
    outputs: VecDeque<Vec<u8>>,
}

/// Records every command instead of spawning it. Commands whose rendered form contains
/// a registered needle fail; `output` pops queued payloads in order.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_on(self, needle: impl Into<String>) -> Self {
        self.script().fail_on.push(needle.into());
        self
    }

    pub fn with_output(self, stdout: impl Into<Vec<u8>>) -> Self {
        self.script().outputs.push_back(stdout.into());
        self
    }

    pub fn calls(&self) -> Vec<HelmCommand> {
        self.script().calls.clone()
    }

    fn record(&self, cmd: &HelmCommand) -> HoistResult<()> {
        let mut s = self.script();
        s.calls.push(cmd.clone());
        let rendered = cmd.to_string();
        if s.fail_on.iter().any(|n| rendered.contains(n.as_str())) {
            return Err(HoistError::command(cmd, "exited with exit status: 1"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, cmd: &HelmCommand) -> HoistResult<()> {
        self.record(cmd)
    }

    async fn output(&self, cmd: &HelmCommand) -> HoistResult<Vec<u8>> {
        self.record(cmd)?;
        Ok(self.script().outputs.pop_front().unwrap_or_default())
    }
}
