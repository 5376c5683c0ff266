//! Hoist Ops: two-phase operations (prepare, then execute) and the plan that sequences them.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use hoist_apply::{CommandRunner, HelmCommand};
use hoist_core::HoistResult;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

mod convert;
mod mapkube;
mod outdated;
mod repo;

pub use convert::{Convert, ConvertOutcome};
pub use mapkube::{MapKube, DEFAULT_MAP_FILE};
pub use outdated::CheckOutdated;
pub use repo::{AddRepo, RepoCerts, RepoSpec};

/// Read-only settings shared by every step of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    pub debug: bool,
    /// Release namespace; also passed to helm as `--namespace`.
    pub namespace: String,
    pub helm_bin: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { debug: false, namespace: String::new(), helm_bin: "helm".to_string() }
    }
}

impl RunConfig {
    /// Flags every helm invocation starts with.
    pub fn global_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.debug {
            flags.push("--debug".to_string());
        }
        if !self.namespace.is_empty() {
            flags.push("--namespace".to_string());
            flags.push(self.namespace.clone());
        }
        flags
    }
}

/// Configuration snapshot plus the runner used for external commands.
#[derive(Clone)]
pub struct StepContext {
    pub config: Arc<RunConfig>,
    pub runner: Arc<dyn CommandRunner>,
}

impl StepContext {
    pub fn new(config: RunConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config: Arc::new(config), runner }
    }

    /// `helm` with the global flags already applied.
    pub fn helm(&self) -> HelmCommand {
        HelmCommand::new(self.config.helm_bin.clone()).args(self.config.global_flags())
    }
}

/// Two-phase contract: `prepare` validates and assembles parameters without touching
/// the outside world, `execute` performs the effect.
#[async_trait::async_trait]
pub trait Operation: Send {
    fn name(&self) -> &'static str;
    fn prepare(&mut self) -> HoistResult<()>;
    async fn execute(&mut self) -> HoistResult<()>;
}

pub enum Step {
    AddRepo(AddRepo),
    Convert(Box<Convert>),
    MapKube(MapKube),
    CheckOutdated(CheckOutdated),
}

impl From<AddRepo> for Step {
    fn from(s: AddRepo) -> Self {
        Step::AddRepo(s)
    }
}

impl From<Convert> for Step {
    fn from(s: Convert) -> Self {
        Step::Convert(Box::new(s))
    }
}

impl From<MapKube> for Step {
    fn from(s: MapKube) -> Self {
        Step::MapKube(s)
    }
}

impl From<CheckOutdated> for Step {
    fn from(s: CheckOutdated) -> Self {
        Step::CheckOutdated(s)
    }
}

#[async_trait::async_trait]
impl Operation for Step {
    fn name(&self) -> &'static str {
        match self {
            Step::AddRepo(s) => s.name(),
            Step::Convert(s) => s.name(),
            Step::MapKube(s) => s.name(),
            Step::CheckOutdated(s) => s.name(),
        }
    }

    fn prepare(&mut self) -> HoistResult<()> {
        match self {
            Step::AddRepo(s) => s.prepare(),
            Step::Convert(s) => s.prepare(),
            Step::MapKube(s) => s.prepare(),
            Step::CheckOutdated(s) => s.prepare(),
        }
    }

    async fn execute(&mut self) -> HoistResult<()> {
        match self {
            Step::AddRepo(s) => s.execute().await,
            Step::Convert(s) => s.execute().await,
            Step::MapKube(s) => s.execute().await,
            Step::CheckOutdated(s) => s.execute().await,
        }
    }
}

/// Ordered steps, fixed at construction. Executing consumes the plan.
pub struct Plan<S: Operation = Step> {
    steps: Vec<S>,
}

impl<S: Operation> Plan<S> {
    pub fn new(steps: Vec<S>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[S] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Prepare then execute each step in order. The first error stops the plan and is
    /// returned as is; completed steps are not undone.
    pub async fn execute(self) -> HoistResult<()> {
        let started = Instant::now();
        let total = self.steps.len();
        for (index, mut step) in self.steps.into_iter().enumerate() {
            let name = step.name();
            debug!(step = name, index, total, "preparing");
            if let Err(e) = step.prepare() {
                error!(step = name, index, error = %e, "prepare failed; aborting plan");
                return Err(e);
            }
            info!(step = name, index, total, "executing");
            if let Err(e) = step.execute().await {
                error!(step = name, index, error = %e, "execute failed; aborting plan");
                return Err(e);
            }
            counter!("plan_steps_total", 1u64);
        }
        histogram!("plan_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(steps = total, "plan complete");
        Ok(())
    }
}

impl<S: Operation> FromIterator<S> for Plan<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
