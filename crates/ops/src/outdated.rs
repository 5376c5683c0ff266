//! CheckOutdated: compare the pinned chart version against the newest one in the repo index.

use hoist_core::{HoistError, HoistResult};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{Operation, StepContext};

#[derive(Debug, Clone, Deserialize)]
struct SearchEntry {
    name: String,
    version: String,
    #[serde(default)]
    app_version: String,
}

pub struct CheckOutdated {
    ctx: StepContext,
    chart: String,
    chart_version: String,
    latest: Option<String>,
}

impl CheckOutdated {
    pub fn new(ctx: StepContext, chart: impl Into<String>, chart_version: impl Into<String>) -> Self {
        Self { ctx, chart: chart.into(), chart_version: chart_version.into(), latest: None }
    }

    /// Newest version found by the last `execute`.
    pub fn latest(&self) -> Option<&str> {
        self.latest.as_deref()
    }

    pub fn is_outdated(&self) -> bool {
        match &self.latest {
            Some(latest) => !self.chart_version.is_empty() && &self.chart_version != latest,
            None => false,
        }
    }

    fn pick_latest(&self, stdout: &[u8]) -> HoistResult<SearchEntry> {
        let entries: Vec<SearchEntry> = serde_json::from_slice(stdout)
            .map_err(|e| HoistError::validation(format!("unreadable search output for '{}': {}", self.chart, e)))?;
        let exact = entries.iter().position(|e| e.name == self.chart).unwrap_or(0);
        entries
            .into_iter()
            .nth(exact)
            .ok_or_else(|| HoistError::validation(format!("chart '{}' not found in any repository", self.chart)))
    }
}

fn valid_chart_ref(chart: &str) -> bool {
    matches!(chart.split_once('/'), Some((repo, name)) if !repo.is_empty() && !name.is_empty())
}

#[async_trait::async_trait]
impl Operation for CheckOutdated {
    fn name(&self) -> &'static str {
        "check-outdated"
    }

    fn prepare(&mut self) -> HoistResult<()> {
        if !valid_chart_ref(&self.chart) {
            return Err(HoistError::validation(format!(
                "invalid chart reference '{}', format must be repo/chartName",
                self.chart
            )));
        }
        Ok(())
    }

    async fn execute(&mut self) -> HoistResult<()> {
        let cmd = self.ctx.helm().args(["search", "repo", self.chart.as_str(), "-o", "json"]);
        debug!(command = %cmd, "generated command");
        let stdout = self.ctx.runner.output(&cmd).await?;
        let entry = self.pick_latest(&stdout)?;
        debug!(chart = %entry.name, version = %entry.version, app_version = %entry.app_version, "latest chart");
        self.latest = Some(entry.version);

        if self.is_outdated() {
            warn!(chart = %self.chart, pinned = %self.chart_version, latest = ?self.latest, "chart version is outdated");
        } else {
            info!(chart = %self.chart, version = ?self.latest, "chart version is current");
        }
        Ok(())
    }
}
