//! MapKube: rewrite deprecated or removed API versions inside a release's stored manifest.

use std::path::PathBuf;

use hoist_apply::HelmCommand;
use hoist_core::{HoistError, HoistResult, KubeTarget};
use tracing::{debug, info};

use crate::{Operation, StepContext};

pub const DEFAULT_MAP_FILE: &str = "assets/mapconfig.yaml";

pub struct MapKube {
    ctx: StepContext,
    release: String,
    namespace: String,
    target: KubeTarget,
    map_file: PathBuf,
    dry_run: bool,
    legacy: bool,
    cmd: Option<HelmCommand>,
}

impl MapKube {
    pub fn new(ctx: StepContext, release: impl Into<String>, namespace: impl Into<String>, target: KubeTarget) -> Self {
        Self {
            ctx,
            release: release.into(),
            namespace: namespace.into(),
            target,
            map_file: PathBuf::from(DEFAULT_MAP_FILE),
            dry_run: false,
            legacy: false,
            cmd: None,
        }
    }

    pub fn with_map_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.map_file = path.into();
        self
    }

    pub fn with_dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }

    /// Map a legacy (Tiller) release instead of a current one.
    pub fn with_legacy(mut self, on: bool) -> Self {
        self.legacy = on;
        self
    }

    /// Prepared command; None before `prepare`.
    pub fn command(&self) -> Option<&HelmCommand> {
        self.cmd.as_ref()
    }

    fn build(&self) -> HelmCommand {
        let mut cmd = HelmCommand::new(self.ctx.config.helm_bin.clone())
            .args(["mapkubeapis", self.release.as_str()])
            .args(["--namespace", self.namespace.as_str()])
            .arg("--mapfile")
            .arg(self.map_file.display().to_string());
        if self.dry_run {
            cmd = cmd.arg("--dry-run");
        }
        if self.legacy {
            cmd = cmd.arg("--v2");
        }
        cmd = cmd.arg("--kubeconfig").arg(self.target.kubeconfig.display().to_string());
        if let Some(ctx) = &self.target.context {
            cmd = cmd.args(["--kube-context", ctx.as_str()]);
        }
        cmd
    }
}

#[async_trait::async_trait]
impl Operation for MapKube {
    fn name(&self) -> &'static str {
        "map-kube-apis"
    }

    fn prepare(&mut self) -> HoistResult<()> {
        if self.release.is_empty() {
            return Err(HoistError::validation("release is required"));
        }
        if self.namespace.is_empty() {
            return Err(HoistError::validation("namespace is required"));
        }
        let cmd = self.build();
        debug!(command = %cmd, "generated command");
        self.cmd = Some(cmd);
        Ok(())
    }

    async fn execute(&mut self) -> HoistResult<()> {
        let cmd = self.cmd.as_ref().ok_or_else(|| HoistError::validation("map-kube-apis executed before prepare"))?;
        info!(release = %self.release, ns = %self.namespace, legacy = self.legacy, "checking release for deprecated or removed kubernetes apis");
        self.ctx.runner.run(cmd).await?;
        info!(release = %self.release, "deprecated api mapping completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunConfig;
    use hoist_apply::ScriptedRunner;
    use std::sync::Arc;

    fn ctx(runner: &Arc<ScriptedRunner>) -> StepContext {
        StepContext::new(RunConfig { debug: true, namespace: "prod".into(), ..Default::default() }, runner.clone())
    }

    #[test]
    fn release_and_namespace_are_required() {
        let runner = Arc::new(ScriptedRunner::new());
        let err = MapKube::new(ctx(&runner), "", "prod", KubeTarget::new("/kc")).prepare().unwrap_err();
        assert!(err.to_string().contains("release is required"));
        let err = MapKube::new(ctx(&runner), "myapp", "", KubeTarget::new("/kc")).prepare().unwrap_err();
        assert!(err.to_string().contains("namespace is required"));
    }

    #[tokio::test]
    async fn runs_mapkubeapis_with_all_flags() {
        let runner = Arc::new(ScriptedRunner::new());
        let target = KubeTarget::new("/root/.kube/config").with_context(Some("staging".into()));
        let mut step = MapKube::new(ctx(&runner), "myapp", "prod", target).with_dry_run(true).with_legacy(true);
        step.prepare().unwrap();
        step.execute().await.unwrap();
        assert_eq!(
            runner.calls()[0].to_string(),
            "helm mapkubeapis myapp --namespace prod --mapfile assets/mapconfig.yaml --dry-run --v2 \
             --kubeconfig /root/.kube/config --kube-context staging"
        );
    }

    #[tokio::test]
    async fn plugin_failure_propagates() {
        let runner = Arc::new(ScriptedRunner::new().fail_on("mapkubeapis"));
        let mut step = MapKube::new(ctx(&runner), "myapp", "prod", KubeTarget::new("/kc")).with_map_file("/maps/custom.yaml");
        step.prepare().unwrap();
        assert!(step.command().unwrap().to_string().contains("--mapfile /maps/custom.yaml"));
        assert!(matches!(step.execute().await.unwrap_err(), HoistError::Command { .. }));
    }
}
