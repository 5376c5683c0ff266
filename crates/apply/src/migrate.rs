//! Migration executor: converts a legacy release's newest revisions into the current store.

use std::sync::Arc;

use hoist_core::{HoistError, HoistResult, KubeTarget, LegacyRecord, MigrationOptions};
use hoist_kubehub::ClusterAccessor;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{CommandRunner, HelmCommand};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub release: String,
    /// Legacy versions handed to the converter, ascending.
    pub revisions: Vec<u32>,
    pub dry_run: bool,
}

#[async_trait::async_trait]
pub trait MigrationExecutor: Send + Sync {
    async fn migrate(&self, cluster: &dyn ClusterAccessor, target: &KubeTarget, opts: &MigrationOptions) -> HoistResult<MigrationReport>;
}

/// Newest `max` distinct versions (all of them when `max` is 0), ascending.
pub fn select_revisions(records: &[LegacyRecord], max: u32) -> Vec<u32> {
    let mut versions: Vec<u32> = records.iter().map(|r| r.version).collect();
    versions.sort_unstable();
    versions.dedup();
    if max > 0 && versions.len() > max as usize {
        versions.drain(..versions.len() - max as usize);
    }
    versions
}

/// Delegates the record rewrite to the `helm 2to3` plugin.
pub struct HelmMigrator {
    helm_bin: String,
    runner: Arc<dyn CommandRunner>,
}

impl HelmMigrator {
    pub fn new(helm_bin: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { helm_bin: helm_bin.into(), runner }
    }

    pub fn command(&self, target: &KubeTarget, opts: &MigrationOptions) -> HelmCommand {
        let mut cmd = HelmCommand::new(self.helm_bin.clone())
            .args(["2to3", "convert", opts.release_name()])
            .args(["--tiller-ns", opts.legacy_namespace()])
            .arg("--release-versions-max")
            .arg(opts.max_revisions().to_string())
            .args(["--release-storage", opts.storage().as_str()]);
        if !opts.legacy_selector().is_empty() {
            cmd = cmd.arg("--label").arg(opts.legacy_selector().to_string());
        }
        if opts.delete_legacy() {
            cmd = cmd.arg("--delete-v2-releases");
        }
        if opts.dry_run() {
            cmd = cmd.arg("--dry-run");
        }
        cmd = cmd.arg("--kubeconfig").arg(target.kubeconfig.display().to_string());
        if let Some(ctx) = &target.context {
            cmd = cmd.args(["--kube-context", ctx.as_str()]);
        }
        cmd
    }
}

#[async_trait::async_trait]
impl MigrationExecutor for HelmMigrator {
    async fn migrate(&self, cluster: &dyn ClusterAccessor, target: &KubeTarget, opts: &MigrationOptions) -> HoistResult<MigrationReport> {
        let started = std::time::Instant::now();
        let release = opts.release_name();
        let records = hoist_store::release_records(cluster, opts.storage(), opts.legacy_namespace(), opts.legacy_selector(), release)
            .await
            .map_err(|e| HoistError::conversion(release, e))?;
        let revisions = select_revisions(&records, opts.max_revisions());
        let report = MigrationReport { release: release.to_string(), revisions, dry_run: opts.dry_run() };
        if report.revisions.is_empty() {
            info!(release = %release, "no legacy revisions to convert");
            return Ok(report);
        }

        if let Some(current) = hoist_core::current_legacy_revision(&records) {
            debug!(release = %release, version = current.version, "current legacy revision");
        }
        info!(release = %release, revisions = ?report.revisions, dry_run = opts.dry_run(), storage = %opts.storage(), "converting legacy release");
        let cmd = self.command(target, opts);
        debug!(command = %cmd, "generated command");
        self.runner.run(&cmd).await.map_err(|e| HoistError::conversion(release, e))?;

        histogram!("migrate_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("migrate_revisions_total", report.revisions.len() as u64);
        info!(release = %release, count = report.revisions.len(), "legacy release converted");
        Ok(report)
    }
}
