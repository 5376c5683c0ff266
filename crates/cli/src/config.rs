//! Plugin settings. Every option is a long flag that can also come from a `PLUGIN_*` variable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hoist_apply::{CommandRunner, HelmMigrator, ProcessRunner};
use hoist_core::{
    KubeTarget, LabelSelector, MigrationOptions, StorageKind, DEFAULT_LEGACY_NAMESPACE, DEFAULT_LEGACY_SELECTOR,
};
use hoist_kubehub::{Connector, KubeConnector};
use hoist_ops::{AddRepo, CheckOutdated, Convert, MapKube, Plan, RepoCerts, RunConfig, Step, StepContext, DEFAULT_MAP_FILE};

#[derive(Parser, Debug, Clone)]
#[command(name = "hoist", version, about = "Migrate legacy Helm releases and run chart housekeeping steps")]
pub struct PluginConfig {
    /// Verbose logging and `--debug` on every helm call
    #[arg(long, env = "PLUGIN_DEBUG")]
    pub debug: bool,

    /// Release namespace
    #[arg(long, env = "PLUGIN_NAMESPACE", default_value = "default")]
    pub namespace: String,

    #[arg(long, env = "PLUGIN_RELEASE", default_value = "")]
    pub release: String,

    /// Chart reference, `repo/name`
    #[arg(long, env = "PLUGIN_CHART", default_value = "")]
    pub chart: String,

    #[arg(long, env = "PLUGIN_CHART_VERSION", default_value = "")]
    pub chart_version: String,

    /// Repositories to add, `name=url`, comma separated
    #[arg(long, env = "PLUGIN_ADD_REPOS", value_delimiter = ',')]
    pub add_repos: Vec<String>,

    /// Base64-encoded repo client certificate
    #[arg(long, env = "PLUGIN_REPO_CERTIFICATE")]
    pub repo_certificate: Option<String>,

    /// Base64-encoded repo CA certificate
    #[arg(long, env = "PLUGIN_REPO_CA_CERTIFICATE")]
    pub repo_ca_certificate: Option<String>,

    #[arg(long, env = "PLUGIN_DRY_RUN")]
    pub dry_run: bool,

    #[arg(long, env = "PLUGIN_KUBE_CONFIG", default_value = "/root/.kube/config")]
    pub kube_config: PathBuf,

    #[arg(long, env = "PLUGIN_KUBE_CONTEXT")]
    pub kube_context: Option<String>,

    /// Seconds allowed for establishing the cluster connection
    #[arg(long, env = "PLUGIN_KUBE_CONNECT_TIMEOUT", default_value_t = 30)]
    pub kube_connect_timeout: u64,

    /// Migrate a legacy (Tiller) release before anything else touches it
    #[arg(long, env = "PLUGIN_MIGRATE_V2")]
    pub migrate_v2: bool,

    #[arg(long, env = "PLUGIN_DELETE_V2_RELEASES")]
    pub delete_v2_releases: bool,

    /// Newest legacy revisions to convert; 0 converts all
    #[arg(long, env = "PLUGIN_RELEASE_VERSIONS_MAX", default_value_t = 10)]
    pub release_versions_max: u32,

    #[arg(long, env = "PLUGIN_TILLER_NS", default_value = DEFAULT_LEGACY_NAMESPACE)]
    pub tiller_ns: String,

    #[arg(long, env = "PLUGIN_TILLER_LABEL", default_value = DEFAULT_LEGACY_SELECTOR)]
    pub tiller_label: LabelSelector,

    #[arg(long, env = "PLUGIN_V2_STORAGE", default_value = "configmaps")]
    pub v2_storage: StorageKind,

    #[arg(long, env = "PLUGIN_V3_STORAGE", default_value = "secrets")]
    pub v3_storage: StorageKind,

    #[arg(long, env = "PLUGIN_MAP_KUBE_APIS")]
    pub map_kube_apis: bool,

    /// Map the legacy release rather than the current one
    #[arg(long, env = "PLUGIN_MAP_KUBE_V2")]
    pub map_kube_v2: bool,

    #[arg(long, env = "PLUGIN_MAP_FILE", default_value = DEFAULT_MAP_FILE)]
    pub map_file: PathBuf,

    #[arg(long, env = "PLUGIN_CHECK_OUTDATED")]
    pub check_outdated: bool,

    #[arg(long, env = "PLUGIN_HELM_BIN", default_value = "helm")]
    pub helm_bin: String,
}

/// Capabilities the plan is wired with.
#[derive(Clone)]
pub struct PlanDeps {
    pub runner: Arc<dyn CommandRunner>,
    pub connector: Arc<dyn Connector>,
}

impl PlanDeps {
    pub fn live(cfg: &PluginConfig) -> Self {
        Self { runner: Arc::new(ProcessRunner), connector: Arc::new(KubeConnector::new(cfg.v3_storage)) }
    }
}

impl PluginConfig {
    pub fn run_config(&self) -> RunConfig {
        RunConfig { debug: self.debug, namespace: self.namespace.clone(), helm_bin: self.helm_bin.clone() }
    }

    pub fn kube_target(&self) -> KubeTarget {
        KubeTarget::new(self.kube_config.clone())
            .with_context(self.kube_context.clone())
            .with_connect_timeout(Duration::from_secs(self.kube_connect_timeout))
    }

    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions::new(self.release.clone(), self.namespace.clone())
            .with_delete_legacy(self.delete_v2_releases)
            .with_dry_run(self.dry_run)
            .with_max_revisions(self.release_versions_max)
            .with_legacy_selector(self.tiller_label.clone())
            .with_legacy_namespace(self.tiller_ns.clone())
            .with_storage(self.v2_storage)
    }

    fn repos(&self) -> impl Iterator<Item = &str> {
        self.add_repos.iter().map(|r| r.trim()).filter(|r| !r.is_empty())
    }

    /// Steps in run order: repos, outdated check, conversion, api mapping.
    pub fn build_plan(&self, deps: &PlanDeps) -> Plan {
        let ctx = StepContext::new(self.run_config(), deps.runner.clone());
        let mut steps: Vec<Step> = Vec::new();

        let certs = RepoCerts::new(self.repo_certificate.clone(), self.repo_ca_certificate.clone());
        for repo in self.repos() {
            steps.push(AddRepo::new(ctx.clone(), repo, certs.clone()).into());
        }
        if self.check_outdated {
            steps.push(CheckOutdated::new(ctx.clone(), self.chart.clone(), self.chart_version.clone()).into());
        }
        if self.migrate_v2 {
            let executor = Arc::new(HelmMigrator::new(self.helm_bin.clone(), deps.runner.clone()));
            steps.push(
                Convert::new(ctx.clone(), self.kube_target(), self.migration_options(), deps.connector.clone(), executor).into(),
            );
        }
        if self.map_kube_apis {
            let map = MapKube::new(ctx, self.release.clone(), self.namespace.clone(), self.kube_target())
                .with_map_file(self.map_file.clone())
                .with_dry_run(self.dry_run)
                .with_legacy(self.map_kube_v2);
            steps.push(map.into());
        }
        Plan::new(steps)
    }
}
