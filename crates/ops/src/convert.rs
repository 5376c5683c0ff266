//! Convert: decide whether a release needs migrating, migrate it, preserve the legacy records.

use std::sync::Arc;

use hoist_apply::{MigrationExecutor, MigrationReport};
use hoist_core::{HoistError, HoistResult, KubeTarget, MigrationOptions};
use hoist_kubehub::Connector;
use hoist_store::{current_release_exists, legacy_release_exists, preserve_legacy};
use metrics::counter;
use tracing::{debug, error, info};

use crate::{Operation, StepContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertOutcome {
    /// A current record exists; nothing was touched.
    AlreadyMigrated,
    /// Neither store holds the release.
    NothingToMigrate,
    /// `preserved` is None when the converter was asked to delete the legacy records.
    Migrated { report: MigrationReport, preserved: Option<usize> },
}

pub struct Convert {
    ctx: StepContext,
    target: KubeTarget,
    options: MigrationOptions,
    connector: Arc<dyn Connector>,
    executor: Arc<dyn MigrationExecutor>,
    outcome: Option<ConvertOutcome>,
}

impl Convert {
    pub fn new(
        ctx: StepContext,
        target: KubeTarget,
        options: MigrationOptions,
        connector: Arc<dyn Connector>,
        executor: Arc<dyn MigrationExecutor>,
    ) -> Self {
        Self { ctx, target, options, connector, executor, outcome: None }
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Set once `execute` has succeeded.
    pub fn outcome(&self) -> Option<&ConvertOutcome> {
        self.outcome.as_ref()
    }

    /// The decision procedure. Safe to re-run: a migrated release short-circuits on the first query.
    pub async fn run(&self) -> HoistResult<ConvertOutcome> {
        let opts = &self.options;
        let release = opts.release_name();
        let namespace = opts.release_namespace();
        let cluster = self.connector.connect(&self.target).await?;

        if current_release_exists(cluster.as_ref(), release, namespace).await? {
            info!(release = %release, ns = %namespace, "release already migrated; skipping conversion");
            counter!("convert_skipped_total", 1u64);
            return Ok(ConvertOutcome::AlreadyMigrated);
        }

        if !legacy_release_exists(cluster.as_ref(), opts).await? {
            info!(release = %release, legacy_ns = %opts.legacy_namespace(), "no legacy release; nothing to convert");
            counter!("convert_skipped_total", 1u64);
            return Ok(ConvertOutcome::NothingToMigrate);
        }

        // A current record may have appeared between the two queries.
        if current_release_exists(cluster.as_ref(), release, namespace).await? {
            error!(release = %release, ns = %namespace, "legacy and current records both present");
            counter!("convert_conflict_total", 1u64);
            return Err(HoistError::Conflict { release: release.to_string(), namespace: namespace.to_string() });
        }

        let report = self.executor.migrate(cluster.as_ref(), &self.target, opts).await.map_err(|e| match e {
            HoistError::Conversion { .. } => e,
            other => HoistError::conversion(release, other),
        })?;

        let preserved = if opts.delete_legacy() {
            debug!(release = %release, "legacy records deleted by the converter; preservation skipped");
            None
        } else {
            let n = preserve_legacy(cluster.as_ref(), opts).await.map_err(|e| match e {
                HoistError::Preservation { .. } => e,
                other => HoistError::preservation(release, other),
            })?;
            Some(n)
        };

        counter!("convert_migrated_total", 1u64);
        info!(
            release = %release,
            ns = %namespace,
            revisions = report.revisions.len(),
            preserved = ?preserved,
            dry_run = opts.dry_run(),
            "release migrated"
        );
        Ok(ConvertOutcome::Migrated { report, preserved })
    }
}

#[async_trait::async_trait]
impl Operation for Convert {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn prepare(&mut self) -> HoistResult<()> {
        if self.options.release_name().is_empty() {
            return Err(HoistError::validation("release is required"));
        }
        if self.options.release_namespace().is_empty() {
            return Err(HoistError::validation("namespace is required"));
        }
        if self.ctx.config.debug {
            debug!(
                release = %self.options.identity(),
                legacy_ns = %self.options.legacy_namespace(),
                selector = %self.options.legacy_selector(),
                storage = %self.options.storage(),
                max_revisions = self.options.max_revisions(),
                "convert prepared"
            );
        }
        Ok(())
    }

    async fn execute(&mut self) -> HoistResult<()> {
        let outcome = self.run().await?;
        self.outcome = Some(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunConfig;
    use hoist_apply::ScriptedRunner;
    use hoist_core::{LabelSelector, LabeledResource, ReleaseRevision, StorageKind, LEGACY_OWNER_LABEL};
    use hoist_kubehub::{current_record, legacy_record, ClusterAccessor, ListFailure, MemoryCluster, StaticConnector};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Converter fake: counts calls and, on success, writes a current record into the cluster.
    struct FakeExecutor {
        cluster: Arc<MemoryCluster>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeExecutor {
        fn new(cluster: &Arc<MemoryCluster>) -> Arc<Self> {
            Arc::new(Self { cluster: cluster.clone(), calls: AtomicUsize::new(0), fail: false })
        }

        fn failing(cluster: &Arc<MemoryCluster>) -> Arc<Self> {
            Arc::new(Self { cluster: cluster.clone(), calls: AtomicUsize::new(0), fail: true })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MigrationExecutor for FakeExecutor {
        async fn migrate(&self, _: &dyn ClusterAccessor, _: &KubeTarget, opts: &MigrationOptions) -> HoistResult<MigrationReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HoistError::command("helm 2to3 convert", "exited with exit status: 1"));
            }
            self.cluster.insert(current_record(opts.release_namespace(), opts.release_name(), 1));
            Ok(MigrationReport { release: opts.release_name().to_string(), revisions: vec![1, 2], dry_run: opts.dry_run() })
        }
    }

    /// Reports no current release on the first lookup and one on every later lookup.
    struct RacingCluster {
        inner: MemoryCluster,
        lookups: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ClusterAccessor for RacingCluster {
        async fn list(&self, kind: StorageKind, namespace: &str, selector: &LabelSelector) -> HoistResult<Vec<LabeledResource>> {
            self.inner.list(kind, namespace, selector).await
        }

        async fn set_label(&self, kind: StorageKind, namespace: &str, name: &str, key: &str, value: &str) -> HoistResult<()> {
            self.inner.set_label(kind, namespace, name, key, value).await
        }

        async fn deployed_release(&self, name: &str, namespace: &str) -> HoistResult<Option<ReleaseRevision>> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            Ok(Some(ReleaseRevision { name: name.into(), namespace: namespace.into(), version: 1, status: "deployed".into() }))
        }
    }

    fn legacy_cluster() -> Arc<MemoryCluster> {
        Arc::new(MemoryCluster::with_objects([
            legacy_record(StorageKind::ConfigMaps, "kube-system", "myapp", 1),
            legacy_record(StorageKind::ConfigMaps, "kube-system", "myapp", 2),
            legacy_record(StorageKind::ConfigMaps, "kube-system", "other", 1),
        ]))
    }

    fn convert(accessor: Arc<dyn ClusterAccessor>, executor: Arc<dyn MigrationExecutor>, opts: MigrationOptions) -> Convert {
        let ctx = StepContext::new(RunConfig::default(), Arc::new(ScriptedRunner::new()));
        Convert::new(ctx, KubeTarget::new("/kc"), opts, Arc::new(StaticConnector::new(accessor)), executor)
    }

    fn owner(cluster: &MemoryCluster, name: &str) -> String {
        cluster.get(StorageKind::ConfigMaps, "kube-system", name).unwrap().labels[LEGACY_OWNER_LABEL].clone()
    }

    #[tokio::test]
    async fn migrates_and_preserves_legacy_records() {
        let cluster = legacy_cluster();
        let exec = FakeExecutor::new(&cluster);
        let mut step = convert(cluster.clone(), exec.clone(), MigrationOptions::new("myapp", "prod"));
        step.prepare().unwrap();
        step.execute().await.unwrap();
        match step.outcome() {
            Some(ConvertOutcome::Migrated { report, preserved }) => {
                assert_eq!(report.revisions, vec![1, 2]);
                assert_eq!(*preserved, Some(2));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(exec.calls(), 1);
        assert_eq!(owner(&cluster, "myapp.v1"), "none");
        assert_eq!(owner(&cluster, "myapp.v2"), "none");
        assert_eq!(owner(&cluster, "other.v1"), "TILLER");
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let cluster = legacy_cluster();
        let exec = FakeExecutor::new(&cluster);
        let step = convert(cluster.clone(), exec.clone(), MigrationOptions::new("myapp", "prod"));
        step.run().await.unwrap();
        let updates = cluster.update_count();

        assert_eq!(step.run().await.unwrap(), ConvertOutcome::AlreadyMigrated);
        assert_eq!(exec.calls(), 1);
        assert_eq!(cluster.update_count(), updates);
    }

    #[tokio::test]
    async fn nothing_to_migrate_when_both_stores_are_empty() {
        let cluster = Arc::new(MemoryCluster::new());
        let exec = FakeExecutor::new(&cluster);
        let step = convert(cluster.clone(), exec.clone(), MigrationOptions::new("myapp", "prod"));
        assert_eq!(step.run().await.unwrap(), ConvertOutcome::NothingToMigrate);
        assert_eq!(exec.calls(), 0);
        assert_eq!(cluster.update_count(), 0);
    }

    #[tokio::test]
    async fn missing_legacy_backend_reads_as_nothing_to_migrate() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_lists_of(StorageKind::ConfigMaps, ListFailure::Missing);
        let exec = FakeExecutor::new(&cluster);
        let step = convert(cluster.clone(), exec.clone(), MigrationOptions::new("myapp", "prod"));
        assert_eq!(step.run().await.unwrap(), ConvertOutcome::NothingToMigrate);
        assert_eq!(exec.calls(), 0);
    }

    #[tokio::test]
    async fn unreachable_cluster_propagates() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_lists(ListFailure::Unreachable);
        let exec = FakeExecutor::new(&cluster);
        let err = convert(cluster.clone(), exec.clone(), MigrationOptions::new("myapp", "prod")).run().await.unwrap_err();
        assert!(matches!(err, HoistError::Connection(_)), "err={}", err);
        assert_eq!(exec.calls(), 0);
    }

    #[tokio::test]
    async fn current_record_appearing_mid_decision_is_a_conflict() {
        let racing = Arc::new(RacingCluster {
            inner: MemoryCluster::with_objects([legacy_record(StorageKind::ConfigMaps, "kube-system", "myapp", 1)]),
            lookups: AtomicUsize::new(0),
        });
        let sink = Arc::new(MemoryCluster::new());
        let exec = FakeExecutor::new(&sink);
        let err = convert(racing.clone(), exec.clone(), MigrationOptions::new("myapp", "prod")).run().await.unwrap_err();
        match err {
            HoistError::Conflict { release, namespace } => {
                assert_eq!(release, "myapp");
                assert_eq!(namespace, "prod");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(exec.calls(), 0);
        assert_eq!(racing.inner.update_count(), 0);
    }

    #[tokio::test]
    async fn delete_legacy_skips_preservation() {
        let cluster = legacy_cluster();
        let exec = FakeExecutor::new(&cluster);
        let opts = MigrationOptions::new("myapp", "prod").with_delete_legacy(true);
        let outcome = convert(cluster.clone(), exec.clone(), opts).run().await.unwrap();
        assert!(matches!(outcome, ConvertOutcome::Migrated { preserved: None, .. }));
        assert_eq!(cluster.update_count(), 0);
        assert_eq!(owner(&cluster, "myapp.v1"), "TILLER");
    }

    #[tokio::test]
    async fn executor_failure_is_a_conversion_error_and_preserves_nothing() {
        let cluster = legacy_cluster();
        let exec = FakeExecutor::failing(&cluster);
        let err = convert(cluster.clone(), exec.clone(), MigrationOptions::new("myapp", "prod")).run().await.unwrap_err();
        assert!(matches!(err, HoistError::Conversion { ref release, .. } if release == "myapp"), "err={}", err);
        assert_eq!(cluster.update_count(), 0);
    }

    #[tokio::test]
    async fn preservation_failure_surfaces_after_migration() {
        let cluster = legacy_cluster();
        cluster.fail_update_of("myapp.v2");
        let exec = FakeExecutor::new(&cluster);
        let err = convert(cluster.clone(), exec.clone(), MigrationOptions::new("myapp", "prod")).run().await.unwrap_err();
        assert!(matches!(err, HoistError::Preservation { ref record, .. } if record == "myapp.v2"), "err={}", err);
        assert_eq!(exec.calls(), 1);
    }

    #[tokio::test]
    async fn dry_run_leaves_legacy_owner_untouched() {
        let cluster = legacy_cluster();
        let exec = FakeExecutor::new(&cluster);
        let opts = MigrationOptions::new("myapp", "prod").with_dry_run(true);
        let outcome = convert(cluster.clone(), exec.clone(), opts).run().await.unwrap();
        assert!(matches!(outcome, ConvertOutcome::Migrated { preserved: Some(2), .. }));
        assert_eq!(owner(&cluster, "myapp.v1"), "TILLER");
    }

    #[test]
    fn prepare_requires_release_and_namespace() {
        let cluster = Arc::new(MemoryCluster::new());
        let exec = FakeExecutor::new(&cluster);
        let err = convert(cluster.clone(), exec.clone(), MigrationOptions::new("", "prod")).prepare().unwrap_err();
        assert!(err.to_string().contains("release is required"));
        let err = convert(cluster.clone(), exec, MigrationOptions::new("myapp", "")).prepare().unwrap_err();
        assert!(err.to_string().contains("namespace is required"));
    }
}
