//! Hoist store: existence queries against the legacy and current release
//! stores, and relabeling of legacy records once a release is migrated.

#![forbid(unsafe_code)]

use hoist_core::{
    HoistError, HoistResult, LabelSelector, LabeledResource, LegacyRecord, MigrationOptions, StorageKind,
    LEGACY_NAME_LABEL, LEGACY_OWNER_LABEL, NEUTRAL_OWNER,
};
use hoist_kubehub::ClusterAccessor;
use metrics::counter;
use tracing::{debug, info, warn};

/// Legacy records in `namespace` matching `selector`, narrowed to `release` when it is non-empty.
/// Sorted by version ascending.
pub async fn release_records(
    cluster: &dyn ClusterAccessor,
    kind: StorageKind,
    namespace: &str,
    selector: &LabelSelector,
    release: &str,
) -> HoistResult<Vec<LegacyRecord>> {
    let selector = if release.is_empty() {
        selector.clone()
    } else {
        selector.clone().and_equals(LEGACY_NAME_LABEL, release)
    };
    let objects = cluster.list(kind, namespace, &selector).await?;
    let mut records: Vec<LegacyRecord> = objects
        .iter()
        .filter(|o| o.namespace == namespace)
        .filter_map(LegacyRecord::from_resource)
        .filter(|r| release.is_empty() || r.release == release)
        .collect();
    records.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.resource.cmp(&b.resource)));
    Ok(records)
}

/// Legacy objects addressed by `opts`: listed with the release-narrowed selector, kept only when
/// they live in the legacy namespace and carry the release's `NAME` label. No `VERSION` is required.
async fn legacy_objects(cluster: &dyn ClusterAccessor, opts: &MigrationOptions) -> HoistResult<Vec<LabeledResource>> {
    let namespace = opts.legacy_namespace();
    let release = opts.release_name();
    let objects = cluster.list(opts.storage(), namespace, &opts.legacy_release_selector()).await?;
    Ok(objects
        .into_iter()
        .filter(|o| o.namespace == namespace)
        .filter(|o| release.is_empty() || o.labels.get(LEGACY_NAME_LABEL).map(String::as_str) == Some(release))
        .collect())
}

/// True iff the legacy store holds at least one record for the release.
/// An absent legacy backend reads as "not found", never as an error.
pub async fn legacy_release_exists(cluster: &dyn ClusterAccessor, opts: &MigrationOptions) -> HoistResult<bool> {
    let release = opts.release_name();
    match legacy_objects(cluster, opts).await {
        Ok(objects) if objects.is_empty() => {
            info!(release = %release, ns = %opts.legacy_namespace(), "no legacy release found");
            Ok(false)
        }
        Ok(objects) => {
            let names: Vec<&str> = objects.iter().map(|o| o.name.as_str()).collect();
            info!(release = %release, ns = %opts.legacy_namespace(), records = ?names, "legacy release found");
            Ok(true)
        }
        Err(HoistError::NotFound(msg)) => {
            warn!(release = %release, ns = %opts.legacy_namespace(), reason = %msg, "legacy release store unavailable; treating as not found");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// True iff the current store has a deployed revision of `name`. Backend errors propagate.
pub async fn current_release_exists(cluster: &dyn ClusterAccessor, name: &str, namespace: &str) -> HoistResult<bool> {
    match cluster.deployed_release(name, namespace).await? {
        Some(rev) => {
            info!(release = %name, ns = %namespace, version = rev.version, "current release found");
            Ok(true)
        }
        None => {
            info!(release = %name, ns = %namespace, "no current release found");
            Ok(false)
        }
    }
}

/// Rewrite the owner marker of every matching legacy record to `none`, one update per record.
/// Stops at the first failed update; records already relabeled stay relabeled.
/// In dry-run mode the matches are only counted. Returns the number of matched records.
pub async fn preserve_legacy(cluster: &dyn ClusterAccessor, opts: &MigrationOptions) -> HoistResult<usize> {
    let kind = opts.storage();
    let namespace = opts.legacy_namespace();
    let targets = legacy_objects(cluster, opts)
        .await
        .map_err(|e| HoistError::preservation(format!("{}/{}", namespace, opts.legacy_release_selector()), e))?;

    if opts.dry_run() {
        info!(release = %opts.release_name(), count = targets.len(), "dry run: legacy records left untouched");
        return Ok(targets.len());
    }

    for obj in &targets {
        debug!(kind = %kind, ns = %namespace, name = %obj.name, "marking legacy record as preserved");
        cluster
            .set_label(kind, namespace, &obj.name, LEGACY_OWNER_LABEL, NEUTRAL_OWNER)
            .await
            .map_err(|e| HoistError::preservation(obj.name.clone(), e))?;
        counter!("preserve_relabeled_total", 1u64);
    }
    info!(release = %opts.release_name(), count = targets.len(), "legacy records preserved");
    Ok(targets.len())
}
