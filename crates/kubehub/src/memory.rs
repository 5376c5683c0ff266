//! In-memory accessor for tests and offline runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hoist_core::{
    HoistError, HoistResult, KubeTarget, LabelSelector, LabeledResource, ReleaseRevision, StorageKind,
    LEGACY_NAME_LABEL, LEGACY_OWNER_LABEL, LEGACY_STATUS_LABEL, LEGACY_VERSION_LABEL,
};

use crate::{current_labels, current_selector, latest_revision, ClusterAccessor, Connector};

/// Failure injected into every `list` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFailure {
    /// The storage backend is absent (HTTP 404).
    Missing,
    /// The cluster cannot be reached.
    Unreachable,
}

#[derive(Default)]
struct State {
    objects: Vec<LabeledResource>,
    updates: usize,
    fail_update_of: Option<String>,
    fail_list: Option<(Option<StorageKind>, ListFailure)>,
    current_storage: StorageKind,
}

/// Cluster held in RAM. Current releases are read from Secrets unless configured otherwise.
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self { state: Mutex::new(State { current_storage: StorageKind::Secrets, ..Default::default() }) }
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects(objects: impl IntoIterator<Item = LabeledResource>) -> Self {
        let me = Self::default();
        me.state().objects.extend(objects);
        me
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, obj: LabeledResource) {
        self.state().objects.push(obj);
    }

    pub fn get(&self, kind: StorageKind, namespace: &str, name: &str) -> Option<LabeledResource> {
        self.state().objects.iter().find(|o| o.kind == kind && o.namespace == namespace && o.name == name).cloned()
    }

    /// Number of successful `set_label` calls so far.
    pub fn update_count(&self) -> usize {
        self.state().updates
    }

    pub fn set_current_storage(&self, kind: StorageKind) {
        self.state().current_storage = kind;
    }

    /// Make updates of the named object fail.
    pub fn fail_update_of(&self, name: impl Into<String>) {
        self.state().fail_update_of = Some(name.into());
    }

    pub fn fail_lists(&self, failure: ListFailure) {
        self.state().fail_list = Some((None, failure));
    }

    /// Like `fail_lists`, for one storage kind only.
    pub fn fail_lists_of(&self, kind: StorageKind, failure: ListFailure) {
        self.state().fail_list = Some((Some(kind), failure));
    }
}

#[async_trait::async_trait]
impl ClusterAccessor for MemoryCluster {
    async fn list(&self, kind: StorageKind, namespace: &str, selector: &LabelSelector) -> HoistResult<Vec<LabeledResource>> {
        let st = self.state();
        match st.fail_list {
            Some((only, failure)) if only.map_or(true, |k| k == kind) => {
                return Err(match failure {
                    ListFailure::Missing => HoistError::NotFound(format!("{} in {}", kind, namespace)),
                    ListFailure::Unreachable => HoistError::Connection("connection refused".into()),
                });
            }
            _ => {}
        }
        Ok(st
            .objects
            .iter()
            .filter(|o| o.kind == kind && o.namespace == namespace && selector.matches(&o.labels))
            .cloned()
            .collect())
    }

    async fn set_label(&self, kind: StorageKind, namespace: &str, name: &str, key: &str, value: &str) -> HoistResult<()> {
        let mut st = self.state();
        if st.fail_update_of.as_deref() == Some(name) {
            return Err(HoistError::Api(format!("update of {}/{} rejected", namespace, name)));
        }
        let obj = st
            .objects
            .iter_mut()
            .find(|o| o.kind == kind && o.namespace == namespace && o.name == name)
            .ok_or_else(|| HoistError::NotFound(format!("{} {}/{}", kind, namespace, name)))?;
        obj.labels.insert(key.to_string(), value.to_string());
        st.updates += 1;
        Ok(())
    }

    async fn deployed_release(&self, name: &str, namespace: &str) -> HoistResult<Option<ReleaseRevision>> {
        let selector = current_selector(name);
        let kind = self.state().current_storage;
        let records = self.list(kind, namespace, &selector).await?;
        Ok(latest_revision(&records, name, namespace))
    }
}

/// Hands out the same accessor for every target.
#[derive(Clone)]
pub struct StaticConnector {
    accessor: Arc<dyn ClusterAccessor>,
}

impl StaticConnector {
    pub fn new(accessor: Arc<dyn ClusterAccessor>) -> Self {
        Self { accessor }
    }
}

#[async_trait::async_trait]
impl Connector for StaticConnector {
    async fn connect(&self, _target: &KubeTarget) -> HoistResult<Arc<dyn ClusterAccessor>> {
        Ok(self.accessor.clone())
    }
}

/// Legacy record `<release>.v<version>` owned by Tiller with status DEPLOYED.
pub fn legacy_record(kind: StorageKind, namespace: &str, release: &str, version: u32) -> LabeledResource {
    LabeledResource::new(kind, namespace, format!("{}.v{}", release, version))
        .label(LEGACY_NAME_LABEL, release)
        .label(LEGACY_OWNER_LABEL, "TILLER")
        .label(LEGACY_STATUS_LABEL, "DEPLOYED")
        .label(LEGACY_VERSION_LABEL, version.to_string())
}

/// Current-store Secret `sh.helm.release.v1.<release>.v<version>` with status deployed.
pub fn current_record(namespace: &str, release: &str, version: u32) -> LabeledResource {
    let mut r = LabeledResource::new(StorageKind::Secrets, namespace, format!("sh.helm.release.v1.{}.v{}", release, version));
    r.labels = current_labels(release, version, "deployed");
    r
}
