//! Hoist kubehub: resolve a kubeconfig into a cluster handle and address
//! release records stored as labeled ConfigMaps/Secrets.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use hoist_core::{
    HoistError, HoistResult, KubeTarget, LabelSelector, LabeledResource, ReleaseRevision, StorageKind,
    CURRENT_NAME_LABEL, CURRENT_OWNER, CURRENT_OWNER_LABEL, CURRENT_STATUS_LABEL, CURRENT_VERSION_LABEL,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

#[cfg(any(test, feature = "testing"))]
mod memory;

#[cfg(any(test, feature = "testing"))]
pub use memory::{current_record, legacy_record, ListFailure, MemoryCluster, StaticConnector};

/// Namespaced resource access plus the current release store, as one capability.
#[async_trait::async_trait]
pub trait ClusterAccessor: Send + Sync {
    /// List objects of `kind` in `namespace` matching `selector`.
    async fn list(&self, kind: StorageKind, namespace: &str, selector: &LabelSelector) -> HoistResult<Vec<LabeledResource>>;

    /// Set one label on a single object via an update call.
    async fn set_label(&self, kind: StorageKind, namespace: &str, name: &str, key: &str, value: &str) -> HoistResult<()>;

    /// Most recently deployed revision of `name` in the current store; None when there is none.
    async fn deployed_release(&self, name: &str, namespace: &str) -> HoistResult<Option<ReleaseRevision>>;
}

/// Produces a live accessor for a kube target. Resolved lazily, on first use by a step.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &KubeTarget) -> HoistResult<Arc<dyn ClusterAccessor>>;
}

/// Map a kube client error onto the Hoist taxonomy.
pub fn classify(err: kube::Error) -> HoistError {
    match err {
        kube::Error::Api(resp) if resp.code == 401 || resp.code == 403 => {
            HoistError::Connection(format!("{} ({}): {}", resp.reason, resp.code, resp.message))
        }
        kube::Error::Api(resp) if resp.code == 404 => HoistError::NotFound(resp.message),
        kube::Error::Api(resp) => HoistError::Api(format!("{} ({}): {}", resp.reason, resp.code, resp.message)),
        kube::Error::HyperError(e) => HoistError::Connection(e.to_string()),
        kube::Error::Service(e) => HoistError::Connection(e.to_string()),
        kube::Error::Auth(e) => HoistError::Connection(e.to_string()),
        other => HoistError::Api(other.to_string()),
    }
}

/// Accessor backed by a kube-rs client.
#[derive(Clone)]
pub struct KubeAccessor {
    client: Client,
    current_storage: StorageKind,
}

impl KubeAccessor {
    /// Read the kubeconfig at `target.kubeconfig`, pick the optional context and build a client
    /// with a bounded connect timeout. No request is sent yet.
    pub async fn connect(target: &KubeTarget, current_storage: StorageKind) -> HoistResult<Self> {
        let path = target.kubeconfig.display().to_string();
        let kubeconfig = Kubeconfig::read_from(&target.kubeconfig)
            .map_err(|e| HoistError::ConfigLoad { path: path.clone(), message: e.to_string() })?;
        let options = KubeConfigOptions { context: target.context.clone(), ..Default::default() };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| HoistError::ConfigLoad { path: path.clone(), message: e.to_string() })?;
        config.connect_timeout = Some(target.connect_timeout);
        let client = Client::try_from(config).map_err(classify)?;
        info!(kubeconfig = %path, context = ?target.context, timeout_secs = target.connect_timeout.as_secs(), "cluster accessor ready");
        Ok(Self { client, current_storage })
    }
}

/// Selector for deployed current-store records of `name`.
pub(crate) fn current_selector(name: &str) -> LabelSelector {
    LabelSelector::new()
        .and_equals(CURRENT_OWNER_LABEL, CURRENT_OWNER)
        .and_equals(CURRENT_NAME_LABEL, name)
        .and_equals(CURRENT_STATUS_LABEL, "deployed")
}

fn to_labeled<K>(kind: StorageKind, namespace: &str, obj: &K) -> LabeledResource
where
    K: Resource,
{
    LabeledResource {
        kind,
        namespace: obj.namespace().unwrap_or_else(|| namespace.to_string()),
        name: obj.name_any(),
        labels: obj.labels().clone(),
    }
}

async fn list_typed<K>(api: Api<K>, kind: StorageKind, namespace: &str, selector: &LabelSelector) -> HoistResult<Vec<LabeledResource>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let mut lp = ListParams::default();
    if !selector.is_empty() {
        lp = lp.labels(&selector.to_string());
    }
    let list = api.list(&lp).await.map_err(classify)?;
    let out: Vec<_> = list
        .items
        .iter()
        .map(|o| to_labeled(kind, namespace, o))
        .filter(|r| r.namespace == namespace && selector.matches(&r.labels))
        .collect();
    debug!(kind = %kind, ns = %namespace, selector = %selector, count = out.len(), "listed records");
    Ok(out)
}

async fn relabel_typed<K>(api: Api<K>, name: &str, key: &str, value: &str) -> HoistResult<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let mut obj = api.get(name).await.map_err(classify)?;
    obj.labels_mut().insert(key.to_string(), value.to_string());
    api.replace(name, &PostParams::default(), &obj).await.map_err(classify)?;
    Ok(())
}

fn namespaced<K>(client: &Client, namespace: &str) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    Api::namespaced(client.clone(), namespace)
}

#[async_trait::async_trait]
impl ClusterAccessor for KubeAccessor {
    async fn list(&self, kind: StorageKind, namespace: &str, selector: &LabelSelector) -> HoistResult<Vec<LabeledResource>> {
        match kind {
            StorageKind::ConfigMaps => list_typed(namespaced::<ConfigMap>(&self.client, namespace), kind, namespace, selector).await,
            StorageKind::Secrets => list_typed(namespaced::<Secret>(&self.client, namespace), kind, namespace, selector).await,
        }
    }

    async fn set_label(&self, kind: StorageKind, namespace: &str, name: &str, key: &str, value: &str) -> HoistResult<()> {
        debug!(kind = %kind, ns = %namespace, name = %name, key = %key, value = %value, "updating label");
        match kind {
            StorageKind::ConfigMaps => relabel_typed(namespaced::<ConfigMap>(&self.client, namespace), name, key, value).await,
            StorageKind::Secrets => relabel_typed(namespaced::<Secret>(&self.client, namespace), name, key, value).await,
        }
    }

    async fn deployed_release(&self, name: &str, namespace: &str) -> HoistResult<Option<ReleaseRevision>> {
        let selector = current_selector(name);
        let records = self.list(self.current_storage, namespace, &selector).await?;
        Ok(latest_revision(&records, name, namespace))
    }
}

/// Pick the highest `version` among current-store records.
pub(crate) fn latest_revision(records: &[LabeledResource], name: &str, namespace: &str) -> Option<ReleaseRevision> {
    records
        .iter()
        .filter_map(|r| {
            let version = r.labels.get(CURRENT_VERSION_LABEL)?.parse::<u32>().ok()?;
            let status = r.labels.get(CURRENT_STATUS_LABEL).cloned().unwrap_or_default();
            Some(ReleaseRevision { name: name.to_string(), namespace: namespace.to_string(), version, status })
        })
        .max_by_key(|r| r.version)
}

/// Connects through kube-rs; current releases are read from `current_storage`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector {
    current_storage: StorageKind,
}

impl KubeConnector {
    pub fn new(current_storage: StorageKind) -> Self {
        Self { current_storage }
    }
}

#[async_trait::async_trait]
impl Connector for KubeConnector {
    async fn connect(&self, target: &KubeTarget) -> HoistResult<Arc<dyn ClusterAccessor>> {
        let accessor = KubeAccessor::connect(target, self.current_storage).await?;
        Ok(Arc::new(accessor))
    }
}

/// Labels of a current-store record, for callers building fixtures.
pub fn current_labels(name: &str, version: u32, status: &str) -> BTreeMap<String, String> {
    [
        (CURRENT_OWNER_LABEL, CURRENT_OWNER.to_string()),
        (CURRENT_NAME_LABEL, name.to_string()),
        (CURRENT_STATUS_LABEL, status.to_string()),
        (CURRENT_VERSION_LABEL, version.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
