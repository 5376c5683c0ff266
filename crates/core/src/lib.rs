//! Hoist core types: release identities, storage records and migration options.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod error;
mod selector;

pub use error::{BoxError, HoistError, HoistResult};
pub use selector::{LabelSelector, Requirement};

/// Labels carried by legacy (Tiller) release records.
pub const LEGACY_NAME_LABEL: &str = "NAME";
pub const LEGACY_OWNER_LABEL: &str = "OWNER";
pub const LEGACY_STATUS_LABEL: &str = "STATUS";
pub const LEGACY_VERSION_LABEL: &str = "VERSION";

/// Labels carried by current (v3) release records.
pub const CURRENT_NAME_LABEL: &str = "name";
pub const CURRENT_OWNER_LABEL: &str = "owner";
pub const CURRENT_STATUS_LABEL: &str = "status";
pub const CURRENT_VERSION_LABEL: &str = "version";
pub const CURRENT_OWNER: &str = "helm";

/// Owner marker written onto preserved legacy records.
pub const NEUTRAL_OWNER: &str = "none";

pub const DEFAULT_LEGACY_SELECTOR: &str = "OWNER=TILLER";
pub const DEFAULT_LEGACY_NAMESPACE: &str = "kube-system";
pub const DEFAULT_MAX_REVISIONS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of namespaced object a release store keeps its records in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    ConfigMaps,
    Secrets,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::ConfigMaps => "configmaps",
            StorageKind::Secrets => "secrets",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = HoistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "configmap" | "configmaps" => Ok(StorageKind::ConfigMaps),
            "secret" | "secrets" => Ok(StorageKind::Secrets),
            other => Err(HoistError::validation(format!("unknown storage kind '{}' (expect configmaps or secrets)", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ReleaseIdentity {
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for ReleaseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A namespaced ConfigMap or Secret reduced to what label-addressed storage needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabeledResource {
    pub kind: StorageKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl LabeledResource {
    pub fn new(kind: StorageKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into(), labels: BTreeMap::new() }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// One revision of a legacy release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyRecord {
    /// Name of the backing ConfigMap/Secret (e.g. `myapp.v2`).
    pub resource: String,
    pub namespace: String,
    pub release: String,
    pub owner: String,
    pub status: String,
    pub version: u32,
}

impl LegacyRecord {
    /// Returns None when the object lacks a `NAME` label or a numeric `VERSION`.
    pub fn from_resource(r: &LabeledResource) -> Option<Self> {
        let release = r.labels.get(LEGACY_NAME_LABEL)?.clone();
        let version = r.labels.get(LEGACY_VERSION_LABEL)?.parse::<u32>().ok()?;
        Some(Self {
            resource: r.name.clone(),
            namespace: r.namespace.clone(),
            release,
            owner: r.labels.get(LEGACY_OWNER_LABEL).cloned().unwrap_or_default(),
            status: r.labels.get(LEGACY_STATUS_LABEL).cloned().unwrap_or_default(),
            version,
        })
    }

    pub fn is_deployed(&self) -> bool {
        self.status.eq_ignore_ascii_case("deployed")
    }
}

/// Highest-ordinal revision whose status is deployed.
pub fn current_legacy_revision(records: &[LegacyRecord]) -> Option<&LegacyRecord> {
    records.iter().filter(|r| r.is_deployed()).max_by_key(|r| r.version)
}

/// Most recently deployed revision in the current release store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseRevision {
    pub name: String,
    pub namespace: String,
    pub version: u32,
    pub status: String,
}

/// Where and how to reach the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeTarget {
    pub kubeconfig: PathBuf,
    pub context: Option<String>,
    pub connect_timeout: Duration,
}

impl KubeTarget {
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self { kubeconfig: kubeconfig.into(), context: None, connect_timeout: DEFAULT_CONNECT_TIMEOUT }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.is_empty());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Settings for a single release migration. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    release_name: String,
    release_namespace: String,
    delete_legacy: bool,
    dry_run: bool,
    max_revisions: u32,
    legacy_selector: LabelSelector,
    legacy_namespace: String,
    storage: StorageKind,
}

impl MigrationOptions {
    pub fn new(release_name: impl Into<String>, release_namespace: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            release_namespace: release_namespace.into(),
            delete_legacy: false,
            dry_run: false,
            max_revisions: DEFAULT_MAX_REVISIONS,
            legacy_selector: LabelSelector::new().and_equals(LEGACY_OWNER_LABEL, "TILLER"),
            legacy_namespace: DEFAULT_LEGACY_NAMESPACE.to_string(),
            storage: StorageKind::ConfigMaps,
        }
    }

    pub fn with_delete_legacy(mut self, on: bool) -> Self {
        self.delete_legacy = on;
        self
    }

    pub fn with_dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }

    /// 0 converts every revision.
    pub fn with_max_revisions(mut self, max: u32) -> Self {
        self.max_revisions = max;
        self
    }

    pub fn with_legacy_selector(mut self, selector: LabelSelector) -> Self {
        self.legacy_selector = selector;
        self
    }

    pub fn with_legacy_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.legacy_namespace = namespace.into();
        self
    }

    pub fn with_storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    pub fn release_namespace(&self) -> &str {
        &self.release_namespace
    }

    pub fn delete_legacy(&self) -> bool {
        self.delete_legacy
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn max_revisions(&self) -> u32 {
        self.max_revisions
    }

    pub fn legacy_selector(&self) -> &LabelSelector {
        &self.legacy_selector
    }

    pub fn legacy_namespace(&self) -> &str {
        &self.legacy_namespace
    }

    pub fn storage(&self) -> StorageKind {
        self.storage
    }

    pub fn identity(&self) -> ReleaseIdentity {
        ReleaseIdentity { name: self.release_name.clone(), namespace: self.release_namespace.clone() }
    }

    /// Legacy selector narrowed to this release's `NAME` label, when a release is set.
    pub fn legacy_release_selector(&self) -> LabelSelector {
        if self.release_name.is_empty() {
            self.legacy_selector.clone()
        } else {
            self.legacy_selector.clone().and_equals(LEGACY_NAME_LABEL, self.release_name.clone())
        }
    }
}
