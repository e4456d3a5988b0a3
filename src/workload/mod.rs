//! Workload view used by the checker
//!
//! The checker never branches on resource kind. Deployments, StatefulSets
//! and DaemonSets each implement [`Workload`] once, here, and everything
//! downstream works on the trait:
//! - [`Workload::images`] - init containers then containers, in order
//! - [`Workload::metadata`] / [`Workload::metadata_mut`] - labels and annotations
//!
//! [`WorkloadObject`] is the decoded form of an admitted or listed object and
//! [`Snapshot`] is the per-request, read-only view of a namespace.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;

use crate::constraint::Dependencies;
use crate::image::ImageRef;
use crate::version::{extract_version, version_text};
use crate::Error;

/// Label holding a workload's resolved version
pub const VERSION_LABEL: &str = "wkm.welljoint.com/version";

/// Suffix of the annotations holding a workload's dependency constraints
///
/// The full key is `<target-service><suffix>`, e.g.
/// `billing.wkm.welljoint.com/dependence`.
pub const DEPENDENCY_ANNOTATION_SUFFIX: &str = ".wkm.welljoint.com/dependence";

/// Annotation key under which a constraint on `target` is stored
pub fn dependency_annotation_key(target: &str) -> String {
    format!("{target}{DEPENDENCY_ANNOTATION_SUFFIX}")
}

/// Capability shared by every workload kind the checker understands
pub trait Workload {
    /// Which kind of resource this is
    fn kind(&self) -> WorkloadKind;

    /// Object metadata
    fn metadata(&self) -> &ObjectMeta;

    /// Mutable object metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Pod template, if the spec carries one
    fn pod_template(&self) -> Option<&PodTemplateSpec>;

    /// Workload name, empty if unset
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Container images, init containers first, in declaration order
    fn images(&self) -> Vec<ImageRef> {
        let Some(pod) = self.pod_template().and_then(|t| t.spec.as_ref()) else {
            return Vec::new();
        };

        pod.init_containers
            .iter()
            .flatten()
            .chain(pod.containers.iter())
            .filter_map(|c| c.image.as_deref())
            .map(ImageRef::parse)
            .collect()
    }

    /// Value of the version label, if present and non-empty
    fn version_label(&self) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(VERSION_LABEL))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Resolve the version used when comparing this workload against constraints
///
/// A non-empty version label is authoritative. Only without one is the
/// version derived from the container images. Returns `""` when neither
/// yields a version. The label is returned verbatim; callers parse it.
pub fn resolve_version<W: Workload + ?Sized>(workload: &W) -> String {
    match workload.version_label() {
        Some(label) => label.to_string(),
        None => version_text(extract_version(&workload.images())),
    }
}

/// Read the dependency constraints a workload has published on itself
pub fn published_dependencies(meta: &ObjectMeta) -> Dependencies {
    meta.annotations
        .iter()
        .flatten()
        .filter_map(|(key, expr)| {
            let target = key.strip_suffix(DEPENDENCY_ANNOTATION_SUFFIX)?;
            (!target.is_empty()).then_some((target, expr.as_str()))
        })
        .collect()
}

/// Supported workload kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 DaemonSet
    DaemonSet,
}

impl WorkloadKind {
    /// All supported kinds, in listing order
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::Deployment,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
    ];

    /// Kind name as it appears in `kind:`
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }

    /// Look up a kind by its `kind:` name
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! impl_workload {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Workload for $ty {
                fn kind(&self) -> WorkloadKind {
                    WorkloadKind::$ty
                }

                fn metadata(&self) -> &ObjectMeta {
                    &self.metadata
                }

                fn metadata_mut(&mut self) -> &mut ObjectMeta {
                    &mut self.metadata
                }

                fn pod_template(&self) -> Option<&PodTemplateSpec> {
                    self.spec.as_ref().map(|spec| &spec.template)
                }
            }
        )*
    };
}

impl_workload!(Deployment, StatefulSet, DaemonSet);

/// A decoded workload of any supported kind
#[derive(Clone, Debug)]
pub enum WorkloadObject {
    /// A Deployment
    Deployment(Deployment),
    /// A StatefulSet
    StatefulSet(StatefulSet),
    /// A DaemonSet
    DaemonSet(DaemonSet),
}

impl WorkloadObject {
    /// Decode an admitted object of the given kind
    pub fn from_dynamic(kind: &str, obj: &DynamicObject) -> Result<Self, Error> {
        let kind = WorkloadKind::from_kind(kind)
            .ok_or_else(|| Error::UnsupportedKind(kind.to_string()))?;
        let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
        Self::from_value(kind, value)
    }

    /// Decode a JSON object of the given kind
    pub fn from_value(kind: WorkloadKind, value: serde_json::Value) -> Result<Self, Error> {
        let decoded = match kind {
            WorkloadKind::Deployment => serde_json::from_value(value).map(Self::Deployment),
            WorkloadKind::StatefulSet => serde_json::from_value(value).map(Self::StatefulSet),
            WorkloadKind::DaemonSet => serde_json::from_value(value).map(Self::DaemonSet),
        };
        decoded.map_err(|e| Error::serialization(format!("invalid {kind}: {e}")))
    }

    fn inner(&self) -> &dyn Workload {
        match self {
            Self::Deployment(w) => w,
            Self::StatefulSet(w) => w,
            Self::DaemonSet(w) => w,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Workload {
        match self {
            Self::Deployment(w) => w,
            Self::StatefulSet(w) => w,
            Self::DaemonSet(w) => w,
        }
    }
}

impl Workload for WorkloadObject {
    fn kind(&self) -> WorkloadKind {
        self.inner().kind()
    }

    fn metadata(&self) -> &ObjectMeta {
        self.inner().metadata()
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        self.inner_mut().metadata_mut()
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.inner().pod_template()
    }
}

impl From<Deployment> for WorkloadObject {
    fn from(value: Deployment) -> Self {
        Self::Deployment(value)
    }
}

impl From<StatefulSet> for WorkloadObject {
    fn from(value: StatefulSet) -> Self {
        Self::StatefulSet(value)
    }
}

impl From<DaemonSet> for WorkloadObject {
    fn from(value: DaemonSet) -> Self {
        Self::DaemonSet(value)
    }
}

/// Point-in-time view of the workloads in one namespace, keyed by name
///
/// Built once per admission request and never mutated afterwards. When two
/// kinds share a name, the one inserted last wins.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    workloads: BTreeMap<String, WorkloadObject>,
}

impl Snapshot {
    /// An empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workload under its name
    pub fn insert(&mut self, workload: WorkloadObject) {
        self.workloads.insert(workload.name().to_string(), workload);
    }

    /// Workload named `name`
    pub fn get(&self, name: &str) -> Option<&WorkloadObject> {
        self.workloads.get(name)
    }

    /// All workloads, ordered by name
    pub fn iter(&self) -> impl Iterator<Item = &WorkloadObject> {
        self.workloads.values()
    }

    /// Number of workloads
    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    /// Whether the namespace holds no workloads
    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

impl FromIterator<WorkloadObject> for Snapshot {
    fn from_iter<I: IntoIterator<Item = WorkloadObject>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for workload in iter {
            snapshot.insert(workload);
        }
        snapshot
    }
}
