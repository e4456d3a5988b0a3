//! Listing sibling workloads from the Kubernetes API

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::workload::{Snapshot, WorkloadObject};
use crate::Error;

/// Source of the workload snapshot for a namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadLister: Send + Sync {
    /// Every Deployment, StatefulSet and DaemonSet in `namespace`
    async fn list(&self, namespace: &str) -> Result<Snapshot, Error>;
}

/// [`WorkloadLister`] backed by the Kubernetes API
pub struct KubeWorkloadLister {
    client: Client,
    retry: RetryConfig,
}

impl KubeWorkloadLister {
    /// Create a lister using the given client and retry policy
    pub fn new(client: Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    async fn list_kind<K>(&self, namespace: &str) -> Result<Vec<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let kind = K::kind(&K::DynamicType::default()).to_string();

        let list = retry_with_backoff(&self.retry, "list_workloads", || {
            let api = api.clone();
            async move { api.list(&ListParams::default()).await }
        })
        .await
        .map_err(|e| Error::lookup(format!("listing {kind} in {namespace}: {e}")))?;

        debug!(kind = %kind, namespace = %namespace, count = list.items.len(), "Listed workloads");
        Ok(list.items)
    }
}

#[async_trait]
impl WorkloadLister for KubeWorkloadLister {
    async fn list(&self, namespace: &str) -> Result<Snapshot, Error> {
        let deployments = self.list_kind::<Deployment>(namespace).await?;
        let statefulsets = self.list_kind::<StatefulSet>(namespace).await?;
        let daemonsets = self.list_kind::<DaemonSet>(namespace).await?;

        Ok(deployments
            .into_iter()
            .map(WorkloadObject::from)
            .chain(statefulsets.into_iter().map(WorkloadObject::from))
            .chain(daemonsets.into_iter().map(WorkloadObject::from))
            .collect())
    }
}
