//! Image dependency lookup against a container registry
//!
//! Dependencies are declared as image labels, using the same key scheme as
//! the workload annotations:
//!
//! ```text
//! LABEL billing.wkm.welljoint.com/dependence=">=1.2.0 <2.0.0"
//! ```
//!
//! [`RegistryLookup`] pulls the manifest and config blob through
//! [`oci_client`], which resolves multi-platform indexes and performs the
//! registry token handshake, then reads the labels from the config.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use oci_client::client::{linux_amd64_resolver, ClientConfig, ClientProtocol};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use serde::Deserialize;
use tracing::debug;

use crate::checker::DependencyLookup;
use crate::image::ImageRef;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::workload::DEPENDENCY_ANNOTATION_SUFFIX;
use crate::Error;

/// Registry client configuration
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Use plain HTTP instead of HTTPS
    pub insecure: bool,
    /// Timeout for one manifest-and-config pull
    pub timeout: Duration,
    /// Basic auth credentials, exchanged for a token when the registry asks
    pub credentials: Option<(String, String)>,
    /// Retry policy for each pull
    pub retry: RetryConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: Duration::from_secs(5),
            credentials: None,
            retry: RetryConfig::default(),
        }
    }
}

/// [`DependencyLookup`] backed by the OCI distribution API
pub struct RegistryLookup {
    client: Client,
    auth: RegistryAuth,
    config: RegistryConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

impl RegistryLookup {
    /// Create a lookup client
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            client: Client::new(client_config(&config)),
            auth: registry_auth(&config),
            config,
        }
    }
}

#[async_trait]
impl DependencyLookup for RegistryLookup {
    async fn lookup(&self, image: &ImageRef) -> Result<BTreeMap<String, String>, Error> {
        let reference = &to_reference(image)?;
        let timeout = self.config.timeout;

        let (_, digest, raw_config) =
            retry_with_backoff(&self.config.retry, "pull_image_config", move || async move {
                tokio::time::timeout(
                    timeout,
                    self.client.pull_manifest_and_config(reference, &self.auth),
                )
                .await
                .map_err(|_| Error::lookup(format!("{reference}: no answer within {timeout:?}")))?
                .map_err(Error::from)
            })
            .await?;
        debug!(image = %reference, digest = %digest, "Pulled image config");

        let config: ImageConfig = serde_json::from_str(&raw_config)
            .map_err(|e| Error::serialization(format!("{reference}: image config: {e}")))?;
        let labels = config.config.and_then(|c| c.labels).unwrap_or_default();
        Ok(dependencies_from_labels(&labels))
    }
}

fn client_config(config: &RegistryConfig) -> ClientConfig {
    ClientConfig {
        protocol: if config.insecure {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        },
        platform_resolver: Some(Box::new(linux_amd64_resolver)),
        ..Default::default()
    }
}

fn registry_auth(config: &RegistryConfig) -> RegistryAuth {
    match &config.credentials {
        Some((user, password)) => RegistryAuth::Basic(user.clone(), password.clone()),
        None => RegistryAuth::Anonymous,
    }
}

/// Distribution reference for an already canonicalized image
///
/// The digest is preferred over the tag when both are present.
fn to_reference(image: &ImageRef) -> Result<Reference, Error> {
    let registry = image
        .registry
        .clone()
        .ok_or_else(|| Error::lookup(format!("image '{image}' names no registry")))?;
    let repository = image.repository.clone();

    match (&image.digest, &image.tag) {
        (Some(digest), _) => Ok(Reference::with_digest(registry, repository, digest.clone())),
        (None, Some(tag)) => Ok(Reference::with_tag(registry, repository, tag.clone())),
        (None, None) => Err(Error::lookup(format!("image '{image}' has no tag"))),
    }
}

/// Dependency constraints declared in image labels, keyed by target service
fn dependencies_from_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter_map(|(key, expr)| {
            let target = key.strip_suffix(DEPENDENCY_ANNOTATION_SUFFIX)?;
            (!target.is_empty() && !expr.trim().is_empty())
                .then(|| (target.to_string(), expr.trim().to_string()))
        })
        .collect()
}
