//! Version and dependency compliance checks
//!
//! A [`Checker`] is built once at startup and shared by reference with every
//! admission request. It holds configuration only; each evaluation works on
//! its own workload and its own [`Snapshot`], so nothing is cached between
//! requests.
//!
//! - [`Checker::mutate`] - resolve version and constraints, publish them on the object
//! - [`Checker::validate`] - forward then reverse check against a snapshot

mod forward;
mod publish;
mod resolver;
mod reverse;

pub use forward::{check_forward, SoftSkip};
pub use publish::publish_metadata;
pub use resolver::{resolve_dependencies, DependencyLookup};
pub use reverse::check_reverse;

#[cfg(test)]
pub use resolver::MockDependencyLookup;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, info, instrument};

use crate::constraint::Dependencies;
use crate::image::ImageRef;
use crate::version::{extract_version, version_text, Version};
use crate::workload::{published_dependencies, resolve_version, Snapshot, Workload};
use crate::Error;

/// Checker configuration
#[derive(Clone, Debug, Default)]
pub struct CheckerConfig {
    /// Registry host every image is normalized onto before its dependencies
    /// are looked up, e.g. `harbor:5000`
    pub default_registry: Option<String>,
}

/// Version and constraints written onto a workload by [`Checker::mutate`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    /// Version label value, empty when unknown
    pub version: String,
    /// Complete constraint set
    pub dependencies: Dependencies,
}

/// The dependency checker
#[derive(Clone, Debug, Default)]
pub struct Checker {
    config: CheckerConfig,
}

impl Checker {
    /// Create a checker with the given configuration
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    /// Checker configuration
    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Version of the first image whose tag is a version
    pub fn extract_version(&self, images: &[ImageRef]) -> Option<Version> {
        extract_version(images)
    }

    /// Version plus merged dependency constraints of a workload's images
    pub async fn extract_version_and_dependencies(
        &self,
        images: &[ImageRef],
        lookup: &dyn DependencyLookup,
    ) -> Result<(Option<Version>, Dependencies), Error> {
        let version = extract_version(images);
        let deps =
            resolve_dependencies(images, lookup, self.config.default_registry.as_deref()).await?;
        Ok((version, deps))
    }

    /// See [`check_forward`]
    pub fn check_forward(
        &self,
        deps: &Dependencies,
        snapshot: &Snapshot,
    ) -> Result<Vec<SoftSkip>, Error> {
        check_forward(deps, snapshot)
    }

    /// See [`check_reverse`]
    pub fn check_reverse(
        &self,
        snapshot: &Snapshot,
        subject: &str,
        version: &str,
    ) -> Result<(), Error> {
        check_reverse(snapshot, subject, version)
    }

    /// See [`publish_metadata`]
    pub fn publish_metadata(&self, meta: &mut ObjectMeta, version: &str, deps: &Dependencies) {
        publish_metadata(meta, version, deps)
    }

    /// Mutating pass: derive version and constraints from the images and
    /// record them on the workload
    ///
    /// The version always comes from the images here, so a changed image tag
    /// refreshes a label left over from a previous admission.
    #[instrument(skip_all, fields(workload = %workload.name(), kind = %workload.kind()))]
    pub async fn mutate<W>(
        &self,
        workload: &mut W,
        lookup: &dyn DependencyLookup,
    ) -> Result<Published, Error>
    where
        W: Workload + Send + ?Sized,
    {
        let images = workload.images();
        let (version, dependencies) = self
            .extract_version_and_dependencies(&images, lookup)
            .await?;
        let version = version_text(version);

        self.publish_metadata(workload.metadata_mut(), &version, &dependencies);
        info!(
            version = %version,
            dependencies = dependencies.len(),
            "Published version and dependencies"
        );

        Ok(Published {
            version,
            dependencies,
        })
    }

    /// Validating pass: check the subject's published constraints against
    /// the snapshot, then the snapshot's constraints against the subject
    ///
    /// Returns the dependencies that were skipped because their target is
    /// missing or has no version.
    #[instrument(skip_all, fields(workload = %subject.name(), kind = %subject.kind()))]
    pub fn validate<W>(&self, subject: &W, snapshot: &Snapshot) -> Result<Vec<SoftSkip>, Error>
    where
        W: Workload + ?Sized,
    {
        let version = resolve_version(subject);
        let deps = published_dependencies(subject.metadata());
        debug!(
            version = %version,
            dependencies = deps.len(),
            siblings = snapshot.len(),
            "Validating workload"
        );

        let skipped = self.check_forward(&deps, snapshot)?;
        self.check_reverse(snapshot, subject.name(), &version)?;
        Ok(skipped)
    }
}
