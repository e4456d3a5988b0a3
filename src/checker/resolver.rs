//! Dependency resolution from image metadata

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::constraint::Dependencies;
use crate::image::ImageRef;
use crate::Error;

/// Source of the dependency constraints an image declares
///
/// Implemented by [`crate::registry::RegistryLookup`] in production and
/// mocked in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyLookup: Send + Sync {
    /// Constraints declared by `image`, keyed by target service name
    ///
    /// `image` is already normalized to the configured registry.
    async fn lookup(&self, image: &ImageRef) -> Result<BTreeMap<String, String>, Error>;
}

/// Resolve and merge the dependency constraints of a workload's images
///
/// Every tagged image is normalized onto `default_registry` and looked up in
/// order. The first failing lookup aborts the resolution; nothing resolved
/// so far is returned.
pub async fn resolve_dependencies(
    images: &[ImageRef],
    lookup: &dyn DependencyLookup,
    default_registry: Option<&str>,
) -> Result<Dependencies, Error> {
    let mut deps = Dependencies::new();

    for image in images {
        let canonical = image.canonical(default_registry);
        if canonical.tag.is_none() {
            debug!(image = %image, "Image has no tag, skipping dependency lookup");
            continue;
        }

        let declared = lookup.lookup(&canonical).await.map_err(|e| match e {
            Error::Lookup(_) => e,
            other => Error::lookup(format!("{canonical}: {other}")),
        })?;

        debug!(image = %canonical, count = declared.len(), "Resolved image dependencies");
        deps.extend(declared);
    }

    Ok(deps)
}
