//! Container image references
//!
//! Parses `[registry-host/]repository[:tag][@digest]` the way the dependency
//! lookup needs it: the tag is the text after the last `:` that is not part
//! of a path, and the first path segment is a registry host only when it
//! contains a `.` or a `:` (`harbor:5000/team/app`, `registry.local/app`).

use std::fmt;

/// A parsed container image reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host (with optional port), if the reference names one
    pub registry: Option<String>,
    /// Repository path without the registry host
    pub repository: String,
    /// Tag, if present
    pub tag: Option<String>,
    /// Content digest (`sha256:...`), if present
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse an image reference. Never fails; unrecognized shapes end up in
    /// `repository` with no tag.
    pub fn parse(image: &str) -> Self {
        let image = image.trim();

        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(digest.to_string())),
            None => (image, None),
        };

        let (name, tag) = match name.rfind(':') {
            Some(i) if !name[i + 1..].contains('/') => {
                (&name[..i], Some(name[i + 1..].to_string()))
            }
            _ => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => {
                (Some(host.to_string()), rest.to_string())
            }
            _ => (None, name.to_string()),
        };

        Self {
            registry,
            repository,
            tag: tag.filter(|t| !t.is_empty()),
            digest,
        }
    }

    /// Replace the registry host, keeping repository, tag and digest
    pub fn with_registry(&self, host: &str) -> Self {
        Self {
            registry: Some(host.to_string()),
            ..self.clone()
        }
    }

    /// Canonical form used for dependency lookups
    ///
    /// Drops any registry host the reference carries and re-prefixes the
    /// configured default host, so `team/app:1.5.1` and
    /// `mirror.local/team/app:1.5.1` both become
    /// `harbor:5000/team/app:1.5.1` for host `harbor:5000`. An empty or
    /// absent host leaves the reference pointing where it already does.
    pub fn canonical(&self, default_registry: Option<&str>) -> Self {
        match default_registry.map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) => self.with_registry(host.trim_end_matches('/')),
            None => self.clone(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':')
}
