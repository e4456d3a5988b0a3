//! Semantic versions derived from image tags
//!
//! Only the `major.minor.patch` triple is kept. Pre-release and build
//! metadata are accepted while parsing and then dropped, so `1.4.0-rc.1+b7`
//! and `v1.4` both canonicalize to `1.4.0`.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::image::ImageRef;
use crate::Error;

/// A `major.minor.patch` version
///
/// An unknown version is `Option::<Version>::None`; there is no default
/// version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
}

impl Version {
    /// Create a version from its components
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version leniently
    ///
    /// Accepts an optional leading `v`, one to three numeric components
    /// (missing ones are zero, leading zeros are ignored) and an optional
    /// `-pre`/`+build` suffix, which must itself be well formed.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let text = input.trim();
        let text = text.strip_prefix(['v', 'V']).unwrap_or(text);

        let split = text.find(['-', '+']).unwrap_or(text.len());
        let (core, suffix) = text.split_at(split);

        let components = core
            .split('.')
            .map(|c| parse_component(input, c))
            .collect::<Result<Vec<_>, _>>()?;
        let (major, minor, patch) = match components[..] {
            [major] => (major, 0, 0),
            [major, minor] => (major, minor, 0),
            [major, minor, patch] => (major, minor, patch),
            _ => {
                return Err(Error::malformed_version(
                    input,
                    format!(
                        "expected at most 3 numeric components, found {}",
                        components.len()
                    ),
                ))
            }
        };

        // Only the suffix goes through semver; the numbers are already known
        if !suffix.is_empty() {
            semver::Version::parse(&format!("0.0.0{suffix}"))
                .map_err(|e| Error::malformed_version(input, e))?;
        }

        Ok(Self::new(major, minor, patch))
    }

    /// The equivalent `semver` version, without pre-release or build data
    pub fn to_semver(self) -> semver::Version {
        semver::Version::new(self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn parse_component(input: &str, component: &str) -> Result<u64, Error> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::malformed_version(
            input,
            format!("'{component}' is not a numeric component"),
        ));
    }
    component
        .parse::<u64>()
        .map_err(|e| Error::malformed_version(input, e))
}

/// Derive a version from container images
///
/// `images` must be ordered init containers first, then regular containers.
/// The first tag that parses as a version wins; untagged images and tags
/// that are not versions (`latest`, `stable`) are skipped.
pub fn extract_version(images: &[ImageRef]) -> Option<Version> {
    images.iter().find_map(|image| {
        let tag = image.tag.as_deref()?;
        match Version::parse(tag) {
            Ok(version) => Some(version),
            Err(e) => {
                trace!(image = %image, error = %e, "Image tag is not a version, skipping");
                None
            }
        }
    })
}

/// Render an optional version the way it is stored in the version label
pub fn version_text(version: Option<Version>) -> String {
    version.map(|v| v.to_string()).unwrap_or_default()
}
