//! Forward dependency check: do the services the subject depends on satisfy it?

use std::fmt;

use tracing::{debug, info};

use crate::constraint::{Constraint, Dependencies};
use crate::version::Version;
use crate::workload::{resolve_version, Snapshot};
use crate::Error;

/// A dependency that could not be judged and was skipped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SoftSkip {
    /// The target service is not in the namespace
    MissingTarget {
        /// Target service name
        target: String,
    },
    /// The target exists but has no version label and no versioned image
    UnresolvedVersion {
        /// Target service name
        target: String,
    },
}

impl SoftSkip {
    /// Target service name
    pub fn target(&self) -> &str {
        match self {
            SoftSkip::MissingTarget { target } | SoftSkip::UnresolvedVersion { target } => target,
        }
    }
}

impl fmt::Display for SoftSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftSkip::MissingTarget { target } => write!(f, "{target}: not found"),
            SoftSkip::UnresolvedVersion { target } => write!(f, "{target}: no version"),
        }
    }
}

/// Check every declared constraint against the target's current version
///
/// Stops at the first fatal problem: a malformed constraint, a malformed
/// target version, or a violation. Missing targets and targets without a
/// version are skipped and returned.
pub fn check_forward(deps: &Dependencies, snapshot: &Snapshot) -> Result<Vec<SoftSkip>, Error> {
    let mut skipped = Vec::new();

    for (target, expr) in deps.iter() {
        let constraint = Constraint::parse(expr)?;

        let Some(workload) = snapshot.get(target) else {
            info!(target = %target, "Depended-on service not found, skipping");
            skipped.push(SoftSkip::MissingTarget {
                target: target.to_string(),
            });
            continue;
        };

        let resolved = resolve_version(workload);
        if resolved.is_empty() {
            info!(target = %target, "Depended-on service has no version, skipping");
            skipped.push(SoftSkip::UnresolvedVersion {
                target: target.to_string(),
            });
            continue;
        }

        let version = Version::parse(&resolved)?;
        if !constraint.matches(version) {
            return Err(Error::ForwardViolation {
                target: target.to_string(),
                version: resolved,
                constraint: constraint.to_string(),
            });
        }

        debug!(target = %target, version = %version, constraint = %constraint, "Dependency satisfied");
    }

    Ok(skipped)
}
