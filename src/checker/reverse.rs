//! Reverse dependency check: does the subject satisfy everyone depending on it?

use tracing::debug;

use crate::constraint::{Constraint, CLAUSE_SEPARATOR};
use crate::version::Version;
use crate::workload::{dependency_annotation_key, Snapshot, Workload};
use crate::Error;

/// Check `version` of `subject` against the constraints siblings declared on it
///
/// Each sibling's `<subject>.wkm.welljoint.com/dependence` annotation is
/// split on `,` and every part must hold. An empty `version` passes: a
/// workload with no known version cannot be judged.
pub fn check_reverse(snapshot: &Snapshot, subject: &str, version: &str) -> Result<(), Error> {
    if version.is_empty() {
        debug!(subject = %subject, "Subject has no version, skipping reverse check");
        return Ok(());
    }

    let parsed = Version::parse(version)?;
    let key = dependency_annotation_key(subject);

    for sibling in snapshot.iter() {
        let Some(raw) = sibling
            .metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(&key))
            .filter(|v| !v.is_empty())
        else {
            continue;
        };

        for expr in raw.split(CLAUSE_SEPARATOR) {
            let constraint = Constraint::parse(expr)?;
            if !constraint.matches(parsed) {
                return Err(Error::ReverseViolation {
                    subject: subject.to_string(),
                    version: version.to_string(),
                    dependent: sibling.name().to_string(),
                    constraint: expr.trim().to_string(),
                });
            }
        }

        debug!(subject = %subject, dependent = %sibling.name(), "Reverse dependency satisfied");
    }

    Ok(())
}
